//! qscale-relay — outbound side channels.
//!
//! Neither channel feeds back into scaling: a failed forward or
//! notification is logged and forgotten.

pub mod error;
pub mod forward;
pub mod notify;

pub use error::{RelayError, RelayResult};
pub use forward::Forwarder;
pub use notify::WebhookNotifier;

//! qscaled — the qscale daemon.
//!
//! Wires the pipeline together:
//!
//! ```text
//!  UDP ─► Listener ─► IngestPool lanes ─► ServiceTable ─► Autoscaler ─► cluster
//!            │                                                 │
//!            └─► Forwarder (rsyslog)                           └─► WebhookNotifier
//! ```

pub mod daemon;
pub mod listener;

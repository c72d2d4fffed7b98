//! qscale-ingest — from raw UDP payloads to counted events.
//!
//! # Architecture
//!
//! ```text
//! IngestPool::submit(raw)
//!   └── lane = arrival_ms % N  (bounded queue, blocks when full)
//!         └── Decoder::decode(raw)
//!               ├── Err(Malformed)  → warn + drop
//!               ├── Ok(None)        → not an access record, drop
//!               └── Ok(Some(event)) → ServiceTable::record(event)
//! ```
//!
//! Lanes never surface decode failures to the submitter; UDP is lossy and
//! the control loop tolerates missing events.

pub mod decoder;
pub mod error;
pub mod pool;

pub use decoder::Decoder;
pub use error::{DecodeError, IngestError};
pub use pool::{IngestPool, IngestStats};

//! Ingestion error types.

use thiserror::Error;

/// A payload that carried the log marker but could not be repaired into
/// an access record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed access record: {}", String::from_utf8_lossy(.raw))]
    Malformed { raw: Vec<u8> },
}

impl DecodeError {
    /// The payload exactly as received.
    pub fn raw(&self) -> &[u8] {
        match self {
            DecodeError::Malformed { raw } => raw,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingestion lane {0} is closed")]
    LaneClosed(usize),
}

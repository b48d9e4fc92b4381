//! Transport error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] pipe_protocol::ProtocolError),

    #[error("Shared memory region too small: expected {expected} bytes, got {actual}")]
    RegionSize { expected: usize, actual: usize },

    #[error("Slot index {index} out of range (ring has {slots} slots)")]
    SlotOutOfRange { index: usize, slots: usize },

    #[error("Channel closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;

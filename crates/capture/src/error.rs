//! Capture error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Backend initialization failed: {0}")]
    InitFailed(String),

    #[error("Frame capture failed: {0}")]
    CaptureFailed(String),

    #[error("Unsupported backbuffer format: {0}")]
    UnsupportedFormat(String),

    #[error("Missing GL entry point: {0}")]
    MissingGlFunction(&'static str),

    #[error("GL error 0x{code:04x} in {context}")]
    GlCall { context: &'static str, code: u32 },

    #[error("Transport error: {0}")]
    Transport(#[from] shm_transport::TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] pipe_protocol::ProtocolError),

    #[error("Control socket address not set ({0} is empty)")]
    NoSocketAddr(&'static str),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

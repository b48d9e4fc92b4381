use pipe_protocol::PixelFormat;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("video region holds no complete frame: {region} bytes, frame is {frame} bytes")]
    BadVideoRegion { region: usize, frame: usize },

    #[error("audio region holds no complete frame: {region} bytes, frame is {frame} bytes")]
    BadAudioRegion { region: usize, frame: usize },

    #[error("frame slot is {slot} bytes but caller buffer is {buffer} bytes")]
    FrameSizeMismatch { slot: usize, buffer: usize },

    #[error("cannot record {0:?} frames")]
    UnsupportedPixelFormat(PixelFormat),

    #[error("encoder thread panicked")]
    EncoderPanicked,

    #[error("transport error: {0}")]
    Transport(#[from] shm_transport::TransportError),

    #[error("encode error: {0}")]
    Encode(#[from] encoder::EncoderError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecorderResult<T> = Result<T, RecorderError>;

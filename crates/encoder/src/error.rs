//! Encoder error types

use pipe_protocol::PixelFormat;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("no encoder available for {0}")]
    MissingCodec(&'static str),

    #[error("unsupported pixel format {0:?}")]
    UnsupportedPixelFormat(PixelFormat),

    #[error("frame source: {0}")]
    Source(String),

    #[error("ffmpeg: {0}")]
    Codec(#[from] ffmpeg_next::Error),
}

pub type EncoderResult<T> = Result<T, EncoderError>;

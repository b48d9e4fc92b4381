//! Source traits feeding the encoder
//!
//! The receivers in the recorder implement these; tests feed synthetic
//! streams through the same seam.

use pipe_protocol::{AudioFormat, VideoFormat};

use crate::EncoderResult;

/// Result of pulling one video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePull {
    /// A frame was copied into the caller's buffer
    Frame {
        /// Capture time in microseconds
        timestamp: i64,
    },
    /// The stream ended; nothing was written
    Eos,
}

/// Blocking supplier of raw video frames
pub trait FrameSource: Send {
    /// Fixed format of every frame in the session
    fn video_format(&self) -> VideoFormat;

    /// Copy the next frame into `buffer`, sized per
    /// [`VideoFormat::frame_size`]. Blocks until a frame arrives or the
    /// stream ends.
    fn next_frame(&mut self, buffer: &mut [u8]) -> EncoderResult<FramePull>;
}

/// Supplier of pending interleaved audio samples
pub trait AudioSource: Send {
    /// Fixed stream parameters
    fn audio_format(&self) -> AudioFormat;

    /// Return up to `max_frames` frames of interleaved samples.
    ///
    /// An empty slice is an underrun, not the end of the stream; the
    /// encoder retries after the next video frame.
    fn next_frames(&mut self, max_frames: usize) -> EncoderResult<&[f32]>;
}

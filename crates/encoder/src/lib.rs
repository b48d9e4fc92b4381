//! MP4 encoding for kinescope recordings
//!
//! Pulls raw video frames and interleaved audio samples through the
//! [`FrameSource`] and [`AudioSource`] seams and writes an H.264/AAC MP4
//! file via ffmpeg. Video timestamps drive the interleaving clock.

mod error;
mod mp4_encoder;
mod traits;

pub use error::*;
pub use mp4_encoder::*;
pub use traits::*;

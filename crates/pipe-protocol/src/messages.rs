//! Control messages exchanged over the channel
//!
//! The shared-memory regions are pure byte arrays; commit/processed
//! acknowledgements carried by these messages are the only synchronization
//! between producer and consumer.

use serde::{Deserialize, Serialize};

use crate::{AudioFormat, CaptureSettings, PixelFormat, MAX_PLANES};

/// Location of a shared-memory region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShmemInfo {
    /// Filesystem path of the backing file
    pub path: String,
    /// Region size in bytes
    pub size: u64,
}

/// Audio stream announcement, embedded in [`VideoSetup`] or standalone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSetup {
    /// Stream parameters
    pub format: AudioFormat,
    /// Ring holding interleaved samples
    pub shmem: ShmemInfo,
}

/// Video stream announcement, sent once per capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSetup {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Rows stored bottom-up
    pub vflip: bool,
    /// Byte offset of each plane within a frame slot
    pub offsets: [u64; MAX_PLANES],
    /// Bytes per row of each plane
    pub linesizes: [u64; MAX_PLANES],
    /// Region holding the frame slots
    pub shmem: ShmemInfo,
    /// Present when the session also carries audio
    pub audio: Option<AudioSetup>,
}

/// Control messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Begin capturing with the given settings (toggles off if active)
    CaptureStart(CaptureSettings),
    /// Stop capturing
    CaptureStop,
    /// Producer announces the video (and optionally audio) session
    VideoSetup(VideoSetup),
    /// Producer wrote slot `index`; timestamp in microseconds
    VideoFrameCommitted { index: u32, timestamp: i64 },
    /// Consumer finished with slot `index`; producer may reuse it
    VideoFrameProcessed { index: u32 },
    /// Producer announces an audio stream outside of VideoSetup
    AudioSetup(AudioSetup),
    /// Producer wrote `frames` audio frames starting at `offset`
    AudioFramesCommitted { offset: i64, frames: i64 },
    /// Consumer consumed `frames` audio frames starting at `offset`
    AudioFramesProcessed { offset: i64, frames: i64 },
    /// The capture hotkey was pressed in the host process
    HotkeyPressed,
}

impl Message {
    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

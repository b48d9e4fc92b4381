//! Shared-Memory Transport for Kinescope
//!
//! Moves frame and audio bytes between the capturing process and the
//! recorder process:
//! - [`SharedMemory`]: a named, file-backed byte region mapped by both sides
//! - [`FrameRing`]: producer-side slot bookkeeping with overrun accounting
//! - [`AudioRingLayout`]: wrap-aware sample copies into a circular region
//! - [`Channel`]: the out-of-band control stream carrying framed messages
//!
//! The shared regions contain no locks; the control channel is the only
//! synchronization between the two processes.

mod audio_ring;
mod channel;
mod error;
mod paths;
mod ring;
mod shmem;

pub use audio_ring::*;
pub use channel::*;
pub use error::*;
pub use paths::*;
pub use ring::*;
pub use shmem::*;

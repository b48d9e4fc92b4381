//! Control Protocol Definitions for Kinescope
//!
//! This crate contains the message types, pixel/audio format descriptions,
//! and wire framing shared between the capturing process and the recorder
//! process. The shared-memory regions carry only raw bytes; everything that
//! synchronizes the two processes travels through these messages.

mod error;
mod format;
mod framing;
mod messages;

pub use error::*;
pub use format::*;
pub use framing::*;
pub use messages::*;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum number of image planes a video setup can describe
pub const MAX_PLANES: usize = 4;

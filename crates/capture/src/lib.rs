//! In-Process Frame Capture for Kinescope
//!
//! Runs inside the application being recorded. The host embeds a
//! [`CaptureHost`], picks a [`GraphicsBackend`] for its rendering API,
//! and calls [`CaptureHost::on_present`] from its render loop; captured
//! frames land in shared memory and are announced to the recorder
//! process over the control channel.
//!
//! Backends:
//! - OpenGL: async PBO readback ([`GlBackend`])
//! - Direct3D 11: staging-texture readback (`D3d11Backend`, Windows)
//! - Test pattern: CPU-generated frames ([`PatternBackend`])

mod driver;
mod error;
mod gl;
mod host;
mod pattern;
mod state;
mod traits;
mod writer;

#[cfg(target_os = "windows")]
mod d3d11;

pub use driver::*;
pub use error::*;
pub use gl::*;
pub use host::*;
pub use pattern::*;
pub use state::*;
pub use traits::*;
pub use writer::*;

#[cfg(target_os = "windows")]
pub use d3d11::*;

/// Depth of the readback pipeline and of the shared frame slot ring
pub const NUM_FRAME_SLOTS: usize = 3;

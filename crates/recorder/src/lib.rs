//! Recorder-process session machinery
//!
//! Sits on the recorder side of the control channel: buffers committed
//! video frames and audio samples out of shared memory, runs one encoder
//! thread per session, and toggles capture on hotkey presses. The encoding
//! itself lives in the `encoder` crate; this crate feeds it.

mod audio_receiver;
mod config;
mod error;
mod fps;
mod main_loop;
mod session;
mod video_receiver;

pub use audio_receiver::*;
pub use config::*;
pub use error::*;
pub use fps::*;
pub use main_loop::*;
pub use session::*;
pub use video_receiver::*;

//! Graphics backend abstraction

use std::fmt;

use crate::{CaptureResult, CaptureSink};

/// Which graphics API a backend captures from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Gl,
    D3d11,
    Pattern,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Gl => write!(f, "opengl"),
            BackendKind::D3d11 => write!(f, "d3d11"),
            BackendKind::Pattern => write!(f, "pattern"),
        }
    }
}

/// A capture backend driven by the host's present calls.
///
/// `present` runs on the host's render thread and must never block; when
/// capture is inactive it is expected to be close to free. Backends own
/// their GPU resources and release them in `free` once a session ends.
pub trait GraphicsBackend: Send {
    fn kind(&self) -> BackendKind;

    /// One presented frame. The backend decides, via the sink's state
    /// machine, whether to initialize, produce a frame, or do nothing.
    fn present(&mut self, sink: &mut CaptureSink) -> CaptureResult<()>;

    /// Release all backend resources.
    fn free(&mut self);
}

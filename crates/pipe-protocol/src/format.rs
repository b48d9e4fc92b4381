//! Video and audio format descriptions

use serde::{Deserialize, Serialize};

/// Pixel format of captured frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// RGBA 8-bit per channel
    Rgba8,
    /// BGRA 8-bit per channel (GL/DXGI backbuffer default)
    Bgra8,
    /// 10-bit RGB with 2-bit alpha, packed
    Rgb10A2,
    /// Planar YUV 4:4:4 (produced by GPU-side color conversion)
    Yuv444p,
    /// Backbuffer format the capture side could not identify
    Unknown,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 | PixelFormat::Rgb10A2 => Some(4),
            PixelFormat::Yuv444p | PixelFormat::Unknown => None,
        }
    }

    /// Number of image planes carried per frame
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Yuv444p => 3,
            _ => 1,
        }
    }
}

/// Audio sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Interleaved 32-bit float
    F32,
}

/// Capture parameters fixed for the lifetime of one recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Target frames per second
    pub fps: u32,
    /// Downscale divider applied before readback (1, 2 or 4)
    pub size_divider: u32,
    /// Ask the backend to convert to YUV 4:4:4 on the GPU
    pub gpu_color_conv: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fps: 60,
            size_divider: 1,
            gpu_color_conv: false,
        }
    }
}

impl CaptureSettings {
    /// Frame interval in microseconds
    pub fn interval_us(&self) -> i64 {
        if self.fps == 0 {
            0
        } else {
            1_000_000 / self.fps as i64
        }
    }
}

/// Geometry and layout of the video frames in the shared ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format of every frame in the session
    pub pixel_format: PixelFormat,
    /// Rows are stored bottom-up (GL readback order)
    pub vflip: bool,
    /// Bytes per row; may exceed width * bytes-per-pixel due to alignment
    pub pitch: u32,
}

impl VideoFormat {
    /// Size in bytes of one frame slot
    pub fn frame_size(&self) -> usize {
        match self.pixel_format {
            // Three full-resolution planes, each `pitch` wide
            PixelFormat::Yuv444p => self.pitch as usize * self.height as usize * 3,
            _ => self.pitch as usize * self.height as usize,
        }
    }
}

/// Audio stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Channel count (interleaved)
    pub channels: u32,
    /// Sample format
    pub format: SampleFormat,
    /// Sample rate in Hz
    pub rate: u32,
}

impl AudioFormat {
    /// Samples per audio frame (one sample per channel)
    pub fn samples_per_frame(&self) -> usize {
        self.channels as usize
    }
}

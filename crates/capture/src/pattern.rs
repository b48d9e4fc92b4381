//! CPU test-pattern backend
//!
//! Renders a scrolling synthetic image instead of reading a real
//! backbuffer. This is the capture path for hosts without a GPU surface
//! and the workhorse of the integration tests; unlike the GPU backends
//! it honors `size_divider` and `gpu_color_conv` directly.

use tracing::debug;

use pipe_protocol::{PixelFormat, VideoFormat};

use crate::{BackendKind, CaptureResult, CaptureSink, GraphicsBackend};

pub struct PatternBackend {
    width: u32,
    height: u32,
    frame_index: u64,
    buf: Vec<u8>,
    format: Option<VideoFormat>,
}

impl PatternBackend {
    /// A pattern source with the given base size; the actual session size
    /// shrinks by the configured `size_divider`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(2),
            height: height.max(2),
            frame_index: 0,
            buf: Vec::new(),
            format: None,
        }
    }

    fn session_format(&self, sink: &CaptureSink) -> VideoFormat {
        let settings = sink.state().settings();
        let divider = settings.size_divider.max(1);
        let mut width = self.width / divider;
        let mut height = self.height / divider;
        width += width % 2;
        height += height % 2;

        let pixel_format = if settings.gpu_color_conv {
            PixelFormat::Yuv444p
        } else {
            PixelFormat::Bgra8
        };
        let pitch = match pixel_format {
            // One byte per sample per plane
            PixelFormat::Yuv444p => width,
            _ => width * 4,
        };

        VideoFormat {
            width,
            height,
            pixel_format,
            vflip: false,
            pitch,
        }
    }

    fn render(&mut self) {
        let format = match self.format {
            Some(format) => format,
            None => return,
        };
        let (w, h, pitch) = (
            format.width as usize,
            format.height as usize,
            format.pitch as usize,
        );
        let shift = (self.frame_index * 2) as usize;

        match format.pixel_format {
            PixelFormat::Yuv444p => {
                let plane = pitch * h;
                for y in 0..h {
                    for x in 0..w {
                        let o = y * pitch + x;
                        self.buf[o] = ((x + y + shift) & 0xFF) as u8;
                        self.buf[plane + o] = ((x + shift / 2) & 0xFF) as u8;
                        self.buf[2 * plane + o] = ((y + shift / 3) & 0xFF) as u8;
                    }
                }
            }
            _ => {
                for y in 0..h {
                    for x in 0..w {
                        let o = y * pitch + x * 4;
                        self.buf[o] = ((x + shift) & 0xFF) as u8;
                        self.buf[o + 1] = ((y + shift) & 0xFF) as u8;
                        self.buf[o + 2] = ((x ^ y) & 0xFF) as u8;
                        self.buf[o + 3] = 0xFF;
                    }
                }
            }
        }
    }
}

impl GraphicsBackend for PatternBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Pattern
    }

    fn present(&mut self, sink: &mut CaptureSink) -> CaptureResult<()> {
        sink.state().saw_backend(BackendKind::Pattern);

        if !sink.state().ready() {
            if !sink.state().active() && self.format.is_some() {
                self.free();
                sink.end_video();
            }
            return Ok(());
        }

        if self.format.is_none() {
            let format = self.session_format(sink);
            self.buf = vec![0; format.frame_size()];
            self.format = Some(format);
            sink.begin_video(format)?;
        }

        let timestamp = sink.state().frame_timestamp();
        self.render();
        sink.write_frame(timestamp, &self.buf)?;
        self.frame_index += 1;
        Ok(())
    }

    fn free(&mut self) {
        self.format = None;
        self.buf = Vec::new();
        debug!(frames = self.frame_index, "pattern backend reset");
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::CaptureState;
    use pipe_protocol::{CaptureSettings, Message};
    use shm_transport::Channel;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;

    fn harness(settings: CaptureSettings) -> (CaptureSink, Channel, Arc<CaptureState>) {
        let (a, b) = UnixStream::pair().unwrap();
        let channel = Arc::new(Channel::from_stream(a).unwrap());
        let rx = Channel::from_stream(b).unwrap();
        let state = Arc::new(CaptureState::new());
        state.try_start(settings);
        (CaptureSink::new(state.clone(), channel), rx, state)
    }

    fn unpaced() -> CaptureSettings {
        CaptureSettings {
            fps: 0,
            size_divider: 1,
            gpu_color_conv: false,
        }
    }

    #[test]
    fn test_produces_bgra_frames_every_present() {
        let (mut sink, rx, _state) = harness(unpaced());
        let mut backend = PatternBackend::new(64, 48);

        backend.present(&mut sink).unwrap(); // pacing latch
        for _ in 0..3 {
            backend.present(&mut sink).unwrap();
        }

        match rx.recv().unwrap().unwrap() {
            Message::VideoSetup(setup) => {
                assert_eq!((setup.width, setup.height), (64, 48));
                assert_eq!(setup.pixel_format, PixelFormat::Bgra8);
                assert!(!setup.vflip);
                assert_eq!(setup.linesizes[0], 64 * 4);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // CPU frames commit immediately, no pipeline warmup
        for expected in 0..3u32 {
            match rx.recv().unwrap().unwrap() {
                Message::VideoFrameCommitted { index, .. } => assert_eq!(index, expected),
                other => panic!("unexpected message: {:?}", other),
            }
            sink.release_slot(expected);
        }
    }

    #[test]
    fn test_divider_and_color_conversion_shape_the_session() {
        let (mut sink, rx, _state) = harness(CaptureSettings {
            fps: 0,
            size_divider: 2,
            gpu_color_conv: true,
        });
        let mut backend = PatternBackend::new(640, 360);

        backend.present(&mut sink).unwrap();
        backend.present(&mut sink).unwrap();

        match rx.recv().unwrap().unwrap() {
            Message::VideoSetup(setup) => {
                assert_eq!((setup.width, setup.height), (320, 180));
                assert_eq!(setup.pixel_format, PixelFormat::Yuv444p);
                // Three planes, one byte per sample
                assert_eq!(setup.linesizes[0], 320);
                assert_eq!(setup.offsets[1], 320 * 180);
                assert_eq!(setup.offsets[2], 2 * 320 * 180);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_stop_tears_down_the_session() {
        let (mut sink, rx, state) = harness(unpaced());
        let mut backend = PatternBackend::new(8, 8);

        backend.present(&mut sink).unwrap();
        backend.present(&mut sink).unwrap();
        assert!(sink.video_started());
        rx.recv().unwrap();

        state.try_stop();
        backend.present(&mut sink).unwrap();
        assert!(!sink.video_started());
        assert!(backend.format.is_none());
    }
}

use std::path::PathBuf;

use encoder::{
    EncoderParams, OutputPixFmt, DEFAULT_CRF, DEFAULT_GOP_SIZE, DEFAULT_MAX_B_FRAMES,
    DEFAULT_X264_PRESET,
};
use pipe_protocol::CaptureSettings;

/// Frames buffered per session when the configured count is zero.
pub const DEFAULT_BUFFERED_FRAMES: usize = 60;

/// Everything the recorder needs to know up front: where recordings go,
/// how the capture runs, and how the encoder is tuned.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Directory recordings are written into.
    pub dir: PathBuf,
    /// Requested capture rate, frames per second.
    pub fps: u32,
    /// Downscale divider applied by the capture side.
    pub size_divider: u32,
    /// Ask the capture side to color-convert on the GPU.
    pub gpu_color_conv: bool,
    /// Drop the audio track even when the producer offers one.
    pub no_audio: bool,
    /// Private frame slots per session. Zero means [`DEFAULT_BUFFERED_FRAMES`].
    pub buffered_frames: usize,
    pub pix_fmt: OutputPixFmt,
    pub crf: u32,
    pub x264_preset: String,
    pub gop_size: u32,
    pub max_b_frames: u32,
    pub threads: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            fps: 60,
            size_divider: 1,
            gpu_color_conv: false,
            no_audio: false,
            buffered_frames: DEFAULT_BUFFERED_FRAMES,
            pix_fmt: OutputPixFmt::default(),
            crf: DEFAULT_CRF,
            x264_preset: DEFAULT_X264_PRESET.to_string(),
            gop_size: DEFAULT_GOP_SIZE,
            max_b_frames: DEFAULT_MAX_B_FRAMES,
            threads: 1,
        }
    }
}

impl RecorderConfig {
    /// Settings sent to the capture side on `CaptureStart`.
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            fps: self.fps,
            size_divider: self.size_divider,
            gpu_color_conv: self.gpu_color_conv,
        }
    }

    /// Encoder tuning for a session writing to `output`.
    pub fn encoder_params(&self, output: PathBuf) -> EncoderParams {
        EncoderParams {
            output,
            pix_fmt: self.pix_fmt,
            crf: self.crf,
            x264_preset: self.x264_preset.clone(),
            gop_size: self.gop_size,
            max_b_frames: self.max_b_frames,
            threads: self.threads,
        }
    }

    /// Buffered frame count with the zero default applied.
    pub fn effective_buffered_frames(&self) -> usize {
        if self.buffered_frames == 0 {
            DEFAULT_BUFFERED_FRAMES
        } else {
            self.buffered_frames
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_settings_mirror_config() {
        let config = RecorderConfig {
            fps: 30,
            size_divider: 2,
            gpu_color_conv: true,
            ..Default::default()
        };
        let settings = config.capture_settings();
        assert_eq!(settings.fps, 30);
        assert_eq!(settings.size_divider, 2);
        assert!(settings.gpu_color_conv);
    }

    #[test]
    fn test_zero_buffered_frames_falls_back() {
        let config = RecorderConfig {
            buffered_frames: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_buffered_frames(), DEFAULT_BUFFERED_FRAMES);
        let config = RecorderConfig {
            buffered_frames: 8,
            ..Default::default()
        };
        assert_eq!(config.effective_buffered_frames(), 8);
    }

    #[test]
    fn test_encoder_params_carry_tuning() {
        let config = RecorderConfig {
            crf: 24,
            threads: 4,
            ..Default::default()
        };
        let params = config.encoder_params(PathBuf::from("out.mp4"));
        assert_eq!(params.output, PathBuf::from("out.mp4"));
        assert_eq!(params.crf, 24);
        assert_eq!(params.threads, 4);
    }
}

//! H.264/AAC encoding into an MP4 container
//!
//! Frames arrive as raw pixels in capture order with microsecond
//! timestamps; audio arrives as interleaved f32 samples. Video drives the
//! clock: after every encoded frame the audio lane is topped up until its
//! presentation time passes the video's.

use std::path::PathBuf;

use ffmpeg_next as ffmpeg;

use ffmpeg::{
    codec::{self, threading},
    encoder,
    format::{self, context::Output, Pixel},
    frame,
    software::scaling,
    ChannelLayout, Dictionary, Packet, Rational,
};
use libc::EAGAIN;
use pipe_protocol::{AudioFormat, PixelFormat, VideoFormat};
use tracing::{debug, warn};

use crate::{AudioSource, EncoderError, EncoderResult, FramePull, FrameSource};

/// Constant-quality default; qmin and qmax are both pinned to it
pub const DEFAULT_CRF: u32 = 20;
/// Keyframe interval in frames
pub const DEFAULT_GOP_SIZE: u32 = 120;
pub const DEFAULT_MAX_B_FRAMES: u32 = 16;
/// Cheapest x264 preset; encoding shares the machine with the game
pub const DEFAULT_X264_PRESET: &str = "ultrafast";

const AUDIO_BIT_RATE: usize = 128_000;
const MAX_ENCODER_THREADS: u32 = 32;

/// Video frames carry microsecond timestamps
const VIDEO_TIME_BASE: Rational = Rational(1, 1_000_000);

/// Chroma layout of the encoded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputPixFmt {
    /// Chroma subsampled, plays everywhere
    #[default]
    Yuv420p,
    /// Full chroma, larger files and no baseline profile
    Yuv444p,
}

impl OutputPixFmt {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "yuv420p" => Some(OutputPixFmt::Yuv420p),
            "yuv444p" => Some(OutputPixFmt::Yuv444p),
            _ => None,
        }
    }

    fn as_pixel(self) -> Pixel {
        match self {
            OutputPixFmt::Yuv420p => Pixel::YUV420P,
            OutputPixFmt::Yuv444p => Pixel::YUV444P,
        }
    }
}

/// Everything the encoder needs besides the streams themselves
#[derive(Debug, Clone)]
pub struct EncoderParams {
    /// Output file path; the container is always MP4
    pub output: PathBuf,
    pub pix_fmt: OutputPixFmt,
    /// Quality pin, 0-51; values above 51 fall back to the default
    pub crf: u32,
    pub x264_preset: String,
    pub gop_size: u32,
    pub max_b_frames: u32,
    /// Frame-threading count; 0 and anything above 32 mean one thread
    pub threads: u32,
}

impl Default for EncoderParams {
    fn default() -> Self {
        Self {
            output: PathBuf::from("kinescope.mp4"),
            pix_fmt: OutputPixFmt::default(),
            crf: DEFAULT_CRF,
            x264_preset: DEFAULT_X264_PRESET.to_string(),
            gop_size: DEFAULT_GOP_SIZE,
            max_b_frames: DEFAULT_MAX_B_FRAMES,
            threads: 1,
        }
    }
}

/// Muxes one video stream and an optional audio stream into an MP4 file
#[derive(Debug)]
pub struct Mp4Encoder {
    params: EncoderParams,
}

impl Mp4Encoder {
    pub fn new(params: EncoderParams) -> Self {
        Self { params }
    }

    /// Run the encode loop until the video source reports end of stream.
    ///
    /// Timestamps are rebased so the first frame lands at pts 0. The audio
    /// lane is kept just ahead of the video clock; an audio underrun skips
    /// the top-up until the next video frame rather than stalling.
    pub fn encode(
        self,
        video: &mut dyn FrameSource,
        mut audio: Option<&mut dyn AudioSource>,
    ) -> EncoderResult<()> {
        ffmpeg::init()?;

        let vfmt = video.video_format();
        let afmt = audio.as_ref().map(|source| source.audio_format());

        let mut octx = format::output_as(&self.params.output, "mp4")?;
        let global_header = octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let mut vlane = VideoLane::open(&self.params, vfmt, &mut octx, global_header)?;
        let mut alane = match afmt {
            Some(afmt) => Some(AudioLane::open(afmt, &mut octx, global_header)?),
            None => None,
        };

        octx.write_header()?;
        // The muxer is free to pick its own time bases while writing the
        // header; packets must be rescaled into whatever it chose.
        if let Some(stream) = octx.stream(vlane.stream) {
            vlane.stream_time_base = stream.time_base();
        }
        if let Some(lane) = alane.as_mut() {
            if let Some(stream) = octx.stream(lane.stream) {
                lane.stream_time_base = stream.time_base();
            }
        }

        let mut buffer = vec![0u8; vfmt.frame_size()];
        let mut first_timestamp: Option<i64> = None;
        let mut last_pts = 0i64;

        loop {
            match video.next_frame(&mut buffer)? {
                FramePull::Frame { timestamp } => {
                    let first = *first_timestamp.get_or_insert(timestamp);
                    let pts = timestamp - first;
                    vlane.encode_frame(&mut octx, &buffer, pts)?;
                    last_pts = pts;
                    if let (Some(lane), Some(source)) = (alane.as_mut(), audio.as_deref_mut()) {
                        lane.interleave(&mut octx, source, pts)?;
                    }
                }
                FramePull::Eos => break,
            }
        }

        // Let the audio catch up to the final video frame before flushing
        if let (Some(lane), Some(source)) = (alane.as_mut(), audio.as_deref_mut()) {
            lane.interleave(&mut octx, source, last_pts)?;
        }

        vlane.flush(&mut octx)?;
        if let Some(lane) = alane.as_mut() {
            lane.flush(&mut octx)?;
        }
        octx.write_trailer()?;
        Ok(())
    }
}

/// Pixel-format conversion state for packed sources
struct Convert {
    scaler: scaling::Context,
    /// Staging frame at source geometry; never sent to the encoder
    src: frame::Video,
}

struct VideoLane {
    encoder: encoder::Video,
    stream: usize,
    stream_time_base: Rational,
    vfmt: VideoFormat,
    width: u32,
    height: u32,
    /// None when YUV 4:4:4 input goes straight through
    convert: Option<Convert>,
}

impl VideoLane {
    fn open(
        params: &EncoderParams,
        vfmt: VideoFormat,
        octx: &mut Output,
        global_header: bool,
    ) -> EncoderResult<Self> {
        let src_pixel = source_pixel(vfmt.pixel_format)?;
        let passthrough = vfmt.pixel_format == PixelFormat::Yuv444p;
        let out_pixel = if passthrough {
            // GPU-converted frames already carry the final chroma layout
            if params.pix_fmt != OutputPixFmt::Yuv444p {
                debug!("input is yuv444, ignoring the requested output pixel format");
            }
            Pixel::YUV444P
        } else {
            params.pix_fmt.as_pixel()
        };
        let width = even_ceil(vfmt.width);
        let height = even_ceil(vfmt.height);

        let codec =
            encoder::find(codec::Id::H264).ok_or(EncoderError::MissingCodec("h264"))?;
        let mut ost = octx.add_stream(codec)?;
        let stream = ost.index();

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(out_pixel);
        video.set_time_base(VIDEO_TIME_BASE);
        video.set_gop(params.gop_size);
        video.set_max_b_frames(params.max_b_frames as usize);
        if global_header {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let threads = effective_threads(params.threads);
        if threads > 1 {
            video.set_threading(threading::Config {
                kind: threading::Type::Frame,
                count: threads as usize,
                ..Default::default()
            });
        }

        let crf = effective_crf(params.crf);
        let mut opts = Dictionary::new();
        opts.set("preset", &params.x264_preset);
        opts.set("qmin", &crf.to_string());
        opts.set("qmax", &crf.to_string());
        if out_pixel == Pixel::YUV444P {
            warn!("yuv444 output rules out the baseline profile, expect more cpu");
        } else {
            opts.set("profile", "baseline");
        }

        ost.set_time_base(VIDEO_TIME_BASE);
        let opened = video.open_with(opts)?;
        ost.set_parameters(&opened);

        let convert = if passthrough {
            None
        } else {
            let scaler = scaling::Context::get(
                src_pixel,
                vfmt.width,
                vfmt.height,
                out_pixel,
                width,
                height,
                scaling::Flags::BILINEAR,
            )?;
            let src = frame::Video::new(src_pixel, vfmt.width, vfmt.height);
            Some(Convert { scaler, src })
        };

        Ok(Self {
            encoder: opened,
            stream,
            stream_time_base: VIDEO_TIME_BASE,
            vfmt,
            width,
            height,
            convert,
        })
    }

    fn encode_frame(&mut self, octx: &mut Output, data: &[u8], pts: i64) -> EncoderResult<()> {
        let mut out = match self.convert.as_mut() {
            Some(convert) => {
                stage_planes(&mut convert.src, data, &self.vfmt);
                let mut scaled = frame::Video::empty();
                convert.scaler.run(&convert.src, &mut scaled)?;
                scaled
            }
            None => {
                let mut out = frame::Video::new(Pixel::YUV444P, self.width, self.height);
                stage_planes(&mut out, data, &self.vfmt);
                out
            }
        };
        out.set_pts(Some(pts));
        self.encoder.send_frame(&out)?;
        self.drain(octx)
    }

    fn drain(&mut self, octx: &mut Output) -> EncoderResult<()> {
        let mut packet = Packet::empty();
        loop {
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(self.stream);
                    packet.rescale_ts(VIDEO_TIME_BASE, self.stream_time_base);
                    packet.write_interleaved(octx)?;
                }
                Err(ffmpeg::Error::Other { errno: EAGAIN }) | Err(ffmpeg::Error::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn flush(&mut self, octx: &mut Output) -> EncoderResult<()> {
        self.encoder.send_eof()?;
        self.drain(octx)
    }
}

struct AudioLane {
    encoder: encoder::Audio,
    stream: usize,
    stream_time_base: Rational,
    rate: u32,
    channels: usize,
    /// Samples per encoded frame, fixed by the codec (1024 for AAC)
    frame_size: usize,
    sample_format: format::Sample,
    /// Planar staging; partial fills persist across underruns
    left: Vec<f32>,
    right: Vec<f32>,
    next_pts: i64,
    /// Pts of the last frame handed to the codec, in samples
    last_pts: i64,
}

impl AudioLane {
    fn open(afmt: AudioFormat, octx: &mut Output, global_header: bool) -> EncoderResult<Self> {
        let codec = encoder::find(codec::Id::AAC).ok_or(EncoderError::MissingCodec("aac"))?;
        let mut ost = octx.add_stream(codec)?;
        let stream = ost.index();

        let sample_format = format::Sample::F32(format::sample::Type::Planar);
        let time_base = Rational(1, afmt.rate as i32);

        let mut audio = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()?;
        audio.set_rate(afmt.rate as i32);
        audio.set_channel_layout(ChannelLayout::STEREO);
        audio.set_format(sample_format);
        audio.set_bit_rate(AUDIO_BIT_RATE);
        audio.set_time_base(time_base);
        if global_header {
            audio.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        ost.set_time_base(time_base);
        let opened = audio.open_as(codec)?;
        ost.set_parameters(&opened);

        let frame_size = match opened.frame_size() {
            0 => 1024,
            n => n as usize,
        };

        Ok(Self {
            encoder: opened,
            stream,
            stream_time_base: time_base,
            rate: afmt.rate,
            channels: afmt.channels as usize,
            frame_size,
            sample_format,
            left: Vec::with_capacity(frame_size),
            right: Vec::with_capacity(frame_size),
            next_pts: 0,
            last_pts: i64::MIN,
        })
    }

    /// Feed audio frames until the last one sent sits past `video_pts`
    fn interleave(
        &mut self,
        octx: &mut Output,
        source: &mut dyn AudioSource,
        video_pts: i64,
    ) -> EncoderResult<()> {
        while audio_due(video_pts, self.last_pts, self.rate) {
            while self.left.len() < self.frame_size {
                let want = self.frame_size - self.left.len();
                let samples = source.next_frames(want)?;
                if samples.is_empty() {
                    // Underrun; whatever is staged waits for the next video frame
                    return Ok(());
                }
                for sample_frame in samples.chunks_exact(self.channels) {
                    self.left.push(sample_frame[0]);
                    self.right.push(sample_frame[self.channels.min(2) - 1]);
                }
            }
            self.send_staged(octx)?;
        }
        Ok(())
    }

    fn send_staged(&mut self, octx: &mut Output) -> EncoderResult<()> {
        let mut out = frame::Audio::new(self.sample_format, self.frame_size, ChannelLayout::STEREO);
        out.set_rate(self.rate);
        out.plane_mut::<f32>(0).copy_from_slice(&self.left);
        out.plane_mut::<f32>(1).copy_from_slice(&self.right);
        out.set_pts(Some(self.next_pts));
        self.last_pts = self.next_pts;
        self.next_pts += self.frame_size as i64;
        self.left.clear();
        self.right.clear();
        self.encoder.send_frame(&out)?;
        self.drain(octx)
    }

    fn drain(&mut self, octx: &mut Output) -> EncoderResult<()> {
        let mut packet = Packet::empty();
        loop {
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(self.stream);
                    packet.rescale_ts(Rational(1, self.rate as i32), self.stream_time_base);
                    packet.write_interleaved(octx)?;
                }
                Err(ffmpeg::Error::Other { errno: EAGAIN }) | Err(ffmpeg::Error::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn flush(&mut self, octx: &mut Output) -> EncoderResult<()> {
        self.encoder.send_eof()?;
        self.drain(octx)
    }
}

/// True while the audio stream trails the video clock.
///
/// Compares `video_pts` in microseconds against `audio_pts` in samples
/// without losing precision.
fn audio_due(video_pts: i64, audio_pts: i64, rate: u32) -> bool {
    i128::from(video_pts) * i128::from(rate) >= i128::from(audio_pts) * 1_000_000
}

fn source_pixel(pixel_format: PixelFormat) -> EncoderResult<Pixel> {
    match pixel_format {
        PixelFormat::Rgba8 => Ok(Pixel::RGBA),
        PixelFormat::Bgra8 => Ok(Pixel::BGRA),
        PixelFormat::Rgb10A2 => {
            // Fed through as packed 32-bit; hues shift but geometry holds
            warn!("10-bit backbuffer encoded as 8-bit rgba, expect color drift");
            Ok(Pixel::RGBA)
        }
        PixelFormat::Yuv444p => Ok(Pixel::YUV444P),
        PixelFormat::Unknown => Err(EncoderError::UnsupportedPixelFormat(pixel_format)),
    }
}

/// Copy a raw captured frame into an ffmpeg frame, one plane at a time,
/// honoring both pitches and flipping rows when the source is bottom-up.
fn stage_planes(frame: &mut frame::Video, data: &[u8], vfmt: &VideoFormat) {
    let pitch = vfmt.pitch as usize;
    let rows = vfmt.height as usize;
    for plane in 0..vfmt.pixel_format.plane_count() {
        let stride = frame.stride(plane);
        let row_bytes = pitch.min(stride);
        let base = plane * pitch * rows;
        let dst = frame.data_mut(plane);
        for row in 0..rows {
            let src_row = if vfmt.vflip { rows - 1 - row } else { row };
            let src = &data[base + src_row * pitch..base + src_row * pitch + row_bytes];
            dst[row * stride..row * stride + row_bytes].copy_from_slice(src);
        }
    }
}

/// x264 wants even dimensions; round up so no pixel column is lost
fn even_ceil(v: u32) -> u32 {
    (v + 1) & !1
}

fn effective_crf(crf: u32) -> u32 {
    if crf > 51 {
        warn!(crf, default = DEFAULT_CRF, "crf must be 0-51, using the default");
        return DEFAULT_CRF;
    }
    if !(18..=28).contains(&crf) {
        warn!(crf, "crf outside the usual 18-28 range");
    }
    crf
}

fn effective_threads(threads: u32) -> u32 {
    if threads == 0 || threads > MAX_ENCODER_THREADS {
        warn!(threads, "thread count out of range, encoding on one thread");
        return 1;
    }
    threads
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::media;
    use pipe_protocol::SampleFormat;

    struct GradientSource {
        format: VideoFormat,
        frames: usize,
        sent: usize,
    }

    impl GradientSource {
        fn new(format: VideoFormat, frames: usize) -> Self {
            Self {
                format,
                frames,
                sent: 0,
            }
        }
    }

    impl FrameSource for GradientSource {
        fn video_format(&self) -> VideoFormat {
            self.format
        }

        fn next_frame(&mut self, buffer: &mut [u8]) -> EncoderResult<FramePull> {
            if self.sent == self.frames {
                return Ok(FramePull::Eos);
            }
            let pitch = self.format.pitch as usize;
            for y in 0..self.format.height as usize {
                for x in 0..self.format.width as usize {
                    let px = y * pitch + x * 4;
                    buffer[px] = (x * 3 + self.sent * 5) as u8;
                    buffer[px + 1] = (y * 4) as u8;
                    buffer[px + 2] = 0x40;
                    buffer[px + 3] = 0xff;
                }
            }
            // Session clocks rarely start at zero
            let timestamp = 1_000 + self.sent as i64 * 33_333;
            self.sent += 1;
            Ok(FramePull::Frame { timestamp })
        }
    }

    struct PlanarSource {
        format: VideoFormat,
        frames: usize,
        sent: usize,
    }

    impl FrameSource for PlanarSource {
        fn video_format(&self) -> VideoFormat {
            self.format
        }

        fn next_frame(&mut self, buffer: &mut [u8]) -> EncoderResult<FramePull> {
            if self.sent == self.frames {
                return Ok(FramePull::Eos);
            }
            let plane_size = self.format.pitch as usize * self.format.height as usize;
            buffer[..plane_size].fill(0x80);
            buffer[plane_size..2 * plane_size].fill(0x40 + self.sent as u8);
            buffer[2 * plane_size..].fill(0xc0);
            let timestamp = self.sent as i64 * 16_666;
            self.sent += 1;
            Ok(FramePull::Frame { timestamp })
        }
    }

    struct ToneSource {
        format: AudioFormat,
        buffer: Vec<f32>,
        position: usize,
        hiccup: bool,
        calls: usize,
    }

    impl ToneSource {
        fn new(rate: u32, hiccup: bool) -> Self {
            Self {
                format: AudioFormat {
                    channels: 2,
                    format: SampleFormat::F32,
                    rate,
                },
                buffer: Vec::new(),
                position: 0,
                hiccup,
                calls: 0,
            }
        }
    }

    impl AudioSource for ToneSource {
        fn audio_format(&self) -> AudioFormat {
            self.format
        }

        fn next_frames(&mut self, max_frames: usize) -> EncoderResult<&[f32]> {
            self.calls += 1;
            self.buffer.clear();
            if self.hiccup && self.calls % 5 == 0 {
                return Ok(&self.buffer);
            }
            let frames = max_frames.min(256);
            for i in 0..frames {
                let t = (self.position + i) as f32 / self.format.rate as f32;
                let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 0.2;
                self.buffer.push(sample);
                self.buffer.push(sample);
            }
            self.position += frames;
            Ok(&self.buffer)
        }
    }

    fn bgra_format(width: u32, height: u32, vflip: bool) -> VideoFormat {
        VideoFormat {
            width,
            height,
            pixel_format: PixelFormat::Bgra8,
            vflip,
            pitch: width * 4,
        }
    }

    fn temp_output(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{name}_{}.mp4", std::process::id()))
    }

    fn stream_count(path: &PathBuf) -> (usize, bool) {
        let ictx = format::input(path).unwrap();
        let has_video = ictx.streams().best(media::Type::Video).is_some();
        (ictx.streams().count(), has_video)
    }

    #[test]
    fn test_encodes_flipped_bgra_frames() {
        let path = temp_output("test_video_only");
        let mut source = GradientSource::new(bgra_format(64, 48, true), 16);

        let encoder = Mp4Encoder::new(EncoderParams {
            output: path.clone(),
            ..Default::default()
        });
        encoder.encode(&mut source, None).unwrap();

        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        let (streams, has_video) = stream_count(&path);
        assert_eq!(streams, 1);
        assert!(has_video);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_rounds_odd_dimensions_up() {
        let path = temp_output("test_odd_dims");
        // 63x47 must encode as 64x48
        let mut source = GradientSource::new(bgra_format(63, 47, false), 4);

        let encoder = Mp4Encoder::new(EncoderParams {
            output: path.clone(),
            ..Default::default()
        });
        encoder.encode(&mut source, None).unwrap();

        let ictx = format::input(&path).unwrap();
        let stream = ictx.streams().best(media::Type::Video).unwrap();
        let params = codec::context::Context::from_parameters(stream.parameters())
            .unwrap()
            .decoder()
            .video()
            .unwrap();
        assert_eq!(params.width(), 64);
        assert_eq!(params.height(), 48);
        drop(ictx);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_yuv444_input_goes_through_unconverted() {
        let path = temp_output("test_yuv444");
        let mut source = PlanarSource {
            format: VideoFormat {
                width: 32,
                height: 32,
                pixel_format: PixelFormat::Yuv444p,
                vflip: false,
                pitch: 32,
            },
            frames: 8,
            sent: 0,
        };

        let encoder = Mp4Encoder::new(EncoderParams {
            output: path.clone(),
            // The request is ignored for planar input
            pix_fmt: OutputPixFmt::Yuv420p,
            ..Default::default()
        });
        encoder.encode(&mut source, None).unwrap();

        let (streams, has_video) = stream_count(&path);
        assert_eq!(streams, 1);
        assert!(has_video);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_muxes_audio_alongside_video() {
        let path = temp_output("test_with_audio");
        let mut video = GradientSource::new(bgra_format(64, 48, false), 30);
        let mut audio = ToneSource::new(44_100, false);

        let encoder = Mp4Encoder::new(EncoderParams {
            output: path.clone(),
            ..Default::default()
        });
        encoder
            .encode(&mut video, Some(&mut audio))
            .unwrap();

        let (streams, has_video) = stream_count(&path);
        assert_eq!(streams, 2);
        assert!(has_video);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_survives_audio_underruns() {
        let path = temp_output("test_underrun");
        let mut video = GradientSource::new(bgra_format(64, 48, false), 30);
        let mut audio = ToneSource::new(44_100, true);

        let encoder = Mp4Encoder::new(EncoderParams {
            output: path.clone(),
            ..Default::default()
        });
        encoder
            .encode(&mut video, Some(&mut audio))
            .unwrap();

        let (streams, _) = stream_count(&path);
        assert_eq!(streams, 2);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_audio_due_tracks_video_clock() {
        // Nothing sent yet: always due
        assert!(audio_due(0, i64::MIN, 48_000));
        // Equal presentation times still count as due
        assert!(audio_due(0, 0, 48_000));
        assert!(audio_due(1_000_000, 48_000, 48_000));
        // One sample ahead of a microsecond short of a second
        assert!(!audio_due(999_999, 48_000, 48_000));
        assert!(!audio_due(0, 1, 48_000));
    }

    #[test]
    fn test_effective_crf_ranges() {
        assert_eq!(effective_crf(23), 23);
        assert_eq!(effective_crf(0), 0);
        assert_eq!(effective_crf(10), 10);
        assert_eq!(effective_crf(60), DEFAULT_CRF);
    }

    #[test]
    fn test_effective_threads_bounds() {
        assert_eq!(effective_threads(0), 1);
        assert_eq!(effective_threads(1), 1);
        assert_eq!(effective_threads(8), 8);
        assert_eq!(effective_threads(64), 1);
    }

    #[test]
    fn test_even_ceil_rounds_up() {
        assert_eq!(even_ceil(640), 640);
        assert_eq!(even_ceil(641), 642);
        assert_eq!(even_ceil(1), 2);
    }

    #[test]
    fn test_pix_fmt_names() {
        assert_eq!(OutputPixFmt::from_name("yuv420p"), Some(OutputPixFmt::Yuv420p));
        assert_eq!(OutputPixFmt::from_name("yuv444p"), Some(OutputPixFmt::Yuv444p));
        assert_eq!(OutputPixFmt::from_name("rgb"), None);
    }

    #[test]
    fn test_unknown_pixel_format_is_rejected() {
        assert!(matches!(
            source_pixel(PixelFormat::Unknown),
            Err(EncoderError::UnsupportedPixelFormat(PixelFormat::Unknown))
        ));
    }

    #[test]
    fn test_vflip_reverses_rows() {
        let vfmt = bgra_format(4, 3, true);
        let mut data = vec![0u8; vfmt.frame_size()];
        // Tag every row with its index
        for row in 0..3 {
            data[row * 16..(row + 1) * 16].fill(row as u8);
        }
        let mut frame = frame::Video::new(Pixel::BGRA, 4, 3);
        stage_planes(&mut frame, &data, &vfmt);
        let stride = frame.stride(0);
        assert_eq!(frame.data(0)[0], 2);
        assert_eq!(frame.data(0)[stride], 1);
        assert_eq!(frame.data(0)[2 * stride], 0);
    }
}

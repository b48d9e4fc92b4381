//! Producer-side frame and audio writers
//!
//! `FrameWriter` owns the video slot region and its bookkeeping;
//! `AudioWriter` owns the circular sample region. Both announce
//! themselves over the control channel and emit commit messages as data
//! lands in shared memory. `CaptureSink` bundles what a backend needs
//! during a present call.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use pipe_protocol::{
    AudioFormat, AudioSetup, Message, ShmemInfo, VideoFormat, VideoSetup, MAX_PLANES,
};
use shm_transport::{unique_region_path, AudioRingLayout, Channel, FrameRing, SharedMemory};

use crate::{CaptureResult, CaptureState, NUM_FRAME_SLOTS};

/// Seconds of audio the shared ring can hold
pub const AUDIO_RING_SECONDS: usize = 4;

/// Writes captured frames into the shared slot region.
pub struct FrameWriter {
    format: VideoFormat,
    shmem: SharedMemory,
    ring: FrameRing,
    channel: Arc<Channel>,
}

impl FrameWriter {
    /// Create the slot region and announce the session.
    pub(crate) fn create(
        channel: Arc<Channel>,
        format: VideoFormat,
        audio: Option<AudioSetup>,
    ) -> CaptureResult<Self> {
        let slot_size = format.frame_size();
        let ring = FrameRing::new(NUM_FRAME_SLOTS, slot_size);

        let path = unique_region_path("video");
        let shmem = SharedMemory::create(&path, ring.byte_len())?;

        let mut offsets = [0u64; MAX_PLANES];
        let mut linesizes = [0u64; MAX_PLANES];
        let plane_size = format.pitch as u64 * format.height as u64;
        for plane in 0..format.pixel_format.plane_count() {
            offsets[plane] = plane as u64 * plane_size;
            linesizes[plane] = format.pitch as u64;
        }

        let setup = VideoSetup {
            width: format.width,
            height: format.height,
            pixel_format: format.pixel_format,
            vflip: format.vflip,
            offsets,
            linesizes,
            shmem: ShmemInfo {
                path: path.to_string_lossy().into_owned(),
                size: ring.byte_len() as u64,
            },
            audio,
        };
        channel.send(&Message::VideoSetup(setup))?;

        info!(
            width = format.width,
            height = format.height,
            pixel_format = ?format.pixel_format,
            pitch = format.pitch,
            "video session announced"
        );

        Ok(Self {
            format,
            shmem,
            ring,
            channel,
        })
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    /// Copy one frame into the next free slot and commit it.
    ///
    /// When every slot is still held by the consumer the frame is
    /// dropped; the ring counts the overrun.
    pub fn write_frame(&mut self, timestamp: i64, data: &[u8]) -> CaptureResult<()> {
        let Some(index) = self.ring.acquire() else {
            return Ok(());
        };

        let offset = self.ring.slot_offset(index);
        let len = data.len().min(self.ring.slot_size());
        self.shmem.as_mut_slice()[offset..offset + len].copy_from_slice(&data[..len]);
        self.ring.commit(index);

        self.channel.send(&Message::VideoFrameCommitted {
            index: index as u32,
            timestamp,
        })?;
        Ok(())
    }

    /// The consumer finished with a slot.
    pub fn release_slot(&self, index: u32) {
        self.ring.release(index as usize);
    }

    /// Frames dropped because no slot was free
    pub fn overrun_count(&self) -> u64 {
        self.ring.overrun_count()
    }
}

/// Consumer progress through the audio ring, fed by processed
/// acknowledgements on the control poll thread.
#[derive(Default)]
pub struct AudioProgress {
    processed_frame: AtomicI64,
}

impl AudioProgress {
    /// Consumer finished everything before `frame`.
    pub fn advance_to(&self, frame: i64) {
        self.processed_frame.fetch_max(frame, Ordering::Release);
    }

    pub fn processed(&self) -> i64 {
        self.processed_frame.load(Ordering::Acquire)
    }
}

/// Writes interleaved audio frames into the shared circular region.
pub struct AudioWriter {
    format: AudioFormat,
    layout: AudioRingLayout,
    shmem: SharedMemory,
    channel: Arc<Channel>,
    state: Arc<CaptureState>,
    progress: Arc<AudioProgress>,
    commit_frame: i64,
    dropping: bool,
}

impl AudioWriter {
    pub(crate) fn create(
        channel: Arc<Channel>,
        state: Arc<CaptureState>,
        format: AudioFormat,
    ) -> CaptureResult<(Self, AudioSetup)> {
        let layout = AudioRingLayout::with_duration(
            format.channels as usize,
            format.rate as usize,
            AUDIO_RING_SECONDS,
        );

        let path = unique_region_path("audio");
        let shmem = SharedMemory::create(&path, layout.byte_len())?;

        let setup = AudioSetup {
            format,
            shmem: ShmemInfo {
                path: path.to_string_lossy().into_owned(),
                size: layout.byte_len() as u64,
            },
        };

        info!(
            channels = format.channels,
            rate = format.rate,
            capacity_frames = layout.capacity_frames(),
            "audio ring created"
        );

        let writer = Self {
            format,
            layout,
            shmem,
            channel,
            state,
            progress: Arc::new(AudioProgress::default()),
            commit_frame: 0,
            dropping: false,
        };
        Ok((writer, setup))
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub(crate) fn progress(&self) -> Arc<AudioProgress> {
        self.progress.clone()
    }

    /// Append whole interleaved frames to the ring and commit them.
    ///
    /// Silently discards audio while capture is inactive; hosts keep
    /// their sound path running whether or not anyone records. Frames
    /// that would overwrite unprocessed audio are dropped whole.
    pub fn commit_frames(&mut self, samples: &[f32]) -> CaptureResult<()> {
        if !self.state.active() {
            // Nobody will acknowledge what is already in flight
            self.progress.advance_to(self.commit_frame);
            return Ok(());
        }

        let channels = self.format.channels as usize;
        let frames = (samples.len() / channels) as i64;
        if frames == 0 {
            return Ok(());
        }

        let capacity = self.layout.capacity_frames() as i64;
        let in_flight = self.commit_frame - self.progress.processed();
        if in_flight + frames > capacity {
            if !self.dropping {
                self.dropping = true;
                warn!(
                    committed = self.commit_frame,
                    in_flight, "audio ring full, dropping frames"
                );
            }
            return Ok(());
        }
        if self.dropping {
            self.dropping = false;
            info!("audio ring caught up, resuming");
        }

        self.layout
            .write(self.shmem.as_mut_slice(), self.commit_frame, samples)?;
        self.channel.send(&Message::AudioFramesCommitted {
            offset: self.commit_frame,
            frames,
        })?;
        self.commit_frame += frames;
        Ok(())
    }
}

/// Everything a backend touches while handling one present call.
pub struct CaptureSink {
    state: Arc<CaptureState>,
    channel: Arc<Channel>,
    video: Option<FrameWriter>,
    audio_setup: Option<AudioSetup>,
    audio_progress: Option<Arc<AudioProgress>>,
}

impl CaptureSink {
    pub(crate) fn new(state: Arc<CaptureState>, channel: Arc<Channel>) -> Self {
        Self {
            state,
            channel,
            video: None,
            audio_setup: None,
            audio_progress: None,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    /// True once the current session's format has been announced.
    pub fn video_started(&self) -> bool {
        self.video.is_some()
    }

    /// Announce the session format and create the slot region. A second
    /// call within one session is ignored.
    pub fn begin_video(&mut self, format: VideoFormat) -> CaptureResult<()> {
        if self.video.is_some() {
            return Ok(());
        }
        let writer = FrameWriter::create(self.channel.clone(), format, self.audio_setup.clone())?;
        self.video = Some(writer);
        Ok(())
    }

    /// Push one captured frame. Quietly ignored before `begin_video`.
    pub fn write_frame(&mut self, timestamp: i64, data: &[u8]) -> CaptureResult<()> {
        match self.video.as_mut() {
            Some(writer) => writer.write_frame(timestamp, data),
            None => Ok(()),
        }
    }

    /// Tear down the current video session.
    pub fn end_video(&mut self) {
        if let Some(writer) = self.video.take() {
            info!(
                frames_dropped = writer.overrun_count(),
                "video session ended"
            );
        }
    }

    pub(crate) fn set_audio(&mut self, setup: AudioSetup, progress: Arc<AudioProgress>) {
        self.audio_setup = Some(setup);
        self.audio_progress = Some(progress);
    }

    pub(crate) fn release_slot(&self, index: u32) {
        if let Some(writer) = self.video.as_ref() {
            writer.release_slot(index);
        }
    }

    pub(crate) fn audio_processed(&self, offset: i64, frames: i64) {
        if let Some(progress) = self.audio_progress.as_ref() {
            progress.advance_to(offset + frames);
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use pipe_protocol::{CaptureSettings, PixelFormat, SampleFormat};
    use std::os::unix::net::UnixStream;

    fn channel_pair() -> (Arc<Channel>, Channel) {
        let (a, b) = UnixStream::pair().unwrap();
        (
            Arc::new(Channel::from_stream(a).unwrap()),
            Channel::from_stream(b).unwrap(),
        )
    }

    fn small_format() -> VideoFormat {
        VideoFormat {
            width: 4,
            height: 2,
            pixel_format: PixelFormat::Bgra8,
            vflip: true,
            pitch: 16,
        }
    }

    #[test]
    fn test_create_announces_video_setup() {
        let (tx, rx) = channel_pair();
        let _writer = FrameWriter::create(tx, small_format(), None).unwrap();

        match rx.recv().unwrap().unwrap() {
            Message::VideoSetup(setup) => {
                assert_eq!(setup.width, 4);
                assert_eq!(setup.height, 2);
                assert_eq!(setup.pixel_format, PixelFormat::Bgra8);
                assert!(setup.vflip);
                assert_eq!(setup.offsets[0], 0);
                assert_eq!(setup.linesizes[0], 16);
                assert_eq!(setup.shmem.size, 16 * 2 * 3);
                assert!(setup.audio.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_write_frame_commits_and_stores_bytes() {
        let (tx, rx) = channel_pair();
        let mut writer = FrameWriter::create(tx, small_format(), None).unwrap();
        rx.recv().unwrap(); // setup

        let frame = vec![0xCDu8; 32];
        writer.write_frame(1234, &frame).unwrap();

        match rx.recv().unwrap().unwrap() {
            Message::VideoFrameCommitted { index, timestamp } => {
                assert_eq!(index, 0);
                assert_eq!(timestamp, 1234);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(&writer.shmem.as_slice()[..32], frame.as_slice());
    }

    #[test]
    fn test_full_ring_drops_until_release() {
        let (tx, rx) = channel_pair();
        let mut writer = FrameWriter::create(tx, small_format(), None).unwrap();
        rx.recv().unwrap(); // setup

        let frame = vec![0u8; 32];
        for _ in 0..NUM_FRAME_SLOTS {
            writer.write_frame(0, &frame).unwrap();
            rx.recv().unwrap();
        }

        // All slots committed: the next write vanishes
        writer.write_frame(0, &frame).unwrap();
        assert_eq!(writer.overrun_count(), 1);

        writer.release_slot(0);
        writer.write_frame(99, &frame).unwrap();
        match rx.recv().unwrap().unwrap() {
            Message::VideoFrameCommitted { index, timestamp } => {
                assert_eq!(index, 0);
                assert_eq!(timestamp, 99);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_yuv_planes_get_distinct_offsets() {
        let (tx, rx) = channel_pair();
        let format = VideoFormat {
            width: 4,
            height: 2,
            pixel_format: PixelFormat::Yuv444p,
            vflip: false,
            pitch: 4,
        };
        let _writer = FrameWriter::create(tx, format, None).unwrap();

        match rx.recv().unwrap().unwrap() {
            Message::VideoSetup(setup) => {
                assert_eq!(setup.offsets, [0, 8, 16, 0]);
                assert_eq!(setup.linesizes, [4, 4, 4, 0]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    fn tiny_audio() -> AudioFormat {
        AudioFormat {
            channels: 2,
            format: SampleFormat::F32,
            rate: 4, // 16-frame ring
        }
    }

    fn recording_state() -> Arc<CaptureState> {
        let state = Arc::new(CaptureState::new());
        state.try_start(CaptureSettings {
            fps: 0,
            size_divider: 1,
            gpu_color_conv: false,
        });
        state
    }

    #[test]
    fn test_audio_commits_advance_the_offset() {
        let (tx, rx) = channel_pair();
        let (mut writer, _setup) =
            AudioWriter::create(tx, recording_state(), tiny_audio()).unwrap();

        writer.commit_frames(&[0.0; 4]).unwrap(); // 2 frames
        writer.commit_frames(&[0.0; 6]).unwrap(); // 3 frames

        match rx.recv().unwrap().unwrap() {
            Message::AudioFramesCommitted { offset, frames } => {
                assert_eq!((offset, frames), (0, 2));
            }
            other => panic!("unexpected message: {:?}", other),
        }
        match rx.recv().unwrap().unwrap() {
            Message::AudioFramesCommitted { offset, frames } => {
                assert_eq!((offset, frames), (2, 3));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_audio_ring_full_drops_whole_commits() {
        let (tx, _rx) = channel_pair();
        let (mut writer, _setup) =
            AudioWriter::create(tx, recording_state(), tiny_audio()).unwrap();

        // Fill the 16-frame ring, then one more frame has nowhere to go
        writer.commit_frames(&[0.0; 32]).unwrap();
        assert_eq!(writer.commit_frame, 16);
        writer.commit_frames(&[0.0; 2]).unwrap();
        assert_eq!(writer.commit_frame, 16);

        // Consumer progress frees space
        writer.progress().advance_to(8);
        writer.commit_frames(&[0.0; 2]).unwrap();
        assert_eq!(writer.commit_frame, 17);
    }

    #[test]
    fn test_audio_discarded_while_capture_is_inactive() {
        let (tx, rx) = channel_pair();
        let state = Arc::new(CaptureState::new());
        let (mut writer, _setup) =
            AudioWriter::create(tx, state.clone(), tiny_audio()).unwrap();

        // Host streams before anyone records; nothing reaches the wire
        for _ in 0..40 {
            writer.commit_frames(&[0.0; 16]).unwrap();
        }
        assert_eq!(writer.commit_frame, 0);

        state.try_start(CaptureSettings {
            fps: 0,
            size_divider: 1,
            gpu_color_conv: false,
        });
        writer.commit_frames(&[0.0; 4]).unwrap();
        match rx.recv().unwrap().unwrap() {
            Message::AudioFramesCommitted { offset, frames } => {
                assert_eq!((offset, frames), (0, 2));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

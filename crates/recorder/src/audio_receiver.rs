//! Recorder-side audio sample buffering
//!
//! Mirrors the video receiver for the audio ring: committed frames are
//! copied out of the shared ring into a private one and acknowledged right
//! away, so the producer's ring space frees up independently of encoder
//! pace. When the private ring is full the newest commit is dropped whole,
//! like the video side drops frames.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pipe_protocol::{AudioFormat, Message};
use shm_transport::{AudioRingLayout, Channel, SharedMemory};
use tracing::{debug, info, warn};

use crate::{RecorderError, RecorderResult};

struct RingPositions {
    ring: Vec<u8>,
    scratch: Vec<f32>,
    /// Next wire offset expected from the producer
    wire: Option<i64>,
    /// Private ring write position, counts accepted frames
    committed: i64,
    /// Private ring read position
    sent: i64,
    dropping: bool,
}

/// Buffers committed audio between the control channel and the encoder.
pub struct AudioReceiver {
    channel: Arc<Channel>,
    shmem: SharedMemory,
    layout: AudioRingLayout,
    format: AudioFormat,
    inner: Mutex<RingPositions>,
    stopped: AtomicBool,
    overruns: AtomicU64,
}

impl AudioReceiver {
    pub fn new(
        channel: Arc<Channel>,
        shmem: SharedMemory,
        format: AudioFormat,
    ) -> RecorderResult<Self> {
        let probe = AudioRingLayout::new(format.channels as usize, 0);
        let capacity = if probe.bytes_per_frame() == 0 {
            0
        } else {
            shmem.len() / probe.bytes_per_frame()
        };
        if capacity == 0 {
            return Err(RecorderError::BadAudioRegion {
                region: shmem.len(),
                frame: probe.bytes_per_frame(),
            });
        }
        let layout = AudioRingLayout::new(format.channels as usize, capacity);

        info!(
            channels = format.channels,
            rate = format.rate,
            capacity_frames = capacity,
            "buffering audio frames"
        );

        Ok(Self {
            channel,
            shmem,
            layout,
            format,
            inner: Mutex::new(RingPositions {
                ring: vec![0u8; layout.byte_len()],
                scratch: Vec::new(),
                wire: None,
                committed: 0,
                sent: 0,
                dropping: false,
            }),
            stopped: AtomicBool::new(false),
            overruns: AtomicU64::new(0),
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Handles an `AudioFramesCommitted` notification.
    ///
    /// The frames are copied into the private ring (or dropped whole when
    /// it is full) and acknowledged either way. After `stop` the
    /// notification is ignored entirely.
    pub fn frames_committed(&self, offset: i64, frames: i64) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!(offset, "stopped, ignoring committed audio");
            return;
        }
        if frames > 0 {
            self.buffer_commit(offset, frames);
        }
        self.ack(offset, frames);
    }

    fn buffer_commit(&self, offset: i64, frames: i64) {
        let inner = &mut *self.inner.lock();

        // A well-behaved producer commits contiguously, so a gap means
        // control messages went missing. The frames that did arrive are
        // still good; log the gap and keep going.
        if let Some(expected) = inner.wire {
            if expected != offset {
                warn!(expected, got = offset, "gap in committed audio, skipping ahead");
            }
        }
        inner.wire = Some(offset + frames);

        let capacity = self.layout.capacity_frames() as i64;
        let pending = inner.committed - inner.sent;
        if pending + frames > capacity {
            self.overruns.fetch_add(frames as u64, Ordering::SeqCst);
            if !inner.dropping {
                inner.dropping = true;
                warn!(pending, frames, "audio buffer full, dropping frames");
            }
            return;
        }
        if inner.dropping {
            inner.dropping = false;
            info!("audio buffer caught up, resuming");
        }

        inner.scratch.clear();
        if let Err(err) = self.layout.read(
            self.shmem.as_slice(),
            offset,
            frames as usize,
            &mut inner.scratch,
        ) {
            warn!(offset, frames, "failed to read shared audio: {}", err);
            return;
        }
        if let Err(err) = self.layout.write(&mut inner.ring, inner.committed, &inner.scratch) {
            warn!(offset, frames, "failed to stage audio: {}", err);
            return;
        }
        inner.committed += frames;
    }

    /// Moves up to `max_frames` buffered frames into `out`, returning the
    /// frame count. One contiguous stretch of the ring per call; zero means
    /// the encoder caught up (or the producer went quiet).
    pub fn take_frames(&self, max_frames: usize, out: &mut Vec<f32>) -> usize {
        let inner = &mut *self.inner.lock();
        let pending = (inner.committed - inner.sent) as usize;
        if pending == 0 {
            return 0;
        }

        let capacity = self.layout.capacity_frames();
        let start = inner.sent.rem_euclid(capacity as i64) as usize;
        let take = pending.min(max_frames).min(capacity - start);

        if let Err(err) = self.layout.read(&inner.ring, inner.sent, take, out) {
            warn!(sent = inner.sent, take, "failed to read buffered audio: {}", err);
            return 0;
        }
        inner.sent += take as i64;
        take
    }

    /// Stops accepting new commits. Already-buffered frames still drain
    /// through `take_frames`.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::SeqCst)
    }

    fn ack(&self, offset: i64, frames: i64) {
        if let Err(err) = self
            .channel
            .send(&Message::AudioFramesProcessed { offset, frames })
        {
            warn!(offset, "failed to ack audio frames: {}", err);
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use pipe_protocol::SampleFormat;
    use shm_transport::unique_region_path;
    use std::os::unix::net::UnixStream;

    fn stereo_format() -> AudioFormat {
        AudioFormat {
            channels: 2,
            format: SampleFormat::F32,
            rate: 44_100,
        }
    }

    /// Receiver over a ring of `capacity` frames, plus the producer side of
    /// the channel and a writable view of the shared ring.
    fn fixture(capacity: usize) -> (Arc<AudioReceiver>, Channel, SharedMemory, AudioRingLayout) {
        let (a, b) = UnixStream::pair().unwrap();
        let recorder_side = Arc::new(Channel::from_stream(a).unwrap());
        let producer = Channel::from_stream(b).unwrap();

        let layout = AudioRingLayout::new(2, capacity);
        let path = unique_region_path("arx-ring");
        let shmem = SharedMemory::create(&path, layout.byte_len()).unwrap();
        let consumer_view = SharedMemory::open(&path, layout.byte_len()).unwrap();

        let receiver =
            Arc::new(AudioReceiver::new(recorder_side, consumer_view, stereo_format()).unwrap());
        (receiver, producer, shmem, layout)
    }

    fn frames(start: usize, count: usize) -> Vec<f32> {
        (0..count * 2).map(|i| (start * 2 + i) as f32).collect()
    }

    #[test]
    fn test_committed_frames_flow_through() {
        let (receiver, producer, mut shmem, layout) = fixture(16);

        let samples = frames(0, 4);
        layout.write(shmem.as_mut_slice(), 0, &samples).unwrap();
        receiver.frames_committed(0, 4);

        assert_eq!(
            producer.recv().unwrap(),
            Some(Message::AudioFramesProcessed {
                offset: 0,
                frames: 4
            })
        );

        let mut out = Vec::new();
        assert_eq!(receiver.take_frames(16, &mut out), 4);
        assert_eq!(out, samples);
        assert_eq!(receiver.take_frames(16, &mut out), 0);
    }

    #[test]
    fn test_take_stops_at_the_wrap_point() {
        let (receiver, _producer, mut shmem, layout) = fixture(8);

        layout
            .write(shmem.as_mut_slice(), 0, &frames(0, 6))
            .unwrap();
        receiver.frames_committed(0, 6);
        let mut out = Vec::new();
        assert_eq!(receiver.take_frames(6, &mut out), 6);

        // Next commit crosses the end of the 8-frame ring
        layout
            .write(shmem.as_mut_slice(), 6, &frames(6, 6))
            .unwrap();
        receiver.frames_committed(6, 6);

        out.clear();
        assert_eq!(receiver.take_frames(16, &mut out), 2);
        assert_eq!(out, frames(6, 2));
        out.clear();
        assert_eq!(receiver.take_frames(16, &mut out), 4);
        assert_eq!(out, frames(8, 4));
    }

    #[test]
    fn test_full_buffer_drops_newest_commit() {
        let (receiver, producer, mut shmem, layout) = fixture(8);

        layout
            .write(shmem.as_mut_slice(), 0, &frames(0, 6))
            .unwrap();
        receiver.frames_committed(0, 6);
        layout
            .write(shmem.as_mut_slice(), 6, &frames(6, 6))
            .unwrap();
        receiver.frames_committed(6, 6);

        assert_eq!(receiver.overruns(), 6);
        // Both commits acked regardless
        for _ in 0..2 {
            assert!(matches!(
                producer.recv().unwrap(),
                Some(Message::AudioFramesProcessed { .. })
            ));
        }

        // The backlog survives the drop and buffering resumes after it
        let mut out = Vec::new();
        assert_eq!(receiver.take_frames(8, &mut out), 6);
        assert_eq!(out, frames(0, 6));

        layout
            .write(shmem.as_mut_slice(), 12, &frames(12, 2))
            .unwrap();
        receiver.frames_committed(12, 2);
        out.clear();
        assert_eq!(receiver.take_frames(8, &mut out), 2);
        assert_eq!(out, frames(12, 2));
    }

    #[test]
    fn test_gap_in_commits_skips_ahead() {
        let (receiver, _producer, mut shmem, layout) = fixture(16);

        layout
            .write(shmem.as_mut_slice(), 0, &frames(0, 2))
            .unwrap();
        receiver.frames_committed(0, 2);

        // Offsets jump; the frames that did arrive sit back to back
        layout
            .write(shmem.as_mut_slice(), 10, &frames(10, 2))
            .unwrap();
        receiver.frames_committed(10, 2);

        let mut out = Vec::new();
        assert_eq!(receiver.take_frames(16, &mut out), 4);
        let mut expected = frames(0, 2);
        expected.extend(frames(10, 2));
        assert_eq!(out, expected);
    }

    #[test]
    fn test_stopped_receiver_still_drains() {
        let (receiver, _producer, mut shmem, layout) = fixture(16);

        layout
            .write(shmem.as_mut_slice(), 0, &frames(0, 3))
            .unwrap();
        receiver.frames_committed(0, 3);
        receiver.stop();
        receiver.frames_committed(3, 2);

        let mut out = Vec::new();
        assert_eq!(receiver.take_frames(16, &mut out), 3);
        assert_eq!(receiver.take_frames(16, &mut out), 0);
    }
}

//! Recorder-side video frame buffering
//!
//! The producer only has a handful of shared-memory slots and stalls once
//! they are all in flight, so every committed frame is copied into a larger
//! private ring as soon as it arrives and acknowledged immediately. The
//! encoder drains the private ring at its own pace; when it falls too far
//! behind, fresh frames are dropped and counted rather than blocking the
//! producer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use pipe_protocol::{Message, VideoFormat};
use shm_transport::{Channel, SharedMemory, SlotState};
use tracing::{debug, info, warn};

use crate::{FpsCounter, RecorderError, RecorderResult};

const RECEIVE_POLL: Duration = Duration::from_millis(200);

struct QueuedFrame {
    slot: usize,
    timestamp: i64,
}

struct RingState {
    states: Vec<SlotState>,
    commit_index: usize,
    dropping: bool,
}

/// Buffers committed frames between the control channel and the encoder.
///
/// `frame_committed` runs on the dispatch thread, `receive_frame` on the
/// encoder thread; both sides go through the slot state machine so a frame
/// is never overwritten while the encoder still reads it.
pub struct VideoReceiver {
    channel: Arc<Channel>,
    shmem: SharedMemory,
    format: VideoFormat,
    frame_size: usize,
    shared_slots: usize,
    slots: Vec<Mutex<Vec<u8>>>,
    state: Mutex<RingState>,
    queue_tx: Sender<QueuedFrame>,
    queue_rx: Receiver<QueuedFrame>,
    stopped: AtomicBool,
    commits: AtomicU64,
    overruns: AtomicU64,
    delivered: AtomicU64,
    fps: Mutex<FpsCounter>,
}

impl VideoReceiver {
    pub fn new(
        channel: Arc<Channel>,
        shmem: SharedMemory,
        format: VideoFormat,
        buffered_frames: usize,
    ) -> RecorderResult<Self> {
        let frame_size = format.frame_size();
        let shared_slots = if frame_size == 0 {
            0
        } else {
            shmem.len() / frame_size
        };
        if shared_slots == 0 {
            return Err(RecorderError::BadVideoRegion {
                region: shmem.len(),
                frame: frame_size,
            });
        }

        let buffered = buffered_frames.max(1);
        info!(
            frames = buffered,
            bytes = buffered * frame_size,
            "buffering video frames"
        );
        let slots = (0..buffered)
            .map(|_| Mutex::new(vec![0u8; frame_size]))
            .collect();
        let (queue_tx, queue_rx) = unbounded();

        Ok(Self {
            channel,
            shmem,
            format,
            frame_size,
            shared_slots,
            slots,
            state: Mutex::new(RingState {
                states: vec![SlotState::Available; buffered],
                commit_index: 0,
                dropping: false,
            }),
            queue_tx,
            queue_rx,
            stopped: AtomicBool::new(false),
            commits: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            fps: Mutex::new(FpsCounter::new()),
        })
    }

    pub fn format(&self) -> VideoFormat {
        self.format
    }

    /// Handles a `VideoFrameCommitted` notification for shared slot `index`.
    ///
    /// The frame is copied into the private ring (or dropped when the ring
    /// is full) and the shared slot is acknowledged either way so the
    /// producer gets its slot back. After `stop` the notification is
    /// ignored entirely.
    pub fn frame_committed(&self, index: u32, timestamp: i64) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!(index, "stopped, ignoring committed frame");
            return;
        }
        self.commits.fetch_add(1, Ordering::SeqCst);

        {
            let mut fps = self.fps.lock();
            if fps.tick(timestamp) {
                debug!("committing at {:.1} fps", fps.fps());
            }
        }

        let shared_index = index as usize;
        if shared_index >= self.shared_slots {
            warn!(
                index,
                slots = self.shared_slots,
                "committed frame index out of range"
            );
            self.ack(index);
            return;
        }

        let target = {
            let mut state = self.state.lock();
            let target = state.commit_index;
            if state.states[target] != SlotState::Available {
                let first = !state.dropping;
                state.dropping = true;
                drop(state);
                let dropped = self.overruns.fetch_add(1, Ordering::SeqCst) + 1;
                if first {
                    warn!(index, dropped, "encoder behind, dropping frames");
                }
                self.ack(index);
                return;
            }
            if state.dropping {
                state.dropping = false;
                info!(
                    dropped = self.overruns.load(Ordering::SeqCst),
                    "encoder caught up, resuming"
                );
            }
            state.states[target] = SlotState::Committed;
            state.commit_index = (target + 1) % self.slots.len();
            target
        };

        {
            let base = shared_index * self.frame_size;
            let src = &self.shmem.as_slice()[base..base + self.frame_size];
            self.slots[target].lock().copy_from_slice(src);
        }
        if self.queue_tx.send(QueuedFrame { slot: target, timestamp }).is_err() {
            debug!(index, "frame queue closed, dropping frame");
        }
        self.ack(index);
    }

    /// Blocks until the next buffered frame is copied into `buffer`.
    ///
    /// Returns the frame timestamp, or `None` once the receiver is stopped
    /// and the backlog is drained. The previously returned slot is released
    /// back to the ring here, so the last frame handed out stays valid until
    /// the next call.
    pub fn receive_frame(&self, buffer: &mut [u8]) -> RecorderResult<Option<i64>> {
        if buffer.len() != self.frame_size {
            return Err(RecorderError::FrameSizeMismatch {
                slot: self.frame_size,
                buffer: buffer.len(),
            });
        }

        let frame = loop {
            match self.queue_rx.recv_timeout(RECEIVE_POLL) {
                Ok(frame) => break frame,
                Err(RecvTimeoutError::Timeout) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        debug!("stopped and drained, ending stream");
                        return Ok(None);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        };

        buffer.copy_from_slice(&self.slots[frame.slot].lock());

        {
            let mut state = self.state.lock();
            state.states[frame.slot] = SlotState::Processing;
            let prev = (frame.slot + self.slots.len() - 1) % self.slots.len();
            if state.states[prev] == SlotState::Processing {
                state.states[prev] = SlotState::Available;
            }
        }

        let delivered = self.delivered.fetch_add(1, Ordering::SeqCst) + 1;
        if delivered % 10 == 0 {
            debug!(
                delivered,
                dropped = self.overruns.load(Ordering::SeqCst),
                buffered = self.queue_rx.len(),
                "video receiver progress"
            );
        }
        Ok(Some(frame.timestamp))
    }

    /// Stops accepting new frames. Already-buffered frames still drain
    /// through `receive_frame`.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    fn ack(&self, index: u32) {
        if let Err(err) = self.channel.send(&Message::VideoFrameProcessed { index }) {
            warn!(index, "failed to ack frame: {}", err);
        }
    }
}

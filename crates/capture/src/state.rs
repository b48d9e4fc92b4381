//! Capture session state machine
//!
//! Inactive -> (capture-start) -> Active -> (capture-stop or re-start
//! while active) -> Inactive. The pacing gate lives here too: backends
//! ask `ready()` on every presented frame and only produce output when
//! the configured frame interval has elapsed.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use pipe_protocol::CaptureSettings;

use crate::BackendKind;

struct StateInner {
    active: bool,
    settings: CaptureSettings,
    /// Pacing clock not latched yet for this session
    first_frame: bool,
    /// Instant of the session's first captured frame; timestamp origin
    first_ts: Option<Instant>,
    last_ts: Option<Instant>,
    seen_gl: bool,
    seen_d3d11: bool,
    seen_pattern: bool,
}

/// Shared capture state, updated by the control poll thread and read by
/// the render thread.
pub struct CaptureState {
    inner: Mutex<StateInner>,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                active: false,
                settings: CaptureSettings::default(),
                first_frame: true,
                first_ts: None,
                last_ts: None,
                seen_gl: false,
                seen_d3d11: false,
                seen_pattern: false,
            }),
        }
    }

    /// Activate capture with the given settings.
    ///
    /// A start request while already active is treated as a stop request
    /// (toggle semantics) and returns false.
    pub fn try_start(&self, settings: CaptureSettings) -> bool {
        let mut inner = self.inner.lock();
        if inner.active {
            info!("start requested while active, stopping capture instead");
            inner.active = false;
            return false;
        }

        info!(
            fps = settings.fps,
            size_divider = settings.size_divider,
            gpu_color_conv = settings.gpu_color_conv,
            "capture starting"
        );
        inner.settings = settings;
        inner.active = true;
        inner.first_frame = true;
        inner.first_ts = None;
        inner.last_ts = None;
        true
    }

    /// Deactivate capture. Returns false if it was not active.
    pub fn try_stop(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.active {
            debug!("stop requested but capture is not active");
            return false;
        }
        info!("capture stopping");
        inner.active = false;
        true
    }

    pub fn active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn settings(&self) -> CaptureSettings {
        self.inner.lock().settings
    }

    /// Pacing gate: true when a frame should be produced right now.
    pub fn ready(&self) -> bool {
        self.ready_at(Instant::now())
    }

    fn ready_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();

        if !inner.active {
            // Next session latches a fresh pacing clock
            inner.first_frame = true;
            return false;
        }

        let interval = Duration::from_micros(inner.settings.interval_us() as u64);

        if inner.first_frame {
            inner.first_frame = false;
            inner.first_ts = Some(now);
            inner.last_ts = Some(now);
            return false;
        }

        let last = match inner.last_ts {
            Some(last) => last,
            None => {
                inner.last_ts = Some(now);
                return false;
            }
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed < interval {
            return false;
        }

        // After a stall, reset the clock instead of catching up with a
        // burst of late frames; under small jitter, advance by exactly
        // one interval to hold the cadence.
        let dragging = elapsed > interval * 2;
        inner.last_ts = Some(if dragging { now } else { last + interval });
        true
    }

    /// Microseconds since the session's first captured frame.
    pub fn frame_timestamp(&self) -> i64 {
        self.frame_timestamp_at(Instant::now())
    }

    fn frame_timestamp_at(&self, now: Instant) -> i64 {
        let inner = self.inner.lock();
        match inner.first_ts {
            Some(first) => now.saturating_duration_since(first).as_micros() as i64,
            None => 0,
        }
    }

    /// Record that a backend produced its first present call. Logged once
    /// per backend kind.
    pub fn saw_backend(&self, kind: BackendKind) {
        let mut inner = self.inner.lock();
        let seen = match kind {
            BackendKind::Gl => &mut inner.seen_gl,
            BackendKind::D3d11 => &mut inner.seen_d3d11,
            BackendKind::Pattern => &mut inner.seen_pattern,
        };
        if !*seen {
            *seen = true;
            info!(backend = %kind, "graphics backend detected");
        }
    }
}

//! Timer-paced present loop for CPU backends
//!
//! GPU backends are driven by the host's real present calls; CPU
//! backends need a clock. The driver ticks at a fixed rate on its own
//! thread with deadline-based condvar waits, so `stop()` interrupts a
//! sleep immediately and a slow tick never causes a burst of catch-up
//! presents.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::{CaptureHost, CaptureResult, GraphicsBackend};

pub struct PacedDriver {
    handle: Option<JoinHandle<()>>,
    stop: Arc<(Mutex<bool>, Condvar)>,
}

impl PacedDriver {
    /// Drive `backend` through `host` at `fps` ticks per second until
    /// stopped or dropped.
    pub fn spawn(
        host: Arc<CaptureHost>,
        mut backend: Box<dyn GraphicsBackend>,
        fps: u32,
    ) -> CaptureResult<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_stop = stop.clone();
        let interval = Duration::from_micros(1_000_000 / fps.max(1) as u64);

        let handle = std::thread::Builder::new()
            .name("paced-driver".into())
            .spawn(move || {
                let mut deadline = Instant::now() + interval;
                loop {
                    host.on_present(backend.as_mut());

                    let (lock, condvar) = &*thread_stop;
                    let mut stopped = lock.lock();
                    while !*stopped {
                        if condvar.wait_until(&mut stopped, deadline).timed_out() {
                            break;
                        }
                    }
                    if *stopped {
                        break;
                    }
                    drop(stopped);

                    deadline += interval;
                    let now = Instant::now();
                    if deadline < now {
                        // Lost the cadence; rebase instead of bursting
                        deadline = now + interval;
                    }
                }
                backend.free();
                debug!("paced driver exiting");
            })?;

        Ok(Self {
            handle: Some(handle),
            stop,
        })
    }

    pub fn stop(&mut self) {
        {
            let (lock, condvar) = &*self.stop;
            let mut stopped = lock.lock();
            *stopped = true;
            condvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("driver thread panicked");
            }
        }
    }
}

impl Drop for PacedDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

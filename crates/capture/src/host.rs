//! Embed API for host applications
//!
//! A host connects to the recorder, registers its audio stream if it has
//! one, and calls `on_present` from its render loop (or hands a CPU
//! backend to `PacedDriver`). The host never interprets control traffic
//! itself; a poll thread applies start/stop and acknowledgement messages
//! to the shared state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use pipe_protocol::{AudioFormat, Message};
use shm_transport::{Channel, SOCKET_ENV};

use crate::{AudioWriter, CaptureError, CaptureResult, CaptureSink, CaptureState, GraphicsBackend};

pub struct CaptureHost {
    state: Arc<CaptureState>,
    channel: Arc<Channel>,
    sink: Arc<Mutex<CaptureSink>>,
    failed: AtomicBool,
    poll: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureHost {
    /// Connect to the recorder listening at `addr`.
    pub fn connect(addr: &str) -> CaptureResult<Self> {
        let channel = Arc::new(Channel::connect(addr)?);
        Self::with_channel(channel)
    }

    /// Connect to the address the recorder put in the environment when
    /// it spawned this process.
    pub fn connect_from_env() -> CaptureResult<Self> {
        let addr = std::env::var(SOCKET_ENV).unwrap_or_default();
        if addr.is_empty() {
            return Err(CaptureError::NoSocketAddr(SOCKET_ENV));
        }
        Self::connect(&addr)
    }

    /// Build a host over an established channel.
    pub fn with_channel(channel: Arc<Channel>) -> CaptureResult<Self> {
        let state = Arc::new(CaptureState::new());
        let sink = Arc::new(Mutex::new(CaptureSink::new(state.clone(), channel.clone())));

        let poll = spawn_poll(state.clone(), sink.clone(), channel.clone())?;

        Ok(Self {
            state,
            channel,
            sink,
            failed: AtomicBool::new(false),
            poll: Mutex::new(Some(poll)),
        })
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    /// Drive one present call through `backend`.
    ///
    /// Runs on the caller's render thread. A failing backend disables
    /// capture for the rest of the process rather than tearing down the
    /// host application.
    pub fn on_present(&self, backend: &mut dyn GraphicsBackend) {
        if self.failed.load(Ordering::Relaxed) {
            return;
        }
        let mut sink = self.sink.lock();
        if let Err(e) = backend.present(&mut sink) {
            if !self.failed.swap(true, Ordering::Relaxed) {
                error!(backend = %backend.kind(), "capture disabled: {}", e);
            }
        }
    }

    /// Announce an audio stream. Must happen before the first captured
    /// video frame to be part of the session.
    pub fn register_audio(&self, format: AudioFormat) -> CaptureResult<AudioWriter> {
        let (writer, setup) =
            AudioWriter::create(self.channel.clone(), self.state.clone(), format)?;
        let mut sink = self.sink.lock();
        if sink.video_started() {
            warn!("audio registered after video setup; recorder will ignore it this session");
        }
        sink.set_audio(setup, writer.progress());
        Ok(writer)
    }

    /// Tell the recorder the in-host capture hotkey was pressed.
    pub fn notify_hotkey(&self) -> CaptureResult<()> {
        self.channel.send(&Message::HotkeyPressed)?;
        Ok(())
    }

    /// Close the channel and join the poll thread.
    pub fn disconnect(&self) {
        self.channel.shutdown();
        if let Some(handle) = self.poll.lock().take() {
            if handle.join().is_err() {
                warn!("control poll thread panicked");
            }
        }
        self.sink.lock().end_video();
    }
}

impl Drop for CaptureHost {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn spawn_poll(
    state: Arc<CaptureState>,
    sink: Arc<Mutex<CaptureSink>>,
    channel: Arc<Channel>,
) -> CaptureResult<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("capture-control".into())
        .spawn(move || loop {
            match channel.recv() {
                Ok(Some(message)) => dispatch(&state, &sink, message),
                Ok(None) => {
                    info!("control channel closed");
                    state.try_stop();
                    break;
                }
                Err(e) => {
                    warn!("control channel read failed: {}", e);
                    state.try_stop();
                    break;
                }
            }
        })?;
    Ok(handle)
}

fn dispatch(state: &CaptureState, sink: &Mutex<CaptureSink>, message: Message) {
    match message {
        Message::CaptureStart(settings) => {
            state.try_start(settings);
        }
        Message::CaptureStop => {
            state.try_stop();
        }
        Message::VideoFrameProcessed { index } => {
            sink.lock().release_slot(index);
        }
        Message::AudioFramesProcessed { offset, frames } => {
            sink.lock().audio_processed(offset, frames);
        }
        other => {
            debug!(message = ?other, "ignoring unexpected control message");
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::PatternBackend;
    use pipe_protocol::CaptureSettings;
    use shm_transport::RawStream;
    use std::time::Duration;

    fn connected_host() -> (CaptureHost, Channel) {
        let (a, b) = RawStream::pair().unwrap();
        let host = CaptureHost::with_channel(Arc::new(Channel::from_stream(a).unwrap())).unwrap();
        (host, Channel::from_stream(b).unwrap())
    }

    fn unpaced() -> CaptureSettings {
        CaptureSettings {
            fps: 0,
            size_divider: 1,
            gpu_color_conv: false,
        }
    }

    fn wait_active(host: &CaptureHost, want: bool) {
        for _ in 0..200 {
            if host.state().active() == want {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("capture never became active={}", want);
    }

    #[test]
    fn test_start_message_activates_capture() {
        let (host, recorder) = connected_host();
        assert!(!host.state().active());

        recorder.send(&Message::CaptureStart(unpaced())).unwrap();
        wait_active(&host, true);

        recorder.send(&Message::CaptureStop).unwrap();
        wait_active(&host, false);
    }

    #[test]
    fn test_start_twice_toggles_back_off() {
        let (host, recorder) = connected_host();

        recorder.send(&Message::CaptureStart(unpaced())).unwrap();
        wait_active(&host, true);
        recorder.send(&Message::CaptureStart(unpaced())).unwrap();
        wait_active(&host, false);
    }

    #[test]
    fn test_present_flows_through_to_commits() {
        let (host, recorder) = connected_host();
        let mut backend = PatternBackend::new(16, 16);

        recorder.send(&Message::CaptureStart(unpaced())).unwrap();
        wait_active(&host, true);

        host.on_present(&mut backend); // latch
        host.on_present(&mut backend);

        match recorder.recv().unwrap().unwrap() {
            Message::VideoSetup(setup) => assert_eq!(setup.width, 16),
            other => panic!("unexpected message: {:?}", other),
        }
        match recorder.recv().unwrap().unwrap() {
            Message::VideoFrameCommitted { index, .. } => {
                assert_eq!(index, 0);
                recorder
                    .send(&Message::VideoFrameProcessed { index })
                    .unwrap();
            }
            other => panic!("unexpected message: {:?}", other),
        }

        host.disconnect();
    }

    #[test]
    fn test_hotkey_reaches_the_recorder() {
        let (host, recorder) = connected_host();
        host.notify_hotkey().unwrap();
        assert_eq!(recorder.recv().unwrap(), Some(Message::HotkeyPressed));
    }

    #[test]
    fn test_channel_close_stops_capture() {
        let (host, recorder) = connected_host();
        recorder.send(&Message::CaptureStart(unpaced())).unwrap();
        wait_active(&host, true);

        drop(recorder);
        wait_active(&host, false);
    }
}

//! Control message dispatch for the recorder process
//!
//! One thread owns the channel read side and routes every message: session
//! setup, frame/audio commits, and hotkey flips. Encoding happens on the
//! per-session threads; nothing here blocks longer than a frame copy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipe_protocol::{Message, PixelFormat, VideoFormat, VideoSetup};
use shm_transport::{Channel, SharedMemory};
use tracing::{debug, error, info, warn};

use crate::{AudioReceiver, RecorderConfig, RecorderError, RecorderResult, Session, VideoReceiver};

pub struct MainLoop {
    channel: Arc<Channel>,
    config: RecorderConfig,
    session: Option<Session>,
    old_sessions: Vec<Session>,
}

impl MainLoop {
    pub fn new(channel: Arc<Channel>, config: RecorderConfig) -> Self {
        Self {
            channel,
            config,
            session: None,
            old_sessions: Vec::new(),
        }
    }

    /// Dispatches control messages until the host disconnects, then drains
    /// every session so no recording is left truncated.
    ///
    /// Returns the first error encountered, after teardown; encoder
    /// failures surface here so the process can exit nonzero.
    pub fn run(&mut self) -> RecorderResult<()> {
        info!("recorder ready");
        let mut failure: Option<RecorderError> = None;

        loop {
            match self.channel.recv() {
                Ok(Some(message)) => self.dispatch(message),
                Ok(None) => {
                    info!("control channel closed");
                    break;
                }
                Err(err) => {
                    warn!("control channel error: {}", err);
                    failure = Some(err.into());
                    break;
                }
            }
        }

        self.end_session();
        for session in self.old_sessions.drain(..) {
            if let Err(err) = session.join() {
                error!("session failed: {}", err);
                failure.get_or_insert(err);
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn dispatch(&mut self, message: Message) {
        match message {
            Message::HotkeyPressed => self.capture_flip(),
            Message::VideoSetup(setup) => self.start_session(setup),
            Message::VideoFrameCommitted { index, timestamp } => match self.session.as_ref() {
                Some(session) => session.video().frame_committed(index, timestamp),
                None => debug!(index, "no session for committed frame"),
            },
            Message::AudioFramesCommitted { offset, frames } => {
                match self.session.as_ref().and_then(|s| s.audio()) {
                    Some(audio) => audio.frames_committed(offset, frames),
                    None => debug!(offset, "no audio session for committed frames"),
                }
            }
            Message::AudioSetup(_) => info!("ignoring standalone audio setup"),
            other => debug!(?other, "ignoring unexpected control message"),
        }
    }

    /// Hotkey toggle: start capturing, or finish the live session.
    fn capture_flip(&mut self) {
        if self.session.is_some() {
            info!("hotkey: stopping capture");
            self.send(&Message::CaptureStop);
            self.end_session();
        } else {
            info!("hotkey: starting capture");
            self.send(&Message::CaptureStart(self.config.capture_settings()));
        }
    }

    fn start_session(&mut self, setup: VideoSetup) {
        if self.session.is_some() {
            warn!("video setup while a session is live, ignoring");
            return;
        }
        match self.build_session(setup) {
            Ok(session) => self.session = Some(session),
            Err(err) => error!("failed to start session: {}", err),
        }
    }

    fn build_session(&self, setup: VideoSetup) -> RecorderResult<Session> {
        let format = VideoFormat {
            width: setup.width,
            height: setup.height,
            pixel_format: setup.pixel_format,
            vflip: setup.vflip,
            pitch: setup.linesizes[0] as u32,
        };
        if format.pixel_format == PixelFormat::Unknown {
            return Err(RecorderError::UnsupportedPixelFormat(format.pixel_format));
        }

        let shmem = SharedMemory::open(Path::new(&setup.shmem.path), setup.shmem.size as usize)?;
        let video = Arc::new(VideoReceiver::new(
            self.channel.clone(),
            shmem,
            format,
            self.config.effective_buffered_frames(),
        )?);

        let audio = match setup.audio {
            Some(audio_setup) if !self.config.no_audio => {
                let shmem = SharedMemory::open(
                    Path::new(&audio_setup.shmem.path),
                    audio_setup.shmem.size as usize,
                )?;
                Some(Arc::new(AudioReceiver::new(
                    self.channel.clone(),
                    shmem,
                    audio_setup.format,
                )?))
            }
            Some(_) => {
                info!("audio track disabled");
                None
            }
            None => None,
        };

        std::fs::create_dir_all(&self.config.dir)?;
        let output = session_output_path(&self.config.dir);
        info!(
            output = %output.display(),
            width = format.width,
            height = format.height,
            audio = audio.is_some(),
            "starting session"
        );
        Session::start(self.config.encoder_params(output), video, audio)
    }

    /// Moves the live session to the drain list; it keeps encoding its
    /// backlog until joined.
    fn end_session(&mut self) {
        match self.session.take() {
            Some(session) => {
                session.stop();
                self.old_sessions.push(session);
            }
            None => debug!("no session to end"),
        }
    }

    fn send(&self, message: &Message) {
        if let Err(err) = self.channel.send(message) {
            warn!("failed to send control message: {}", err);
        }
    }
}

/// Timestamped recording path inside `dir`.
fn session_output_path(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    dir.join(format!("kinescope_{}.mp4", stamp))
}

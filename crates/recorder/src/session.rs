//! One recording session: receivers feeding an encoder thread

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use encoder::{
    AudioSource, EncoderError, EncoderParams, EncoderResult, FramePull, FrameSource, Mp4Encoder,
};
use pipe_protocol::{AudioFormat, VideoFormat};
use tracing::{error, info};

use crate::{AudioReceiver, RecorderError, RecorderResult, VideoReceiver};

/// A live (or draining) recording: the receivers plus the thread running
/// the encoder against them.
pub struct Session {
    video: Arc<VideoReceiver>,
    audio: Option<Arc<AudioReceiver>>,
    encoder: Option<JoinHandle<EncoderResult<()>>>,
}

impl Session {
    /// Spawns the encoder thread over the given receivers.
    pub fn start(
        params: EncoderParams,
        video: Arc<VideoReceiver>,
        audio: Option<Arc<AudioReceiver>>,
    ) -> RecorderResult<Self> {
        let thread_video = video.clone();
        let thread_audio = audio.clone();
        let encoder = thread::Builder::new()
            .name("session-encoder".into())
            .spawn(move || {
                let result = run_encoder(params, thread_video.clone(), thread_audio.clone());
                match result {
                    Ok(()) => info!("session encoder finished"),
                    Err(ref err) => {
                        error!("encoding failed: {}", err);
                        // Stop feeding a dead encoder
                        thread_video.stop();
                        if let Some(audio) = thread_audio.as_ref() {
                            audio.stop();
                        }
                    }
                }
                result
            })?;

        Ok(Self {
            video,
            audio,
            encoder: Some(encoder),
        })
    }

    pub fn video(&self) -> &VideoReceiver {
        &self.video
    }

    pub fn audio(&self) -> Option<&AudioReceiver> {
        self.audio.as_deref()
    }

    /// Stops both receivers. Buffered frames still drain, so the encoder
    /// finishes the file instead of truncating it.
    pub fn stop(&self) {
        self.video.stop();
        if let Some(audio) = self.audio.as_ref() {
            audio.stop();
        }
    }

    /// Waits for the encoder thread and surfaces its result.
    pub fn join(mut self) -> RecorderResult<()> {
        match self.encoder.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result.map_err(RecorderError::from),
                Err(_) => Err(RecorderError::EncoderPanicked),
            },
            None => Ok(()),
        }
    }
}

fn run_encoder(
    params: EncoderParams,
    video: Arc<VideoReceiver>,
    audio: Option<Arc<AudioReceiver>>,
) -> EncoderResult<()> {
    let mut frames = VideoPull { receiver: video };
    let mut samples = audio.map(|receiver| AudioPull {
        receiver,
        staged: Vec::new(),
    });
    Mp4Encoder::new(params).encode(
        &mut frames,
        samples.as_mut().map(|pull| pull as &mut dyn AudioSource),
    )
}

struct VideoPull {
    receiver: Arc<VideoReceiver>,
}

impl FrameSource for VideoPull {
    fn video_format(&self) -> VideoFormat {
        self.receiver.format()
    }

    fn next_frame(&mut self, buffer: &mut [u8]) -> EncoderResult<FramePull> {
        match self.receiver.receive_frame(buffer) {
            Ok(Some(timestamp)) => Ok(FramePull::Frame { timestamp }),
            Ok(None) => Ok(FramePull::Eos),
            Err(err) => Err(EncoderError::Source(err.to_string())),
        }
    }
}

struct AudioPull {
    receiver: Arc<AudioReceiver>,
    staged: Vec<f32>,
}

impl AudioSource for AudioPull {
    fn audio_format(&self) -> AudioFormat {
        self.receiver.format()
    }

    fn next_frames(&mut self, max_frames: usize) -> EncoderResult<&[f32]> {
        self.staged.clear();
        self.receiver.take_frames(max_frames, &mut self.staged);
        Ok(&self.staged)
    }
}

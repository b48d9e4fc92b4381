//! Synthetic capture host
//!
//! Stands in for a real game: connects to a running recorder, presents
//! the test pattern at a fixed rate, streams a sine tone into the audio
//! ring, and presses the virtual hotkey to record for a while. Useful for
//! trying the whole pipeline without instrumenting anything:
//!
//! ```text
//! kinescope-run --dir /tmp 2>/dev/null -- pattern-host --seconds 5
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use capture::{CaptureHost, PacedDriver, PatternBackend};
use pipe_protocol::{AudioFormat, SampleFormat};

const TONE_RATE: u32 = 44_100;
const TONE_HZ: f32 = 440.0;

/// Demo host that feeds the recorder a synthetic scene
#[derive(Parser, Debug)]
#[command(name = "pattern-host")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Recorder control socket; defaults to KINESCOPE_SOCKET from the
    /// environment
    #[arg(long)]
    socket: Option<String>,

    /// Pattern width before the capture divider
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Pattern height before the capture divider
    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Present rate of the synthetic render loop
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Seconds to keep recording before stopping
    #[arg(long, default_value_t = 5)]
    seconds: u64,

    /// Skip the sine audio stream
    #[arg(long)]
    no_audio: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pattern_host=debug".parse()?)
                .add_directive("capture=debug".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let host = Arc::new(match cli.socket.as_deref() {
        Some(addr) => CaptureHost::connect(addr)?,
        None => CaptureHost::connect_from_env()?,
    });

    let tone = if cli.no_audio {
        None
    } else {
        Some(spawn_tone(&host)?)
    };

    let backend = Box::new(PatternBackend::new(cli.width, cli.height));
    let mut driver = PacedDriver::spawn(host.clone(), backend, cli.fps)?;

    info!(seconds = cli.seconds, "recording the test pattern");
    host.notify_hotkey()?;
    thread::sleep(Duration::from_secs(cli.seconds));
    host.notify_hotkey()?;

    // Let the stop round-trip before tearing the streams down
    thread::sleep(Duration::from_millis(300));

    driver.stop();
    if let Some(tone) = tone {
        tone.stop();
    }
    host.disconnect();
    info!("done");
    Ok(())
}

struct ToneStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ToneStream {
    fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Streams a stereo sine tone into the audio ring in 100 ms pushes.
fn spawn_tone(host: &CaptureHost) -> anyhow::Result<ToneStream> {
    let mut writer = host.register_audio(AudioFormat {
        channels: 2,
        format: SampleFormat::F32,
        rate: TONE_RATE,
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let handle = thread::Builder::new()
        .name("tone-stream".into())
        .spawn(move || {
            let chunk = (TONE_RATE / 10) as usize;
            let mut samples = Vec::with_capacity(chunk * 2);
            let mut phase = 0.0f32;
            while !thread_stop.load(Ordering::SeqCst) {
                samples.clear();
                for _ in 0..chunk {
                    let s = (phase * std::f32::consts::TAU).sin() * 0.2;
                    phase = (phase + TONE_HZ / TONE_RATE as f32).fract();
                    samples.push(s);
                    samples.push(s);
                }
                if let Err(err) = writer.commit_frames(&samples) {
                    warn!("tone stream ended: {}", err);
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }
        })?;

    Ok(ToneStream {
        stop,
        handle: Some(handle),
    })
}

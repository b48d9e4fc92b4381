//! Kinescope recorder process
//!
//! Binds the control socket, optionally launches the host program with
//! `KINESCOPE_SOCKET` exported, and records every session the host
//! commits until it disconnects.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use encoder::{
    OutputPixFmt, DEFAULT_CRF, DEFAULT_GOP_SIZE, DEFAULT_MAX_B_FRAMES, DEFAULT_X264_PRESET,
};
use recorder::{MainLoop, RecorderConfig, DEFAULT_BUFFERED_FRAMES};
use shm_transport::{default_socket_addr, ChannelListener, SOCKET_ENV};

/// Kinescope - records a game's frames to MP4 from outside the game process
#[derive(Parser, Debug)]
#[command(name = "kinescope-run")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory recordings are written into
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Control socket address; defaults to a per-process path under the
    /// runtime directory
    #[arg(long)]
    socket: Option<String>,

    /// Requested capture frame rate
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Divide the capture dimensions by this factor
    #[arg(long, default_value_t = 1)]
    size_divider: u32,

    /// Ask the host to color-convert on the GPU
    #[arg(long)]
    gpu_color_conv: bool,

    /// Record without an audio track
    #[arg(long)]
    no_audio: bool,

    /// Frames buffered per session; 0 means the default
    #[arg(long, default_value_t = DEFAULT_BUFFERED_FRAMES)]
    buffered_frames: usize,

    /// Encoded chroma layout: yuv420p or yuv444p
    #[arg(long, default_value = "yuv420p")]
    pix_fmt: String,

    /// Constant-quality factor, 0-51
    #[arg(long, default_value_t = DEFAULT_CRF)]
    crf: u32,

    /// x264 speed preset
    #[arg(long, default_value = DEFAULT_X264_PRESET)]
    x264_preset: String,

    /// Keyframe interval in frames
    #[arg(long, default_value_t = DEFAULT_GOP_SIZE)]
    gop_size: u32,

    /// Maximum consecutive B-frames
    #[arg(long, default_value_t = DEFAULT_MAX_B_FRAMES)]
    max_b_frames: u32,

    /// Encoder frame threads; 0 and anything above 32 mean one
    #[arg(long, default_value_t = 1)]
    threads: u32,

    /// Host program to launch, with its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    fn recorder_config(&self) -> RecorderConfig {
        let pix_fmt = match OutputPixFmt::from_name(&self.pix_fmt) {
            Some(fmt) => fmt,
            None => {
                warn!(requested = %self.pix_fmt, "unknown pixel format, using yuv420p");
                OutputPixFmt::default()
            }
        };

        RecorderConfig {
            dir: self.dir.clone(),
            fps: self.fps,
            size_divider: self.size_divider,
            gpu_color_conv: self.gpu_color_conv,
            no_audio: self.no_audio,
            buffered_frames: self.buffered_frames,
            pix_fmt,
            crf: self.crf,
            x264_preset: self.x264_preset.clone(),
            gop_size: self.gop_size,
            max_b_frames: self.max_b_frames,
            threads: self.threads,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kinescope_run=debug".parse()?)
                .add_directive("recorder=debug".parse()?)
                .add_directive("encoder=info".parse()?)
                .add_directive("shm_transport=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.recorder_config();

    let addr = cli.socket.clone().unwrap_or_else(default_socket_addr);
    let listener = ChannelListener::bind(&addr)?;

    let mut host = launch_host(&cli.command, listener.addr())?;

    info!(addr = listener.addr(), "waiting for host to connect");
    let channel = Arc::new(listener.accept()?);

    let result = MainLoop::new(channel, config).run();

    if let Some(host) = host.as_mut() {
        reap_host(host);
    }
    result?;
    Ok(())
}

/// Launch the host program with the control socket address exported.
fn launch_host(command: &[String], addr: &str) -> anyhow::Result<Option<Child>> {
    let Some((program, args)) = command.split_first() else {
        return Ok(None);
    };
    info!(program = %program, "launching host");
    let child = Command::new(program)
        .args(args)
        .env(SOCKET_ENV, addr)
        .spawn()?;
    Ok(Some(child))
}

/// The host normally exits before the channel closes; this just collects
/// its status.
fn reap_host(host: &mut Child) {
    match host.wait() {
        Ok(status) if status.success() => info!("host exited"),
        Ok(status) => warn!(%status, "host exited with failure"),
        Err(err) => warn!("failed to wait for host: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_defaults() {
        let cli = Cli::try_parse_from(["kinescope-run"]).unwrap();
        assert_eq!(cli.fps, 60);
        assert_eq!(cli.crf, DEFAULT_CRF);
        assert_eq!(cli.x264_preset, DEFAULT_X264_PRESET);
        assert!(cli.command.is_empty());
        assert!(cli.socket.is_none());
    }

    #[test]
    fn parse_host_command_with_flags() {
        let cli = Cli::try_parse_from([
            "kinescope-run",
            "--dir",
            "/tmp/rec",
            "--fps",
            "30",
            "--no-audio",
            "--",
            "mygame",
            "--fullscreen",
        ])
        .unwrap();
        assert_eq!(cli.dir, PathBuf::from("/tmp/rec"));
        assert_eq!(cli.fps, 30);
        assert!(cli.no_audio);
        assert_eq!(cli.command, vec!["mygame", "--fullscreen"]);
    }

    #[test]
    fn bad_pix_fmt_falls_back() {
        let cli = Cli::try_parse_from(["kinescope-run", "--pix-fmt", "nv12"]).unwrap();
        assert_eq!(cli.recorder_config().pix_fmt, OutputPixFmt::Yuv420p);

        let cli = Cli::try_parse_from(["kinescope-run", "--pix-fmt", "yuv444p"]).unwrap();
        assert_eq!(cli.recorder_config().pix_fmt, OutputPixFmt::Yuv444p);
    }
}

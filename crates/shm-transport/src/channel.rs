//! Control channel between the capture and recorder processes
//!
//! A local byte stream (Unix domain socket; loopback TCP elsewhere)
//! carrying the length-prefixed messages of `pipe-protocol`. Reads happen
//! on one dedicated thread per process; writes come from several threads
//! and are serialized by a mutex.

use std::io::{BufReader, BufWriter};
use std::net::Shutdown;

use parking_lot::Mutex;
use tracing::{debug, info};

use pipe_protocol::{read_message, write_message, Message};

use crate::TransportResult;

/// Platform byte stream backing a [`Channel`]
#[cfg(unix)]
pub type RawStream = std::os::unix::net::UnixStream;
#[cfg(unix)]
type RawListener = std::os::unix::net::UnixListener;

/// Platform byte stream backing a [`Channel`]
#[cfg(not(unix))]
pub type RawStream = std::net::TcpStream;
#[cfg(not(unix))]
type RawListener = std::net::TcpListener;

/// Listening side of the control channel (the recorder process)
pub struct ChannelListener {
    inner: RawListener,
    addr: String,
}

impl ChannelListener {
    /// Bind the control socket at `addr`.
    ///
    /// On Unix `addr` is a filesystem path; a stale socket file from a
    /// previous run is removed first.
    pub fn bind(addr: &str) -> TransportResult<Self> {
        #[cfg(unix)]
        {
            let path = std::path::Path::new(addr);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }

        let inner = RawListener::bind(addr)?;

        #[cfg(unix)]
        let addr = addr.to_string();
        // The OS may have picked the port; report the bound address
        #[cfg(not(unix))]
        let addr = inner.local_addr()?.to_string();

        info!(addr, "control channel listening");
        Ok(Self { inner, addr })
    }

    /// Address host processes should connect to
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Block until a host process connects.
    pub fn accept(&self) -> TransportResult<Channel> {
        let (stream, _) = self.inner.accept()?;
        debug!(addr = %self.addr, "host connected");
        Channel::from_stream(stream)
    }
}

impl Drop for ChannelListener {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            let _ = std::fs::remove_file(&self.addr);
        }
    }
}

/// One end of an established control channel
pub struct Channel {
    reader: Mutex<BufReader<RawStream>>,
    writer: Mutex<BufWriter<RawStream>>,
    raw: RawStream,
}

impl Channel {
    /// Connect to a listening recorder at `addr`.
    pub fn connect(addr: &str) -> TransportResult<Self> {
        let stream = RawStream::connect(addr)?;
        debug!(addr, "connected to recorder");
        Self::from_stream(stream)
    }

    /// Wrap an already-connected stream (as after `accept`, or a
    /// socketpair end inherited from a parent process).
    pub fn from_stream(stream: RawStream) -> TransportResult<Self> {
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(BufWriter::new(writer)),
            raw: stream,
        })
    }

    /// Send one message. Safe to call from multiple threads.
    pub fn send(&self, message: &Message) -> TransportResult<()> {
        let mut writer = self.writer.lock();
        write_message(&mut *writer, message)?;
        Ok(())
    }

    /// Receive the next message.
    ///
    /// Blocks until a message arrives; returns `Ok(None)` when the peer
    /// closed the stream (normal end of session).
    pub fn recv(&self) -> TransportResult<Option<Message>> {
        let mut reader = self.reader.lock();
        Ok(read_message(&mut *reader)?)
    }

    /// Close both directions, unblocking any pending `recv`.
    pub fn shutdown(&self) {
        let _ = self.raw.shutdown(Shutdown::Both);
    }
}

//! Socket and shared-memory path selection

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Environment variable carrying the control socket address to host processes
pub const SOCKET_ENV: &str = "KINESCOPE_SOCKET";

/// Per-user runtime directory for sockets and shared-memory files.
pub fn runtime_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let base = std::env::var("XDG_RUNTIME_DIR")
            .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));
        PathBuf::from(base).join("kinescope")
    }

    #[cfg(not(target_os = "linux"))]
    {
        std::env::temp_dir().join("kinescope")
    }
}

/// Default control socket address for the recorder process.
#[cfg(unix)]
pub fn default_socket_addr() -> String {
    runtime_dir()
        .join(format!("run-{}.sock", std::process::id()))
        .to_string_lossy()
        .into_owned()
}

/// Default control socket address for the recorder process.
#[cfg(not(unix))]
pub fn default_socket_addr() -> String {
    // Loopback TCP stands in for local sockets; port chosen by the OS at
    // bind time would not be announceable, so derive one from the pid.
    format!("127.0.0.1:{}", 42000 + (std::process::id() % 20000))
}

/// A region path that no other live session is using.
pub fn unique_region_path(tag: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    runtime_dir().join(format!("{}-{}-{}.shm", tag, std::process::id(), n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_region_paths_differ() {
        assert_ne!(unique_region_path("a"), unique_region_path("a"));
    }
}

use std::path::{Path, PathBuf};

pub use jobsync_core::config::jobsync_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    jobsync_root(home).join(DAEMON_SOCKET)
}

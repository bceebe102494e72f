//! Persistent server keeping every terminology warm
//!
//! Architecture:
//! - Workers: one thread per terminology owning its snapshot, fed by channels
//! - Daemon: hosts the workers and listens on a Unix socket
//! - Client: connects to the socket, sends searches, drops stale answers
//! - Fallback: without a daemon the CLI spawns a worker in-process

pub mod client;
pub mod daemon;
pub mod protocol;
pub mod worker;

pub use client::{IndexClient, RequestTracker};
pub use worker::{TerminologyWorker, WorkerEvent, WorkerOptions};

use std::path::PathBuf;

/// Get the socket path for the index server
/// Uses a per-user runtime directory for security
pub fn get_socket_path() -> PathBuf {
    runtime_path("sock")
}

/// Get the PID file path for the daemon
pub fn get_pid_path() -> PathBuf {
    runtime_path("pid")
}

fn runtime_path(extension: &str) -> PathBuf {
    // Try XDG_RUNTIME_DIR first (most secure, tmpfs-backed)
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(format!("termidx.{}", extension));
    }

    if let Some(home) = dirs::home_dir() {
        return home
            .join(".local")
            .join("run")
            .join(format!("termidx.{}", extension));
    }

    // Last resort: /tmp with user ID
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/termidx-{}.{}", uid, extension))
}

/// Check if the daemon is running
pub fn is_daemon_running() -> bool {
    let pid_path = get_pid_path();
    if !pid_path.exists() {
        return false;
    }

    // Read PID and check if process exists
    if let Ok(pid_str) = std::fs::read_to_string(&pid_path)
        && let Ok(pid) = pid_str.trim().parse::<i32>()
    {
        // kill(pid, 0) only checks that the process exists
        return unsafe { libc::kill(pid, 0) == 0 };
    }

    false
}

//! Per-project daemon identity: socket and PID file locations, liveness.
//!
//! Paths are derived from a hash of the canonical project root, so two
//! projects never share a socket even when they share a socket directory.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;
use crate::semantic::summary::hex;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub root: PathBuf,
    pub socket: PathBuf,
    pub pid_file: PathBuf,
    pub log: PathBuf,
}

/// First 16 hex digits of the SHA-256 of the root path.
pub fn project_key(root: &Path) -> String {
    let digest = hex(&Sha256::digest(root.as_os_str().as_encoded_bytes()));
    digest[..16].to_string()
}

impl SessionPaths {
    /// Paths for the daemon serving `root`. The root is canonicalized.
    pub fn for_project(root: &Path, config: &Config) -> Result<Self> {
        let root = root.canonicalize()?;
        let dir = config.socket_dir();
        let key = project_key(&root);
        Ok(Self {
            socket: dir.join(format!("strata-{key}.sock")),
            pid_file: dir.join(format!("strata-{key}.pid")),
            log: Storage::open(&root).log_path(),
            root,
        })
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for path in [&self.socket, &self.log] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    pub fn write_pid(&self) -> Result<()> {
        fs::write(&self.pid_file, std::process::id().to_string())?;
        Ok(())
    }

    pub fn read_pid(&self) -> Option<i32> {
        fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Check if the daemon is running by checking PID file and process.
    pub fn is_alive(&self) -> bool {
        match self.read_pid() {
            Some(pid) => process_exists(pid),
            None => false,
        }
    }

    /// Remove the socket and PID file, ignoring files already gone.
    pub fn cleanup(&self) {
        for path in [&self.socket, &self.pid_file] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove daemon file");
                }
            }
        }
    }
}

fn process_exists(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // Signal 0 checks for existence without delivering anything.
    unsafe { libc::kill(pid, 0) == 0 }
}

//! Runtime configuration.
//!
//! Loaded from `<root>/.strata/config.toml` when present, then overridden by
//! `STRATA_*` environment variables. Every field has a default so a missing
//! file (the common case) is not an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, StrataError};
use crate::storage::Storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds without a request before the daemon exits.
    pub idle_timeout_secs: u64,
    /// Watch the project tree and refresh on change.
    pub watch: bool,
    pub debounce_ms: u64,
    /// Files above this size are skipped.
    pub max_file_bytes: u64,
    /// Body lines kept in a unit preview (and in its semantic summary).
    pub preview_lines: usize,
    /// Dimension of the built-in hashing embedder.
    pub embedding_dims: usize,
    /// CFG complexity above which a unit is reported as a refactor candidate.
    pub complexity_threshold: u32,
    /// Spawn a daemon when a client finds none.
    pub autostart: bool,
    pub startup_timeout_ms: u64,
    /// Longest a client waits on one daemon round trip; 0 waits forever.
    pub request_timeout_ms: u64,
    /// Directory holding daemon sockets. Defaults to `$TMPDIR/strata`.
    pub socket_dir: Option<PathBuf>,
    /// Extra directory names excluded from scans and watching.
    pub ignored_dirs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 60,
            watch: true,
            debounce_ms: 200,
            max_file_bytes: 1024 * 1024,
            preview_lines: 10,
            embedding_dims: 256,
            complexity_threshold: 10,
            autostart: true,
            startup_timeout_ms: 5_000,
            request_timeout_ms: 60_000,
            socket_dir: None,
            ignored_dirs: Vec::new(),
        }
    }
}

impl Config {
    /// Load config for a project root: file first, environment on top.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Storage::open(root).config_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            debug!(path = %path.display(), "loading config");
            toml::from_str(&text)
                .map_err(|e| StrataError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `STRATA_*` overrides. The lookup is injected so tests stay
    /// independent of the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STRATA_IDLE_TIMEOUT_SECS") {
            self.idle_timeout_secs = v
                .trim()
                .parse()
                .map_err(|_| StrataError::Config(format!("STRATA_IDLE_TIMEOUT_SECS={v}")))?;
        }
        if let Some(v) = lookup("STRATA_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = v
                .trim()
                .parse()
                .map_err(|_| StrataError::Config(format!("STRATA_REQUEST_TIMEOUT_MS={v}")))?;
        }
        if let Some(v) = lookup("STRATA_SOCKET_DIR") {
            if !v.trim().is_empty() {
                self.socket_dir = Some(PathBuf::from(v));
            }
        }
        if lookup("STRATA_NO_WATCH").is_some() {
            self.watch = false;
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("strata"))
    }
}

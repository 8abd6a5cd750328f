//! File system layout for Strata state.
//!
//! Everything a project persists lives under `<root>/.strata/`. Writes go
//! through [`Storage::write_atomic`] so a crash mid-write never leaves a
//! truncated cache behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".strata";

/// Storage layer rooted at a project's `.strata/` directory.
#[derive(Debug, Clone)]
pub struct Storage {
    /// Root directory (.strata/)
    root: PathBuf,
}

impl Storage {
    /// Initialize the state directory, creating it if needed.
    pub fn init(project_root: &Path) -> Result<Self> {
        let storage = Self::open(project_root);
        if !storage.root.exists() {
            fs::create_dir_all(&storage.root)?;
        }
        Ok(storage)
    }

    /// Describe the state directory without touching the disk.
    pub fn open(project_root: &Path) -> Self {
        Self {
            root: project_root.join(STATE_DIR),
        }
    }

    /// Get root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_path(&self) -> PathBuf {
        self.root.join("cache.bin")
    }

    pub fn semantic_path(&self) -> PathBuf {
        self.root.join("semantic.bin")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("daemon.log")
    }

    /// Write to a `.tmp` sibling, fsync, then rename over the target.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Remove persisted cache files (used by clean rebuilds).
    pub fn clear(&self) -> Result<()> {
        for path in [self.cache_path(), self.semantic_path()] {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

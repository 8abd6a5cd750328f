//! Incremental cache: persisted per-file analyses and the bookkeeping that
//! decides what a refresh has to redo.

pub mod dirty;
pub mod store;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use dirty::{dirty_callers, ChangeSet, PreviousGraph};
pub use store::{CacheEntry, CacheStore, PersistedCache, CACHE_SCHEMA_VERSION};

/// A file left out of the snapshot, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// What one refresh did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildReport {
    pub generation: u64,
    pub files: usize,
    pub units: usize,
    /// Files whose cached analysis was reused.
    pub reused: usize,
    /// Files parsed and analyzed again.
    pub reparsed: usize,
    pub removed: usize,
    pub skipped: Vec<SkippedFile>,
    pub dirty_callers: usize,
    /// Units whose summary was rebuilt.
    pub summarized: usize,
    pub reembedded: usize,
    pub full_rebuild: bool,
    pub duration_ms: u64,
}

//! Cache persistence: save and load per-file analyses to/from disk.
//!
//! Uses bincode for compact binary serialization. The file starts with a
//! fixed header that is decoded on its own first, so a schema bump is
//! detected before the body is touched. Writes go through
//! [`Storage::write_atomic`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, StrataError};
use crate::graph::calls::Resolutions;
use crate::graph::types::FileAnalysis;
use crate::storage::Storage;

/// Bumped whenever any persisted type changes shape.
pub const CACHE_SCHEMA_VERSION: u32 = 2;

const MAGIC: [u8; 4] = *b"STRC";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CacheHeader {
    magic: [u8; 4],
    schema: u32,
}

/// One file's cached Layer 1-4 results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub analysis: Arc<FileAnalysis>,
    /// When the analysis was produced. Unchanged files keep their original time.
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedCache {
    pub entries: BTreeMap<PathBuf, CacheEntry>,
    pub resolutions: Resolutions,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    storage: Storage,
}

impl CacheStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Load the stored cache.
    ///
    /// `Ok(None)` when nothing is stored or the schema differs (the caller
    /// rebuilds from scratch); `CacheCorrupted` when the file is unreadable.
    pub fn load(&self) -> Result<Option<PersistedCache>> {
        let path = self.storage.cache_path();
        if !path.exists() {
            return Ok(None);
        }
        info!(path = %path.display(), "loading cache");
        let bytes = std::fs::read(&path)?;
        match decode(&bytes) {
            Ok(cache) => {
                debug!(files = cache.entries.len(), "cache loaded");
                Ok(Some(cache))
            }
            Err(StrataError::CacheVersionMismatch { found, expected }) => {
                info!(found, expected, "cache schema changed, rebuilding");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, cache: &PersistedCache) -> Result<()> {
        let path = self.storage.cache_path();
        let header = CacheHeader {
            magic: MAGIC,
            schema: CACHE_SCHEMA_VERSION,
        };
        let bytes = bincode::serialize(&(header, cache))
            .map_err(|e| StrataError::SerializeError(e.to_string()))?;
        self.storage.write_atomic(&path, &bytes)?;
        debug!(files = cache.entries.len(), bytes = bytes.len(), "cache saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.clear()
    }
}

fn decode(bytes: &[u8]) -> Result<PersistedCache> {
    let header: CacheHeader = bincode::deserialize(bytes)
        .map_err(|e| StrataError::CacheCorrupted(format!("header: {e}")))?;
    if header.magic != MAGIC {
        return Err(StrataError::CacheCorrupted("not a strata cache file".into()));
    }
    if header.schema != CACHE_SCHEMA_VERSION {
        return Err(StrataError::CacheVersionMismatch {
            found: header.schema,
            expected: CACHE_SCHEMA_VERSION,
        });
    }
    let (_, cache): (CacheHeader, PersistedCache) =
        bincode::deserialize(bytes).map_err(|e| StrataError::CacheCorrupted(format!("body: {e}")))?;
    Ok(cache)
}

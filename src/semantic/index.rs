//! Exact nearest-neighbour index over unit summaries.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::embedder::{utils::cosine_similarity, Embedder, EmbeddingVector};
use super::summary::summary_hash;
use crate::error::{Result, StrataError};
use crate::storage::Storage;

/// Bumped when the persisted layout changes.
const SEMANTIC_SCHEMA: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub qualified_name: String,
    pub vector: EmbeddingVector,
    pub summary: String,
    pub summary_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMatch {
    pub qualified_name: String,
    pub score: f32,
}

/// One record per unit, keyed by qualified name.
///
/// Records are shared through `Arc`, so cloning the index for a new snapshot
/// copies pointers, not vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticIndex {
    model_id: String,
    dims: usize,
    records: BTreeMap<String, Arc<EmbeddingRecord>>,
}

#[derive(Serialize, Deserialize)]
struct PersistedHeader {
    schema: u32,
}

impl SemanticIndex {
    pub fn new(embedder: &dyn Embedder) -> Self {
        Self {
            model_id: embedder.model_id(),
            dims: embedder.dimensions(),
            records: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, qualified_name: &str) -> Option<&EmbeddingRecord> {
        self.records.get(qualified_name).map(|r| r.as_ref())
    }

    /// Insert or replace the record for a unit.
    ///
    /// Returns `false` without calling the embedder when the stored summary
    /// is identical.
    pub fn upsert(&mut self, qualified_name: &str, summary: String, embedder: &dyn Embedder) -> Result<bool> {
        let hash = summary_hash(&summary);
        if self
            .records
            .get(qualified_name)
            .is_some_and(|r| r.summary_hash == hash)
        {
            return Ok(false);
        }
        let vector = embedder.embed_checked(&summary)?;
        self.records.insert(
            qualified_name.to_string(),
            Arc::new(EmbeddingRecord {
                qualified_name: qualified_name.to_string(),
                vector,
                summary,
                summary_hash: hash,
            }),
        );
        Ok(true)
    }

    /// Drop records whose unit no longer exists.
    pub fn retain<F: FnMut(&str) -> bool>(&mut self, mut keep: F) -> usize {
        let before = self.records.len();
        self.records.retain(|name, _| keep(name));
        before - self.records.len()
    }

    /// Embed `text` and return the `k` closest units.
    pub fn query(&self, text: &str, k: usize, embedder: &dyn Embedder) -> Result<Vec<SemanticMatch>> {
        if embedder.model_id() != self.model_id {
            return Err(StrataError::Embedding(format!(
                "index built with {}, queried with {}",
                self.model_id,
                embedder.model_id()
            )));
        }
        let vector = embedder.embed_checked(text)?;
        Ok(self.nearest(&vector, k))
    }

    /// Exact top-k by cosine similarity. Equal scores order by qualified name.
    pub fn nearest(&self, vector: &[f32], k: usize) -> Vec<SemanticMatch> {
        let mut scored: Vec<SemanticMatch> = self
            .records
            .values()
            .map(|r| SemanticMatch {
                qualified_name: r.qualified_name.clone(),
                score: cosine_similarity(vector, &r.vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.qualified_name.cmp(&b.qualified_name))
        });
        scored.truncate(k);
        scored
    }

    /// Load the persisted index, or an empty one when nothing usable is stored.
    ///
    /// Vectors are derived data: an unreadable file or a different model only
    /// costs a re-embed, so neither is an error.
    pub fn load(storage: &Storage, embedder: &dyn Embedder) -> Self {
        let path = storage.semantic_path();
        let Ok(bytes) = std::fs::read(&path) else {
            return Self::new(embedder);
        };
        let decoded = bincode::deserialize::<(PersistedHeader, SemanticIndex)>(&bytes);
        match decoded {
            Ok((header, index)) if header.schema == SEMANTIC_SCHEMA => {
                if index.model_id == embedder.model_id() && index.dims == embedder.dimensions() {
                    debug!(records = index.len(), "semantic index loaded");
                    index
                } else {
                    info!(
                        stored = %index.model_id,
                        current = %embedder.model_id(),
                        "embedding model changed, discarding vectors"
                    );
                    Self::new(embedder)
                }
            }
            Ok((header, _)) => {
                info!(found = header.schema, expected = SEMANTIC_SCHEMA, "semantic schema changed");
                Self::new(embedder)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable semantic index, re-embedding");
                Self::new(embedder)
            }
        }
    }

    pub fn save(&self, storage: &Storage) -> Result<()> {
        let bytes = bincode::serialize(&(PersistedHeader { schema: SEMANTIC_SCHEMA }, self))
            .map_err(|e| StrataError::SerializeError(e.to_string()))?;
        storage.write_atomic(&storage.semantic_path(), &bytes)?;
        debug!(records = self.len(), bytes = bytes.len(), "semantic index saved");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::semantic::embedder::HashingEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tempfile::tempdir;

    /// Maps keywords to fixed axes and counts calls.
    pub(crate) struct StubEmbedder {
        pub calls: AtomicUsize,
    }

    impl StubEmbedder {
        pub fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    impl Embedder for StubEmbedder {
        fn model_id(&self) -> String {
            "stub".into()
        }

        fn dimensions(&self) -> usize {
            3
        }

        fn embed(&self, text: &str) -> Result<EmbeddingVector> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let t = text.to_lowercase();
            // Axis 0: read-then-write-with-expiry caching behaviour.
            let caching = (t.contains("get") && t.contains("setex")) || t.contains("expir");
            let rendering = t.contains("render") || t.contains("html");
            Ok(vec![
                if caching { 1.0 } else { 0.0 },
                if rendering { 1.0 } else { 0.0 },
                0.1,
            ])
        }
    }

    #[test]
    fn test_upsert_replaces_and_skips_unchanged() {
        let embedder = StubEmbedder::new();
        let mut index = SemanticIndex::new(&embedder);

        assert!(index.upsert("m.f", "render html".into(), &embedder).unwrap());
        assert!(!index.upsert("m.f", "render html".into(), &embedder).unwrap());
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), 1);

        assert!(index.upsert("m.f", "get then setex".into(), &embedder).unwrap());
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("m.f").unwrap().vector[0], 1.0);
    }

    #[test]
    fn test_behavioural_query_ranks_caching_unit_first() {
        let embedder = StubEmbedder::new();
        let mut index = SemanticIndex::new(&embedder);
        index
            .upsert("cache.remember", "calls: get, setex\nbody: v = r.get(k)".into(), &embedder)
            .unwrap();
        index.upsert("views.page", "calls: render\n".into(), &embedder).unwrap();
        index.upsert("util.add", "def add(a, b)".into(), &embedder).unwrap();

        let hits = index
            .query("store a value that expires after a while", 3, &embedder)
            .unwrap();
        assert_eq!(hits[0].qualified_name, "cache.remember");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_ties_break_on_qualified_name() {
        let embedder = StubEmbedder::new();
        let mut index = SemanticIndex::new(&embedder);
        for name in ["b.x", "a.x", "c.x"] {
            index.upsert(name, "plain".into(), &embedder).unwrap();
        }
        let hits = index.query("plain", 2, &embedder).unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["a.x", "b.x"]);
    }

    #[test]
    fn test_retain_drops_removed_units() {
        let embedder = StubEmbedder::new();
        let mut index = SemanticIndex::new(&embedder);
        index.upsert("a.f", "x".into(), &embedder).unwrap();
        index.upsert("b.g", "y".into(), &embedder).unwrap();
        assert_eq!(index.retain(|name| name.starts_with("a.")), 1);
        assert!(index.get("b.g").is_none());
    }

    #[test]
    fn test_persistence_checks_model() {
        let dir = tempdir().unwrap();
        let storage = Storage::init(dir.path()).unwrap();
        let embedder = HashingEmbedder::new(32);
        let mut index = SemanticIndex::new(&embedder);
        index.upsert("a.f", "load user".into(), &embedder).unwrap();
        index.save(&storage).unwrap();

        let loaded = SemanticIndex::load(&storage, &embedder);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("a.f"), index.get("a.f"));

        let other = HashingEmbedder::new(64);
        assert!(SemanticIndex::load(&storage, &other).is_empty());

        std::fs::write(storage.semantic_path(), b"garbage").unwrap();
        assert!(SemanticIndex::load(&storage, &embedder).is_empty());
    }
}

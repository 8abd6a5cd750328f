//! A project root with its current snapshot.
//!
//! Readers take the current `Arc<Snapshot>` and work on it without holding
//! any lock. A refresh builds the next snapshot under the writer mutex and
//! publishes it with a single pointer swap.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{
    dirty_callers, BuildReport, CacheEntry, CacheStore, ChangeSet, PersistedCache, PreviousGraph, SkippedFile,
};
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::flow::UnitFlow;
use crate::graph::builder::{analyze_files, read_file, scan, FileContent};
use crate::graph::types::{Callee, FileAnalysis, UnitId};
use crate::graph::{disambiguate, CallGraph, Resolutions, Resolver, UnitArena};
use crate::semantic::{summarize, Embedder, HashingEmbedder, SemanticIndex, SummaryParts};
use crate::storage::Storage;

/// Immutable view of a project at one generation.
#[derive(Debug)]
pub struct Snapshot {
    pub root: PathBuf,
    /// 0 for a snapshot restored from the cache, bumped by every refresh.
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub files: BTreeMap<PathBuf, Arc<FileAnalysis>>,
    pub indexed_at: BTreeMap<PathBuf, DateTime<Utc>>,
    pub arena: UnitArena,
    pub graph: CallGraph,
    pub resolutions: Resolutions,
    pub semantic: SemanticIndex,
    pub skipped: Vec<SkippedFile>,
}

impl Snapshot {
    fn empty(root: &Path, generation: u64, embedder: &dyn Embedder) -> Self {
        Self {
            root: root.to_path_buf(),
            generation,
            built_at: Utc::now(),
            files: BTreeMap::new(),
            indexed_at: BTreeMap::new(),
            arena: UnitArena::default(),
            graph: CallGraph::default(),
            resolutions: Resolutions::new(),
            semantic: SemanticIndex::new(embedder),
            skipped: Vec::new(),
        }
    }

    /// Reassemble the graph from persisted entries without parsing anything.
    fn restore(root: &Path, cache: PersistedCache, semantic: SemanticIndex) -> Self {
        let mut files = BTreeMap::new();
        let mut indexed_at = BTreeMap::new();
        for (path, entry) in cache.entries {
            indexed_at.insert(path.clone(), entry.indexed_at);
            files.insert(path, entry.analysis);
        }
        let arena = UnitArena::build(files.values().map(|a| a.as_ref()));
        let graph = CallGraph::link(&arena, &files, &cache.resolutions);
        Self {
            root: root.to_path_buf(),
            generation: 0,
            built_at: Utc::now(),
            files,
            indexed_at,
            arena,
            graph,
            resolutions: cache.resolutions,
            semantic,
            skipped: Vec::new(),
        }
    }

    pub fn file(&self, path: &Path) -> Option<&Arc<FileAnalysis>> {
        self.files.get(path)
    }

    pub fn unit_count(&self) -> usize {
        self.arena.len()
    }

    /// Cached flow of a callable unit.
    pub fn unit_flow(&self, id: UnitId) -> Option<&UnitFlow> {
        let unit = self.arena.get(id)?;
        let local = (id - self.arena.file_range(&unit.file).start) as usize;
        self.files.get(&unit.file)?.flows.get(local)?.as_ref()
    }

    /// Summary text for a unit, built from every layer of this snapshot.
    pub fn summary(&self, id: UnitId) -> Option<String> {
        let unit = self.arena.get(id)?;
        let analysis = self.files.get(&unit.file)?;
        let flow = self.unit_flow(id);

        let callees = self
            .graph
            .calls_from(id)
            .filter_map(|edge| match &edge.callee {
                Callee::Resolved(t) => self.arena.get(*t).map(|u| u.qualified_name.as_str()),
                Callee::External(name) => Some(name.as_str()),
            })
            .collect();
        let callers = self
            .graph
            .callers_of(id)
            .into_iter()
            .filter_map(|c| self.arena.get(c).map(|u| u.qualified_name.as_str()))
            .collect();
        let imports = analysis
            .extraction
            .imports
            .iter()
            .map(|i| i.module.as_str())
            .collect();

        Some(summarize(
            unit,
            SummaryParts {
                callees,
                callers,
                complexity: flow.map(|f| f.complexity()),
                variables: flow.map(|f| f.dfg.variable_count()),
                imports,
            },
        ))
    }
}

pub struct Project {
    root: PathBuf,
    config: Config,
    storage: Storage,
    store: CacheStore,
    embedder: Arc<dyn Embedder>,
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Project {
    /// Open a project with its `config.toml` and the default embedder.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        let embedder = Arc::new(HashingEmbedder::new(config.embedding_dims));
        Self::open_with(root, config, embedder)
    }

    /// Open a project, restoring the last persisted snapshot if there is one.
    ///
    /// A corrupt cache is an error; use [`Project::open_clean`] to discard it.
    pub fn open_with(root: &Path, config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let root = root.canonicalize()?;
        let storage = Storage::init(&root)?;
        let store = CacheStore::new(storage.clone());
        let snapshot = match store.load()? {
            Some(cache) => {
                let semantic = SemanticIndex::load(&storage, embedder.as_ref());
                let snapshot = Snapshot::restore(&root, cache, semantic);
                info!(files = snapshot.files.len(), units = snapshot.unit_count(), "restored snapshot from cache");
                snapshot
            }
            None => Snapshot::empty(&root, 0, embedder.as_ref()),
        };
        Ok(Self {
            root,
            config,
            storage,
            store,
            embedder,
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Open a project ignoring (and deleting) whatever is persisted.
    pub fn open_clean(root: &Path, config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let root = root.canonicalize()?;
        CacheStore::new(Storage::init(&root)?).clear()?;
        Self::open_with(&root, config, embedder)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// The current snapshot. Cheap: one pointer copy under a read lock.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Share of file checks answered from the cache since the project opened.
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        }
    }

    /// Bring the snapshot up to date with the files on disk.
    pub fn refresh(&self) -> Result<BuildReport> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let previous = self.snapshot();
        self.rebuild(&previous, false)
    }

    /// Discard the cache and rebuild every layer from scratch.
    pub fn rebuild_clean(&self) -> Result<BuildReport> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.store.clear()?;
        let generation = self.snapshot().generation;
        let empty = Snapshot::empty(&self.root, generation, self.embedder.as_ref());
        self.rebuild(&empty, true)
    }

    fn rebuild(&self, previous: &Snapshot, full_rebuild: bool) -> Result<BuildReport> {
        let started = Instant::now();
        let now = Utc::now();
        let paths = scan(&self.root, &self.config);

        let reads: Vec<(PathBuf, Result<FileContent>)> = paths
            .into_par_iter()
            .map(|rel| {
                let content = read_file(&self.root, &rel, &self.config);
                (rel, content)
            })
            .collect();

        let mut files = BTreeMap::new();
        let mut indexed_at = BTreeMap::new();
        let mut skipped = Vec::new();
        let mut pending = Vec::new();
        for (rel, read) in reads {
            match read {
                Ok(content) => match previous.files.get(&rel) {
                    Some(cached) if cached.hash == content.hash => {
                        let at = previous.indexed_at.get(&rel).copied().unwrap_or(now);
                        indexed_at.insert(rel.clone(), at);
                        files.insert(rel, Arc::clone(cached));
                    }
                    _ => pending.push((rel, content)),
                },
                Err(e) => {
                    warn!(file = %rel.display(), error = %e, "skipping file");
                    skipped.push(SkippedFile {
                        path: rel,
                        reason: e.to_string(),
                    });
                }
            }
        }
        let reused = files.len();

        let mut changes = ChangeSet::default();
        for (rel, result) in analyze_files(pending, self.config.preview_lines) {
            match result {
                Ok(analysis) => {
                    changes.changed.insert(rel.clone());
                    indexed_at.insert(rel.clone(), now);
                    files.insert(rel, Arc::new(analysis));
                }
                Err(e) => {
                    warn!(file = %rel.display(), error = %e, "skipping file");
                    skipped.push(SkippedFile {
                        path: rel,
                        reason: e.to_string(),
                    });
                }
            }
        }
        changes.removed = previous
            .files
            .keys()
            .filter(|p| !files.contains_key(*p))
            .cloned()
            .collect::<BTreeSet<_>>();
        skipped.sort_by(|a, b| a.path.cmp(&b.path));

        self.hits.fetch_add(reused as u64, Ordering::Relaxed);
        self.misses
            .fetch_add(changes.changed.len() as u64, Ordering::Relaxed);

        // Layer 2 starts only once every changed file is analyzed.
        let renamed = disambiguate(&mut files);
        let arena = UnitArena::build(files.values().map(|a| a.as_ref()));
        let dirty = dirty_callers(
            &PreviousGraph {
                arena: &previous.arena,
                graph: &previous.graph,
            },
            &files,
            &changes,
        );
        let resolver = Resolver::new(&arena, &files);
        let resolutions: Resolutions = files
            .keys()
            .map(|path| {
                // Stored resolutions name the old units once any file is re-keyed.
                let resolved = if changes.is_changed(path) || !renamed.is_empty() {
                    resolver.resolve_file(path, None, |_| true)
                } else {
                    let prior = previous.resolutions.get(path).map(Vec::as_slice);
                    resolver.resolve_file(path, prior, |q| dirty.contains(q))
                };
                (path.clone(), resolved)
            })
            .collect();
        let graph = CallGraph::link(&arena, &files, &resolutions);

        let mut next = Snapshot {
            root: self.root.clone(),
            generation: previous.generation + 1,
            built_at: now,
            files,
            indexed_at,
            arena,
            graph,
            resolutions,
            semantic: previous.semantic.clone(),
            skipped,
        };
        let stale = if full_rebuild || !renamed.is_empty() {
            None
        } else {
            Some(stale_units(previous, &next, &changes, &dirty))
        };
        let (summarized, reembedded, dropped) = self.update_semantic(&mut next, stale.as_ref());

        if !changes.is_empty() || !renamed.is_empty() || full_rebuild || !self.storage.cache_path().exists() {
            self.store.save(&persisted(&next))?;
        }
        if reembedded > 0 || dropped > 0 || !self.storage.semantic_path().exists() {
            next.semantic.save(&self.storage)?;
        }

        let report = BuildReport {
            generation: next.generation,
            files: next.files.len(),
            units: next.unit_count(),
            reused,
            reparsed: changes.changed.len(),
            removed: changes.removed.len(),
            skipped: next.skipped.clone(),
            dirty_callers: dirty.len(),
            summarized,
            reembedded,
            full_rebuild,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            generation = report.generation,
            files = report.files,
            reused = report.reused,
            reparsed = report.reparsed,
            removed = report.removed,
            skipped = report.skipped.len(),
            duration_ms = report.duration_ms,
            "snapshot rebuilt"
        );

        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(next);
        Ok(report)
    }

    /// Re-embed units whose summary changed and drop vanished ones.
    ///
    /// Only `stale` units are summarized again; `None` means all of them.
    fn update_semantic(&self, snapshot: &mut Snapshot, stale: Option<&BTreeSet<UnitId>>) -> (usize, usize, usize) {
        let ids: Vec<UnitId> = match stale {
            Some(stale) => stale.iter().copied().collect(),
            None => (0..snapshot.unit_count() as UnitId).collect(),
        };
        let summaries: Vec<(String, String)> = ids
            .into_iter()
            .filter_map(|id| {
                let qname = snapshot.arena.get(id)?.qualified_name.clone();
                snapshot.summary(id).map(|s| (qname, s))
            })
            .collect();

        let summarized = summaries.len();
        let mut reembedded = 0;
        for (qname, summary) in summaries {
            match snapshot.semantic.upsert(&qname, summary, self.embedder.as_ref()) {
                Ok(true) => reembedded += 1,
                Ok(false) => {}
                Err(e) => warn!(unit = %qname, error = %e, "embedding failed"),
            }
        }
        let arena = &snapshot.arena;
        let dropped = snapshot.semantic.retain(|q| arena.id_of(q).is_some());
        debug!(summarized, reembedded, dropped, records = snapshot.semantic.len(), "semantic index updated");
        (summarized, reembedded, dropped)
    }
}

/// Units of `next` whose summary may differ from the one last embedded.
///
/// A summary reads the unit's own file and its callers and callees, so the
/// stale set is every unit of a changed file, every re-resolved caller, the
/// old and new callees of both, and anything missing from the index.
fn stale_units(previous: &Snapshot, next: &Snapshot, changes: &ChangeSet, dirty: &HashSet<String>) -> BTreeSet<UnitId> {
    let touched: Vec<UnitId> = changes
        .changed
        .iter()
        .flat_map(|path| next.arena.file_range(path))
        .chain(dirty.iter().filter_map(|q| next.arena.id_of(q)))
        .collect();
    let mut stale: BTreeSet<UnitId> = touched.iter().copied().collect();
    for &id in &touched {
        stale.extend(next.graph.callees_of(id));
    }

    let before = changes
        .changed
        .iter()
        .chain(&changes.removed)
        .flat_map(|path| previous.arena.file_range(path))
        .chain(dirty.iter().filter_map(|q| previous.arena.id_of(q)));
    for id in before {
        for callee in previous.graph.callees_of(id) {
            if let Some(now) = previous
                .arena
                .get(callee)
                .and_then(|u| next.arena.id_of(&u.qualified_name))
            {
                stale.insert(now);
            }
        }
    }

    stale.extend(
        next.arena
            .units()
            .iter()
            .enumerate()
            .filter(|(_, u)| next.semantic.get(&u.qualified_name).is_none())
            .map(|(id, _)| id as UnitId),
    );
    stale
}

fn persisted(snapshot: &Snapshot) -> PersistedCache {
    let entries = snapshot
        .files
        .iter()
        .map(|(path, analysis)| {
            let indexed_at = snapshot
                .indexed_at
                .get(path)
                .copied()
                .unwrap_or(snapshot.built_at);
            (
                path.clone(),
                CacheEntry {
                    analysis: Arc::clone(analysis),
                    indexed_at,
                },
            )
        })
        .collect();
    PersistedCache {
        entries,
        resolutions: snapshot.resolutions.clone(),
    }
}

/// Resolve a user-supplied file argument to a path relative to `root`.
///
/// `.` and `..` are folded lexically; a path that leaves the root is an
/// error rather than a read outside the project.
pub fn relative_path(root: &Path, file: &Path) -> Result<PathBuf> {
    let outside = || StrataError::InvalidRequest(format!("{} is outside {}", file.display(), root.display()));
    let rel = if file.is_relative() {
        file.to_path_buf()
    } else {
        let absolute = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
        absolute.strip_prefix(root).map_err(|_| outside())?.to_path_buf()
    };

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in rel.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop().ok_or_else(outside)?;
            }
            Component::Normal(part) => parts.push(part),
            Component::RootDir | Component::Prefix(_) => return Err(outside()),
        }
    }
    Ok(parts.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, text).unwrap();
    }

    fn open(root: &Path) -> Project {
        Project::open_with(root, Config::default(), Arc::new(HashingEmbedder::new(32))).unwrap()
    }

    #[test]
    fn test_first_refresh_builds_everything() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return g()\n\ndef g():\n    return 1\n");
        let project = open(dir.path());
        assert_eq!(project.snapshot().generation, 0);

        let report = project.refresh().unwrap();
        assert_eq!(report.reparsed, 1);
        assert_eq!(report.reused, 0);
        assert_eq!(report.units, 2);
        assert_eq!(report.reembedded, 2);

        let snap = project.snapshot();
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.graph.resolved_count(), 1);
        assert_eq!(snap.semantic.len(), 2);
        assert!(project.storage().cache_path().exists());
        assert!(project.storage().semantic_path().exists());
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return 1\n");
        let project = open(dir.path());
        project.refresh().unwrap();
        let held = project.snapshot();

        write(dir.path(), "b.py", "def g():\n    return 2\n");
        project.refresh().unwrap();

        assert_eq!(held.files.len(), 1, "old snapshot must not change");
        assert_eq!(project.snapshot().files.len(), 2);
        assert_eq!(project.snapshot().generation, held.generation + 1);
    }

    #[test]
    fn test_parse_failures_are_skipped() {
        let dir = tempdir().unwrap();
        write(dir.path(), "ok.py", "def f():\n    return 1\n");
        fs::write(dir.path().join("bin.py"), [0u8, 1, 2, 255]).unwrap();
        let project = open(dir.path());

        let report = project.refresh().unwrap();
        assert_eq!(report.files, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, PathBuf::from("bin.py"));
        assert_eq!(project.snapshot().skipped.len(), 1);
    }

    #[test]
    fn test_restore_from_cache_without_parsing() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return g()\n\ndef g():\n    return 1\n");
        open(dir.path()).refresh().unwrap();

        let reopened = open(dir.path());
        let snap = reopened.snapshot();
        assert_eq!(snap.generation, 0);
        assert_eq!(snap.files.len(), 1);
        assert_eq!(snap.graph.resolved_count(), 1);
        assert_eq!(snap.semantic.len(), 2);

        let report = reopened.refresh().unwrap();
        assert_eq!(report.reparsed, 0);
        assert_eq!(report.reused, 1);
        assert_eq!(report.reembedded, 0);
        assert!((reopened.cache_hit_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rebuild_clean_reparses_everything() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return 1\n");
        let project = open(dir.path());
        project.refresh().unwrap();

        let report = project.rebuild_clean().unwrap();
        assert!(report.full_rebuild);
        assert_eq!(report.reparsed, 1);
        assert_eq!(report.generation, 2);
    }

    #[test]
    fn test_refresh_summarizes_only_affected_units() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "def f():\n    return g()\n\ndef g():\n    return 1\n");
        write(dir.path(), "b.py", "def h():\n    return 2\n");
        write(dir.path(), "c.py", "from a import g\n\ndef k():\n    return g()\n");
        let project = open(dir.path());
        assert_eq!(project.refresh().unwrap().summarized, 4);
        assert_eq!(project.refresh().unwrap().summarized, 0);

        write(dir.path(), "b.py", "def h():\n    x = 2\n    return x\n");
        let report = project.refresh().unwrap();
        assert_eq!(report.summarized, 1, "only h changed");

        // k with its file, g because k calls it.
        write(dir.path(), "c.py", "from a import g\n\ndef k():\n    y = g()\n    return y\n");
        let report = project.refresh().unwrap();
        assert_eq!(report.summarized, 2);
        let snap = project.snapshot();
        let g = snap.arena.id_of("a.g").unwrap();
        assert_eq!(snap.semantic.get("a.g").unwrap().summary, snap.summary(g).unwrap());
        assert_eq!(snap.semantic.len(), 4);
    }

    #[test]
    fn test_relative_path() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "src/a.py", "x = 1\n");
        assert_eq!(
            relative_path(&root, &root.join("src/a.py")).unwrap(),
            PathBuf::from("src/a.py")
        );
        assert_eq!(relative_path(&root, Path::new("./src/a.py")).unwrap(), PathBuf::from("src/a.py"));
        assert!(relative_path(&root, Path::new("/definitely/elsewhere.py")).is_err());
    }

    #[test]
    fn test_relative_path_folds_parent_components() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "a.py", "x = 1\n");
        assert_eq!(relative_path(&root, Path::new("src/../a.py")).unwrap(), PathBuf::from("a.py"));
        assert_eq!(relative_path(&root, Path::new("./src/./b/../a.py")).unwrap(), PathBuf::from("src/a.py"));

        for escaping in ["../x.py", "src/../../x.py", "../../etc/passwd"] {
            let err = relative_path(&root, Path::new(escaping)).unwrap_err();
            assert!(matches!(err, StrataError::InvalidRequest(_)), "{escaping}: {err:?}");
        }
    }

    #[test]
    fn test_queries_refuse_paths_outside_the_root() {
        let outer = tempdir().unwrap();
        write(outer.path(), "secret.py", "def leak():\n    return 1\n");
        write(outer.path(), "proj/a.py", "def f():\n    return 1\n");
        let project = open(&outer.path().join("proj"));
        project.refresh().unwrap();

        let err = crate::query::extract(&project, Path::new("../secret.py")).unwrap_err();
        assert!(matches!(err, StrataError::InvalidRequest(_)), "{err:?}");
        let resp = crate::query::extract(&project, Path::new("sub/../a.py")).unwrap();
        assert!(resp.indexed);
    }
}

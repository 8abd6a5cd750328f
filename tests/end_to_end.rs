//! Whole-pipeline tests against real projects on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata::cache::CacheStore;
use strata::graph::Callee;
use strata::query;
use strata::semantic::EmbeddingVector;
use strata::storage::Storage;
use strata::{Config, Embedder, HashingEmbedder, Project, StrataError};
use tempfile::tempdir;

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, text).unwrap();
}

fn open(root: &Path) -> Project {
    let config = Config {
        watch: false,
        ..Config::default()
    };
    Project::open_with(root, config, Arc::new(HashingEmbedder::new(64))).unwrap()
}

const X_PY: &str = "from y import bar\n\ndef foo():\n    return bar()\n";
const Y_PY: &str = "def bar():\n    return 1\n";

#[test]
fn two_file_project_edit_reindexes_only_the_edited_file() {
    let dir = tempdir().unwrap();
    write(dir.path(), "x.py", X_PY);
    write(dir.path(), "y.py", Y_PY);
    let project = open(dir.path());
    project.refresh().unwrap();

    let calls = query::calls(&project.snapshot());
    assert_eq!(calls.edges.len(), 1, "edges: {:?}", calls.edges);
    let edge = &calls.edges[0];
    assert_eq!((edge.caller.as_str(), edge.callee.as_str()), ("x.foo", "y.bar"));
    assert!(edge.resolved);

    let before = project.snapshot();
    let x_hash = before.files[Path::new("x.py")].hash.clone();
    let x_indexed = before.indexed_at[Path::new("x.py")];
    let y_hash = before.files[Path::new("y.py")].hash.clone();

    write(dir.path(), "y.py", "def bar():\n    value = 41\n    return value + 1\n");
    let report = project.refresh().unwrap();
    assert_eq!(report.reparsed, 1);
    assert_eq!(report.reused, 1);

    let after = project.snapshot();
    assert_eq!(after.files[Path::new("x.py")].hash, x_hash, "x.py must keep its hash");
    assert_eq!(after.indexed_at[Path::new("x.py")], x_indexed, "x.py must not be re-indexed");
    assert_ne!(after.files[Path::new("y.py")].hash, y_hash);
    assert!(Arc::ptr_eq(
        &before.files[Path::new("x.py")],
        &after.files[Path::new("x.py")]
    ));

    let calls = query::calls(&after);
    assert_eq!(calls.edges.len(), 1);
    assert_eq!(calls.edges[0].callee, "y.bar");
    let cfg = query::cfg(&project, Path::new("y.py"), "bar").unwrap();
    assert_eq!(cfg.complexity, 1);
    let dfg = query::dfg(&project, Path::new("y.py"), "bar").unwrap();
    assert!(dfg.variables.contains_key("value"), "bar's DFG must reflect the edit");

    // The persisted cache agrees with the snapshot.
    let stored = CacheStore::new(Storage::open(project.root())).load().unwrap().unwrap();
    assert_eq!(stored.entries[Path::new("x.py")].indexed_at, x_indexed);
    assert_eq!(stored.entries[Path::new("y.py")].analysis.hash, after.files[Path::new("y.py")].hash);
}

#[test]
fn refresh_is_idempotent() {
    let dir = tempdir().unwrap();
    write(dir.path(), "x.py", X_PY);
    write(dir.path(), "y.py", Y_PY);
    write(dir.path(), "src/lib.rs", "pub fn a() -> u32 { b() }\nfn b() -> u32 { 1 }\n");
    let project = open(dir.path());

    project.refresh().unwrap();
    let first = project.snapshot();
    let cache_bytes = fs::read(project.storage().cache_path()).unwrap();

    let report = project.refresh().unwrap();
    let second = project.snapshot();
    assert_eq!(report.reparsed, 0, "second run must touch no cache entries");
    assert_eq!(report.reused, 3);
    assert_eq!(report.reembedded, 0);
    assert_eq!(first.arena.units(), second.arena.units());
    assert_eq!(first.graph.edges(), second.graph.edges());
    for (path, analysis) in &first.files {
        assert_eq!(analysis.hash, second.files[path].hash);
    }
    assert_eq!(fs::read(project.storage().cache_path()).unwrap(), cache_bytes);
}

#[test]
fn editing_one_body_leaves_unrelated_entries_untouched() {
    let dir = tempdir().unwrap();
    write(dir.path(), "a.py", "def a():\n    return 1\n");
    write(dir.path(), "b.py", "from a import a\n\ndef b():\n    return a()\n");
    write(dir.path(), "c.py", "def c():\n    return 3\n");
    let project = open(dir.path());
    project.refresh().unwrap();
    let before = project.snapshot();

    write(dir.path(), "a.py", "def a():\n    x = 2\n    return x\n");
    let report = project.refresh().unwrap();
    let after = project.snapshot();

    assert_eq!(report.reparsed, 1);
    for untouched in ["b.py", "c.py"] {
        let p = Path::new(untouched);
        assert_eq!(before.indexed_at[p], after.indexed_at[p], "{untouched} was re-indexed");
        assert_eq!(before.files[p].hash, after.files[p].hash);
    }
    let a_flow = after.files[Path::new("a.py")].flow_for("a").unwrap().1;
    assert_eq!(a_flow.dfg.variable_count(), 1);
    assert_eq!(query::impact(&after, "a.a", None).unwrap().callers[0].unit, "b.b");
}

#[test]
fn deleting_a_file_unresolves_its_callers() {
    let dir = tempdir().unwrap();
    write(dir.path(), "x.py", X_PY);
    write(dir.path(), "y.py", Y_PY);
    let project = open(dir.path());
    project.refresh().unwrap();

    fs::remove_file(dir.path().join("y.py")).unwrap();
    let report = project.refresh().unwrap();
    assert_eq!(report.removed, 1);

    let snap = project.snapshot();
    assert!(snap.file(Path::new("y.py")).is_none());
    let calls = query::calls(&snap);
    assert_eq!(calls.edges.len(), 1);
    assert!(!calls.edges[0].resolved);
    assert_eq!(calls.edges[0].callee, "bar");
}

#[test]
fn new_definition_resolves_previously_external_call() {
    let dir = tempdir().unwrap();
    write(dir.path(), "x.py", X_PY);
    let project = open(dir.path());
    project.refresh().unwrap();
    assert_eq!(query::calls(&project.snapshot()).resolved, 0);

    write(dir.path(), "y.py", Y_PY);
    project.refresh().unwrap();
    let calls = query::calls(&project.snapshot());
    assert_eq!(calls.resolved, 1);
    assert_eq!(calls.edges[0].callee, "y.bar");
}

#[test]
fn call_graph_edges_point_at_live_units() {
    let dir = tempdir().unwrap();
    write(dir.path(), "app/main.py", "from app import util\n\ndef run():\n    util.helper()\n    print('x')\n");
    write(dir.path(), "app/util.py", "def helper():\n    return inner()\n\ndef inner():\n    return 0\n");
    write(
        dir.path(),
        "web/index.js",
        "import { fmt } from './fmt';\nfunction show(v) { return fmt(v); }\n",
    );
    write(dir.path(), "web/fmt.js", "export function fmt(v) { return String(v); }\n");
    write(
        dir.path(),
        "go/main.go",
        "package main\n\nfunc main() {\n\thelper()\n}\n",
    );
    write(dir.path(), "go/helper.go", "package main\n\nfunc helper() int {\n\treturn 1\n}\n");
    let project = open(dir.path());
    project.refresh().unwrap();

    let snap = project.snapshot();
    let calls = query::calls(&snap);
    assert!(
        calls
            .edges
            .iter()
            .any(|e| e.caller == "app.util.helper" && e.callee == "app.util.inner" && e.resolved),
        "edges: {:?}",
        calls.edges
    );
    assert!(calls.edges.iter().any(|e| e.callee == "print" && !e.resolved));
    assert_eq!(calls.total, calls.resolved + calls.external);
    for edge in snap.graph.edges() {
        assert!(snap.arena.get(edge.caller).is_some());
        if let Callee::Resolved(target) = edge.callee {
            assert!(snap.arena.get(target).is_some());
        }
    }
}

#[test]
fn crate_root_and_binary_keep_their_own_units() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/lib.rs", "pub fn run() -> u32 { 1 }\npub fn go() -> u32 { run() }\n");
    write(dir.path(), "src/main.rs", "fn run() {}\nfn main() { run() }\n");
    let project = open(dir.path());
    project.refresh().unwrap();

    let snap = project.snapshot();
    let mut names: Vec<&str> = snap.arena.units().iter().map(|u| u.qualified_name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["src.lib.go", "src.lib.run", "src.main.main", "src.main.run"]);

    let calls = query::calls(&snap);
    let callee_of = |caller: &str| {
        calls
            .edges
            .iter()
            .find(|e| e.caller == caller)
            .map(|e| e.callee.clone())
            .unwrap()
    };
    assert_eq!(callee_of("src.lib.go"), "src.lib.run");
    assert_eq!(callee_of("src.main.main"), "src.main.run");
    assert_eq!(query::impact(&snap, "src.lib.run", None).unwrap().callers[0].unit, "src.lib.go");
    assert_eq!(snap.semantic.len(), 4);

    // Removing the binary gives the library its short names back.
    fs::remove_file(dir.path().join("src/main.rs")).unwrap();
    project.refresh().unwrap();
    let snap = project.snapshot();
    assert!(snap.arena.id_of("src.run").is_some());
    assert_eq!(query::calls(&snap).edges[0].callee, "src.run");
}

#[test]
fn slice_keeps_only_dependencies_of_the_return() {
    let dir = tempdir().unwrap();
    write(dir.path(), "s.py", "def f():\n    a = 1\n    b = a + 1\n    c = 99\n    return b\n");
    let project = open(dir.path());
    project.refresh().unwrap();

    let resp = query::slice(&project, Path::new("s.py"), "f", 5).unwrap();
    let lines = resp.slice.line_numbers();
    assert!(lines.contains(&2) && lines.contains(&3) && lines.contains(&5), "{lines:?}");
    assert!(!lines.contains(&4), "unrelated c = 99 must be excluded: {lines:?}");
}

#[test]
fn corrupt_cache_is_a_hard_error_until_clean_rebuild() {
    let dir = tempdir().unwrap();
    write(dir.path(), "x.py", X_PY);
    open(dir.path()).refresh().unwrap();

    let storage = Storage::open(&dir.path().canonicalize().unwrap());
    fs::write(storage.cache_path(), b"garbage").unwrap();
    let err = Project::open_with(dir.path(), Config::default(), Arc::new(HashingEmbedder::new(64)))
        .err()
        .expect("corrupt cache must not open");
    assert!(matches!(err, StrataError::CacheCorrupted(_)), "got {err:?}");

    let project = Project::open_clean(dir.path(), Config::default(), Arc::new(HashingEmbedder::new(64))).unwrap();
    let report = project.refresh().unwrap();
    assert_eq!(report.reparsed, 1);
    assert!(open(dir.path()).snapshot().file(Path::new("x.py")).is_some());
}

/// Puts caching behaviour (a read followed by a write with expiry) on one
/// axis and rendering on another.
struct StubEmbedder;

impl Embedder for StubEmbedder {
    fn model_id(&self) -> String {
        "stub-3".into()
    }

    fn dimensions(&self) -> usize {
        3
    }

    fn embed(&self, text: &str) -> strata::Result<EmbeddingVector> {
        let t = text.to_lowercase();
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
fn semantic_query_finds_behaviour_without_literal_match() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "store.py",
        "def remember(client, key, compute):\n    value = client.get(key)\n    if value is None:\n        value = compute()\n        client.setex(key, 60, value)\n    return value\n",
    );
    write(dir.path(), "views.py", "def page(req):\n    return render(req)\n");
    write(dir.path(), "util.py", "def add(a, b):\n    return a + b\n");
    let project = Project::open_with(dir.path(), Config::default(), Arc::new(StubEmbedder)).unwrap();
    project.refresh().unwrap();

    let resp = query::semantic(&project, "keep a result around until it expires", 3).unwrap();
    let names: Vec<&str> = resp.hits.iter().map(|h| h.qualified_name.as_str()).collect();
    assert_eq!(names[0], "store.remember", "ranking: {names:?}");
    assert!(resp.hits[0].score > resp.hits[1].score);

    // Same summaries, same vectors: a second refresh embeds nothing.
    assert_eq!(project.refresh().unwrap().reembedded, 0);
}

#[test]
fn extract_parses_unindexed_files_on_the_fly() {
    let dir = tempdir().unwrap();
    write(dir.path(), "x.py", X_PY);
    let project = open(dir.path());
    project.refresh().unwrap();

    write(dir.path(), "build/gen.py", "def generated():\n    pass\n");
    let resp = query::extract(&project, &PathBuf::from("build/gen.py")).unwrap();
    assert!(!resp.indexed);
    assert_eq!(resp.units[0].qualified_name, "build.gen.generated");
}

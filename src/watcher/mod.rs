//! File watcher: debounced change notifications for a project root.
//!
//! The watcher only decides *whether* something relevant changed; the
//! callback (a project refresh in the daemon) works out what.

use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::graph::builder::should_ignore;
use crate::parser::SupportedLanguage;

/// Default debounce duration for file events.
const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Start watching `root` recursively.
///
/// `on_change` receives the changed source files, relative to `root`, once
/// per debounced batch. Returns a handle that keeps the watcher alive; drop it
/// to stop watching.
pub fn start_watching<F>(
    root: &Path,
    debounce_ms: u64,
    extra_ignored: Vec<String>,
    on_change: F,
) -> Result<WatcherHandle, notify::Error>
where
    F: Fn(Vec<PathBuf>) + Send + 'static,
{
    let debounce = if debounce_ms == 0 {
        Duration::from_millis(DEFAULT_DEBOUNCE_MS)
    } else {
        Duration::from_millis(debounce_ms)
    };

    let root_owned = root.to_path_buf();
    let mut debouncer = new_debouncer(debounce, move |result: Result<Vec<DebouncedEvent>, notify::Error>| {
        match result {
            Ok(events) => {
                let changed = relevant_paths(&events, &root_owned, &extra_ignored);
                if !changed.is_empty() {
                    debug!(count = changed.len(), "source files changed");
                    on_change(changed);
                }
            }
            Err(e) => {
                warn!(error = %e, "file watcher error");
            }
        }
    })?;

    debouncer
        .watcher()
        .watch(root, notify::RecursiveMode::Recursive)?;

    info!(root = %root.display(), debounce_ms = debounce.as_millis() as u64, "file watcher started");

    Ok(WatcherHandle {
        _debouncer: debouncer,
    })
}

/// Settled events on supported, non-ignored files, deduplicated and relative
/// to `root`.
fn relevant_paths(events: &[DebouncedEvent], root: &Path, extra_ignored: &[String]) -> Vec<PathBuf> {
    let mut paths = BTreeSet::new();
    for event in events {
        // Ongoing writes: wait for the batch where they settle.
        if event.kind == DebouncedEventKind::AnyContinuous {
            continue;
        }
        let rel = event.path.strip_prefix(root).unwrap_or(&event.path);
        if should_ignore(rel, extra_ignored) || SupportedLanguage::from_path(rel).is_none() {
            continue;
        }
        paths.insert(rel.to_path_buf());
    }
    paths.into_iter().collect()
}

/// Handle that keeps the file watcher alive.
/// Drop this to stop watching.
pub struct WatcherHandle {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::tempdir;

    fn event(path: PathBuf, kind: DebouncedEventKind) -> DebouncedEvent {
        DebouncedEvent { path, kind }
    }

    #[test]
    fn test_relevant_paths_filters_and_dedupes() {
        let root = PathBuf::from("/work/project");
        let events = vec![
            event(root.join("src/a.py"), DebouncedEventKind::Any),
            event(root.join("src/a.py"), DebouncedEventKind::Any),
            event(root.join("README.md"), DebouncedEventKind::Any),
            event(root.join(".strata/cache.bin"), DebouncedEventKind::Any),
            event(root.join("node_modules/x/index.js"), DebouncedEventKind::Any),
            event(root.join("gen/b.go"), DebouncedEventKind::Any),
            event(root.join("src/c.rs"), DebouncedEventKind::AnyContinuous),
        ];
        let paths = relevant_paths(&events, &root, &["gen".to_string()]);
        assert_eq!(paths, vec![PathBuf::from("src/a.py")]);
    }

    #[test]
    fn test_root_inside_ignored_name_still_watched() {
        let root = PathBuf::from("/tmp/build/project");
        let events = vec![event(root.join("main.go"), DebouncedEventKind::Any)];
        assert_eq!(relevant_paths(&events, &root, &[]), vec![PathBuf::from("main.go")]);
    }

    #[test]
    fn test_watcher_reports_new_file() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (tx, rx) = mpsc::channel();
        let _handle = start_watching(&root, 50, Vec::new(), move |paths| {
            let _ = tx.send(paths);
        })
        .unwrap();

        std::fs::write(root.join("fresh.py"), "def f():\n    pass\n").unwrap();
        let paths = rx.recv_timeout(Duration::from_secs(5)).expect("change reported");
        assert!(paths.contains(&PathBuf::from("fresh.py")), "{paths:?}");
    }
}

//! Which call sites must be re-resolved after a set of files changed.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::graph::types::FileAnalysis;
use crate::graph::{CallGraph, UnitArena};

/// Files whose analysis differs from the previous snapshot.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// New or re-analyzed files.
    pub changed: BTreeSet<PathBuf>,
    /// Files present before and gone (or unparseable) now.
    pub removed: BTreeSet<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn is_changed(&self, path: &Path) -> bool {
        self.changed.contains(path)
    }
}

/// The previous snapshot's view, as needed to find stale resolutions.
pub struct PreviousGraph<'a> {
    pub arena: &'a UnitArena,
    pub graph: &'a CallGraph,
}

/// Qualified names of callers whose calls need resolving again.
///
/// Files in `changes.changed` are always resolved from scratch; this set
/// covers the callers elsewhere:
/// - previous callers of any unit in a changed or removed file;
/// - callers holding a call whose name a changed file now defines.
pub fn dirty_callers(
    previous: &PreviousGraph<'_>,
    current: &BTreeMap<PathBuf, Arc<FileAnalysis>>,
    changes: &ChangeSet,
) -> HashSet<String> {
    let mut dirty = HashSet::new();
    if changes.is_empty() {
        return dirty;
    }

    for path in changes.changed.iter().chain(&changes.removed) {
        for (id, _) in previous.arena.file_units(path) {
            for caller in previous.graph.callers_of(id) {
                if let Some(unit) = previous.arena.get(caller) {
                    dirty.insert(unit.qualified_name.clone());
                }
            }
        }
    }

    let defined: HashSet<&str> = changes
        .changed
        .iter()
        .filter_map(|p| current.get(p))
        .flat_map(|a| a.units().iter().map(|u| u.name.as_str()))
        .collect();
    if defined.is_empty() {
        return dirty;
    }

    for (path, analysis) in current {
        if changes.is_changed(path) {
            continue;
        }
        let units = analysis.units();
        for call in &analysis.extraction.calls {
            if defined.contains(call.name.as_str()) {
                if let Some(caller) = units.get(call.caller) {
                    dirty.insert(caller.qualified_name.clone());
                }
            }
        }
    }
    dirty
}

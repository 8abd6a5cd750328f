//! Flat table of every unit in a snapshot.
//!
//! Units are numbered file by file in path order, so each file owns a
//! contiguous id range. Ids are only meaningful within the arena that
//! produced them; anything persisted refers to units by qualified name.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::types::{CodeUnit, FileAnalysis, UnitId};

#[derive(Debug, Clone, Default)]
pub struct UnitArena {
    units: Vec<CodeUnit>,
    by_qname: HashMap<String, UnitId>,
    files: BTreeMap<PathBuf, Range<UnitId>>,
}

impl UnitArena {
    pub fn build<'a, I>(analyses: I) -> Self
    where
        I: IntoIterator<Item = &'a FileAnalysis>,
    {
        let mut arena = UnitArena::default();
        for analysis in analyses {
            let start = arena.units.len() as UnitId;
            for unit in analysis.units() {
                let id = arena.units.len() as UnitId;
                if arena.by_qname.insert(unit.qualified_name.clone(), id).is_some() {
                    warn!(unit = %unit.qualified_name, file = %analysis.path.display(), "duplicate qualified name");
                }
                arena.units.push(unit.clone());
            }
            let end = arena.units.len() as UnitId;
            arena.files.insert(analysis.path.clone(), start..end);
        }
        arena
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, id: UnitId) -> Option<&CodeUnit> {
        self.units.get(id as usize)
    }

    pub fn units(&self) -> &[CodeUnit] {
        &self.units
    }

    pub fn id_of(&self, qualified_name: &str) -> Option<UnitId> {
        self.by_qname.get(qualified_name).copied()
    }

    /// Id range of a file's units; empty for unknown files.
    pub fn file_range(&self, path: &Path) -> Range<UnitId> {
        self.files.get(path).cloned().unwrap_or(0..0)
    }

    pub fn file_units(&self, path: &Path) -> impl Iterator<Item = (UnitId, &CodeUnit)> + '_ {
        self.file_range(path)
            .map(move |id| (id, &self.units[id as usize]))
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Units whose qualified name equals `name`, or else whose qualified name
    /// ends with `.name` (so `login` and `Session.login` both match
    /// `app.auth.Session.login`).
    pub fn lookup(&self, name: &str) -> Vec<UnitId> {
        if let Some(id) = self.id_of(name) {
            return vec![id];
        }
        let suffix = format!(".{name}");
        self.units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.qualified_name.ends_with(&suffix) || u.name == name)
            .map(|(i, _)| i as UnitId)
            .collect()
    }
}

//! Core types for Layers 1 and 2.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::flow::UnitFlow;
use crate::parser::SupportedLanguage;

/// Index of a unit in a snapshot's arena. Not stable across snapshots.
pub type UnitId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Function,
    Method,
    Class,
}

impl UnitKind {
    pub fn is_callable(&self) -> bool {
        matches!(self, UnitKind::Function | UnitKind::Method)
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Function => write!(f, "function"),
            UnitKind::Method => write!(f, "method"),
            UnitKind::Class => write!(f, "class"),
        }
    }
}

/// A function, method or class found in a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeUnit {
    /// Module key plus dotted enclosing scopes, e.g. `src.auth.Session.login`.
    pub qualified_name: String,
    pub name: String,
    pub kind: UnitKind,
    pub signature: String,
    /// Path relative to the project root.
    pub file: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    pub docstring: Option<String>,
    /// Qualified name of the enclosing scope, if any.
    pub parent: Option<String>,
    /// First lines of the unit's text.
    pub preview: String,
}

impl CodeUnit {
    /// Simple name of the enclosing scope (`Session` for `src.auth.Session`).
    pub fn parent_name(&self) -> Option<&str> {
        self.parent
            .as_deref()
            .map(|p| p.rsplit('.').next().unwrap_or(p))
    }

    pub fn contains_line(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedName {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportedName {
    /// The name this import binds in the importing file.
    pub fn local(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// One import statement, normalized across languages.
///
/// `from a.b import c as d` is `module: "a.b", names: [c as d]`;
/// `import a.b as m` is `module: "a.b", alias: Some("m")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    /// Module path as written, e.g. `crate::auth`, `./util`, `github.com/x/y`.
    pub module: String,
    pub names: Vec<ImportedName>,
    pub alias: Option<String>,
    pub wildcard: bool,
    pub line: usize,
}

impl ImportRecord {
    /// The name under which the module itself is visible, if any.
    pub fn module_binding(&self) -> Option<&str> {
        if let Some(alias) = &self.alias {
            return Some(alias);
        }
        if !self.names.is_empty() || self.wildcard {
            return None;
        }
        self.module
            .rsplit(|c| c == '.' || c == '/' || c == ':')
            .find(|s| !s.is_empty())
    }
}

/// A call expression inside a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// Index of the calling unit within its file.
    pub caller: usize,
    /// Simple callee name (`validate` for `auth.validate(x)`).
    pub name: String,
    /// Receiver text (`auth`, `self`, `Config`), if the call had one.
    pub receiver: Option<String>,
    pub line: usize,
}

/// Layer 1 output for one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileExtraction {
    pub path: PathBuf,
    pub language: Option<SupportedLanguage>,
    /// Prefix of every qualified name in this file.
    pub module: String,
    pub units: Vec<CodeUnit>,
    pub imports: Vec<ImportRecord>,
    pub calls: Vec<CallSite>,
    pub has_errors: bool,
}

/// Everything the cache stores for a file: Layer 1 plus per-unit Layers 3-4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub language: SupportedLanguage,
    /// Hex SHA-256 of the file bytes.
    pub hash: String,
    /// Modification time in seconds since the epoch.
    pub modified: u64,
    pub extraction: FileExtraction,
    /// Parallel to `extraction.units`; `None` for classes.
    pub flows: Vec<Option<UnitFlow>>,
}

impl FileAnalysis {
    pub fn units(&self) -> &[CodeUnit] {
        &self.extraction.units
    }

    /// Flow results for the callable unit with the given simple or qualified name.
    pub fn flow_for(&self, unit: &str) -> Option<(&CodeUnit, &UnitFlow)> {
        self.extraction
            .units
            .iter()
            .zip(self.flows.iter())
            .filter(|(u, _)| u.qualified_name == unit || u.name == unit)
            .find_map(|(u, f)| f.as_ref().map(|f| (u, f)))
    }
}

/// Callee side of a call edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Callee {
    Resolved(UnitId),
    External(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller: UnitId,
    pub callee: Callee,
    pub line: usize,
}

impl CallEdge {
    pub fn is_resolved(&self) -> bool {
        matches!(self.callee, Callee::Resolved(_))
    }
}

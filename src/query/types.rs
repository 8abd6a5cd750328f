//! Query response types.
//!
//! These are the `data` payloads of `ok` responses. Units are always named by
//! qualified name on the wire; arena ids never leave the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::cache::SkippedFile;
use crate::flow::{BasicBlock, CfgEdge, DefUseChain, DependenceSlice, VariableInfo};
use crate::graph::types::{CodeUnit, ImportRecord, UnitKind};
use crate::parser::SupportedLanguage;

// ─── Units ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitView {
    pub qualified_name: String,
    pub name: String,
    pub kind: UnitKind,
    pub signature: String,
    pub file: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl From<&CodeUnit> for UnitView {
    fn from(unit: &CodeUnit) -> Self {
        Self {
            qualified_name: unit.qualified_name.clone(),
            name: unit.name.clone(),
            kind: unit.kind,
            signature: unit.signature.clone(),
            file: unit.file.clone(),
            start_line: unit.start_line,
            end_line: unit.end_line,
            docstring: unit.docstring.clone(),
            parent: unit.parent.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub file: PathBuf,
    pub language: SupportedLanguage,
    pub units: Vec<UnitView>,
    pub imports: Vec<ImportRecord>,
    pub has_errors: bool,
    /// False when the file is not part of the snapshot and was parsed for
    /// this request only.
    pub indexed: bool,
}

// ─── Call Graph ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeView {
    pub caller: String,
    /// Qualified name when resolved, otherwise the call text.
    pub callee: String,
    pub resolved: bool,
    pub file: PathBuf,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallsResponse {
    pub total: usize,
    pub resolved: usize,
    pub external: usize,
    pub edges: Vec<EdgeView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactEntryView {
    pub unit: String,
    pub file: PathBuf,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactResponse {
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    pub count: usize,
    /// Ordered by depth, then qualified name.
    pub callers: Vec<ImpactEntryView>,
}

// ─── Context ───────────────────────────────────────────────────────

/// A unit reached from the context target, without its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub qualified_name: String,
    pub kind: UnitKind,
    pub signature: String,
    pub file: PathBuf,
    pub start_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    /// Call levels from the target.
    pub depth: usize,
}

impl ContextEntry {
    pub fn new(unit: &CodeUnit, depth: usize) -> Self {
        Self {
            qualified_name: unit.qualified_name.clone(),
            kind: unit.kind,
            signature: unit.signature.clone(),
            file: unit.file.clone(),
            start_line: unit.start_line,
            docstring: unit.docstring.clone(),
            depth,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResponse {
    pub unit: UnitView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u32>,
    /// Resolved callees up to the requested depth, by depth then name.
    pub callees: Vec<ContextEntry>,
    /// Calls of the target that resolve to nothing in the project.
    pub external: Vec<String>,
    /// Direct callers.
    pub callers: Vec<ContextEntry>,
}

// ─── Structure ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureUnit {
    pub qualified_name: String,
    pub kind: UnitKind,
    pub signature: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl From<&CodeUnit> for StructureUnit {
    fn from(unit: &CodeUnit) -> Self {
        Self {
            qualified_name: unit.qualified_name.clone(),
            kind: unit.kind,
            signature: unit.signature.clone(),
            start_line: unit.start_line,
            end_line: unit.end_line,
            parent: unit.parent.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStructure {
    pub file: PathBuf,
    pub language: SupportedLanguage,
    pub units: Vec<StructureUnit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureResponse {
    pub path: PathBuf,
    pub files: Vec<FileStructure>,
    pub units: usize,
}

// ─── Flow ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfgResponse {
    pub unit: String,
    pub file: PathBuf,
    pub blocks: Vec<BasicBlock>,
    pub edges: Vec<CfgEdge>,
    pub complexity: u32,
    /// Complexity is above the configured threshold.
    pub refactor_candidate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DfgResponse {
    pub unit: String,
    pub file: PathBuf,
    pub variables: BTreeMap<String, VariableInfo>,
    pub chains: Vec<DefUseChain>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceResponse {
    pub file: PathBuf,
    #[serde(flatten)]
    pub slice: DependenceSlice,
}

// ─── Semantic ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticHit {
    pub qualified_name: String,
    pub score: f32,
    pub kind: UnitKind,
    pub file: PathBuf,
    pub start_line: usize,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticResponse {
    pub query: String,
    pub hits: Vec<SemanticHit>,
}

// ─── Status ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Starting,
    Ready,
    Rebuilding,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: DaemonState,
    pub pid: u32,
    pub root: PathBuf,
    pub uptime_secs: u64,
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub files: usize,
    pub units: usize,
    pub edges: usize,
    pub resolved_edges: usize,
    pub embeddings: usize,
    pub cache_hit_rate: f64,
    pub skipped: Vec<SkippedFile>,
}

//! Query execution against a project snapshot.
//!
//! Every command except `ping`, `status` and `shutdown` is answered here, so
//! the daemon and the one-shot fallback give identical results.

pub mod types;

use serde_json::Value;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::daemon::protocol::Request;
use crate::error::{Result, StrataError};
use crate::flow::{slice, UnitFlow};
use crate::graph::builder::{analyze_source, read_file};
use crate::graph::types::{Callee, CodeUnit, FileAnalysis, UnitId};
use crate::project::{relative_path, Project, Snapshot};

pub use types::{
    CallsResponse, CfgResponse, ContextEntry, ContextResponse, DaemonState, DfgResponse, EdgeView, ExtractResponse,
    FileStructure, ImpactEntryView, ImpactResponse, SemanticHit, SemanticResponse, SliceResponse, StatusResponse,
    StructureResponse, StructureUnit, UnitView,
};

/// Callee levels in a context answer when the request names none.
pub const DEFAULT_CONTEXT_DEPTH: usize = 2;

/// Run a request and return its `data` payload.
pub fn execute(project: &Project, request: &Request) -> Result<Value> {
    let value = match request {
        Request::Extract { file } => serde_json::to_value(extract(project, file)?)?,
        Request::Calls { project: p } => {
            check_project(project, p.as_deref())?;
            serde_json::to_value(calls(&project.snapshot()))?
        }
        Request::Impact { unit, project: p, depth } => {
            check_project(project, p.as_deref())?;
            serde_json::to_value(impact(&project.snapshot(), unit, *depth)?)?
        }
        Request::Context { unit, project: p, depth } => {
            check_project(project, p.as_deref())?;
            serde_json::to_value(context(&project.snapshot(), unit, *depth)?)?
        }
        Request::Structure { path } => serde_json::to_value(structure(project, path)?)?,
        Request::Cfg { file, unit } => serde_json::to_value(cfg(project, file, unit)?)?,
        Request::Dfg { file, unit } => serde_json::to_value(dfg(project, file, unit)?)?,
        Request::Slice { file, unit, line } => serde_json::to_value(slice(project, file, unit, *line)?)?,
        Request::Semantic { query, k } => serde_json::to_value(semantic(project, query, *k)?)?,
        Request::Warm { project: p, clean } => {
            check_project(project, p.as_deref())?;
            let report = if *clean {
                project.rebuild_clean()?
            } else {
                project.refresh()?
            };
            serde_json::to_value(report)?
        }
        Request::Ping | Request::Status | Request::Shutdown => {
            return Err(StrataError::InvalidRequest(format!(
                "{} is not a query",
                request.command()
            )))
        }
    };
    Ok(value)
}

pub fn status(project: &Project, state: DaemonState, uptime: Duration) -> StatusResponse {
    let snap = project.snapshot();
    StatusResponse {
        state,
        pid: std::process::id(),
        root: project.root().to_path_buf(),
        uptime_secs: uptime.as_secs(),
        generation: snap.generation,
        built_at: snap.built_at,
        files: snap.files.len(),
        units: snap.unit_count(),
        edges: snap.graph.edges().len(),
        resolved_edges: snap.graph.resolved_count(),
        embeddings: snap.semantic.len(),
        cache_hit_rate: project.cache_hit_rate(),
        skipped: snap.skipped.clone(),
    }
}

/// Requests naming a project must name the one being served.
fn check_project(project: &Project, requested: Option<&Path>) -> Result<()> {
    let Some(requested) = requested else {
        return Ok(());
    };
    let canonical = requested.canonicalize().unwrap_or_else(|_| requested.to_path_buf());
    if canonical == project.root() {
        Ok(())
    } else {
        Err(StrataError::WrongProject {
            served: project.root().display().to_string(),
            requested: requested.display().to_string(),
        })
    }
}

/// The file's analysis from the snapshot, or parsed now if it is not indexed.
fn file_analysis(project: &Project, snap: &Snapshot, file: &Path) -> Result<(Arc<FileAnalysis>, bool)> {
    let rel = relative_path(project.root(), file)?;
    if let Some(analysis) = snap.file(&rel) {
        return Ok((Arc::clone(analysis), true));
    }
    if !project.root().join(&rel).is_file() {
        return Err(StrataError::QueryTargetNotFound(format!("file {}", rel.display())));
    }
    let content = read_file(project.root(), &rel, project.config())?;
    let analysis = analyze_source(&rel, content, project.config().preview_lines)?;
    Ok((Arc::new(analysis), false))
}

/// The callable unit `name` in `analysis`, with its flow.
///
/// `name` may be the qualified name, a dotted suffix of it, or the simple
/// name. Several matches are an error unless one is exact.
fn callable<'a>(analysis: &'a FileAnalysis, name: &str) -> Result<(&'a CodeUnit, &'a UnitFlow)> {
    let suffix = format!(".{name}");
    let candidates: Vec<(&CodeUnit, &UnitFlow)> = analysis
        .units()
        .iter()
        .zip(&analysis.flows)
        .filter_map(|(u, f)| f.as_ref().map(|f| (u, f)))
        .filter(|(u, _)| u.qualified_name == name || u.qualified_name.ends_with(&suffix) || u.name == name)
        .collect();

    if let Some(exact) = candidates.iter().find(|(u, _)| u.qualified_name == name) {
        return Ok(*exact);
    }
    match candidates.as_slice() {
        [] => Err(StrataError::QueryTargetNotFound(format!(
            "unit {name} in {}",
            analysis.path.display()
        ))),
        [one] => Ok(*one),
        many => Err(StrataError::InvalidRequest(format!(
            "unit {name} is ambiguous: {}",
            many.iter()
                .map(|(u, _)| u.qualified_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// The one snapshot unit `name` refers to.
fn unit_id(snap: &Snapshot, name: &str) -> Result<UnitId> {
    match snap.arena.lookup(name).as_slice() {
        [] => Err(StrataError::QueryTargetNotFound(format!("unit {name}"))),
        [one] => Ok(*one),
        many => {
            let names: Vec<&str> = many
                .iter()
                .filter_map(|id| snap.arena.get(*id).map(|u| u.qualified_name.as_str()))
                .collect();
            Err(StrataError::InvalidRequest(format!(
                "unit {name} is ambiguous: {}",
                names.join(", ")
            )))
        }
    }
}

// ─── Commands ──────────────────────────────────────────────────────

pub fn extract(project: &Project, file: &Path) -> Result<ExtractResponse> {
    let snap = project.snapshot();
    let (analysis, indexed) = file_analysis(project, &snap, file)?;
    Ok(ExtractResponse {
        file: analysis.path.clone(),
        language: analysis.language,
        units: analysis.units().iter().map(UnitView::from).collect(),
        imports: analysis.extraction.imports.clone(),
        has_errors: analysis.extraction.has_errors,
        indexed,
    })
}

pub fn calls(snap: &Snapshot) -> CallsResponse {
    let edges: Vec<EdgeView> = snap
        .graph
        .edges()
        .iter()
        .filter_map(|edge| {
            let caller = snap.arena.get(edge.caller)?;
            let (callee, resolved) = match &edge.callee {
                Callee::Resolved(id) => (snap.arena.get(*id)?.qualified_name.clone(), true),
                Callee::External(name) => (name.clone(), false),
            };
            Some(EdgeView {
                caller: caller.qualified_name.clone(),
                callee,
                resolved,
                file: caller.file.clone(),
                line: edge.line,
            })
        })
        .collect();
    let resolved = edges.iter().filter(|e| e.resolved).count();
    CallsResponse {
        total: edges.len(),
        resolved,
        external: edges.len() - resolved,
        edges,
    }
}

pub fn impact(snap: &Snapshot, unit: &str, depth: Option<usize>) -> Result<ImpactResponse> {
    let target = unit_id(snap, unit)?;

    let mut callers: Vec<ImpactEntryView> = snap
        .graph
        .impact(target, depth)
        .into_iter()
        .filter_map(|entry| {
            let u = snap.arena.get(entry.unit)?;
            Some(ImpactEntryView {
                unit: u.qualified_name.clone(),
                file: u.file.clone(),
                depth: entry.depth,
            })
        })
        .collect();
    callers.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.unit.cmp(&b.unit)));

    let name = snap
        .arena
        .get(target)
        .map(|u| u.qualified_name.clone())
        .unwrap_or_else(|| unit.to_string());
    Ok(ImpactResponse {
        unit: name,
        depth,
        count: callers.len(),
        callers,
    })
}

/// What a reader needs to use a unit without opening its file: signature
/// and docstring, what it calls (breadth-first up to `depth` levels) and who
/// calls it directly.
pub fn context(snap: &Snapshot, unit: &str, depth: Option<usize>) -> Result<ContextResponse> {
    let target = unit_id(snap, unit)?;
    let max_depth = depth.unwrap_or(DEFAULT_CONTEXT_DEPTH);
    let Some(root) = snap.arena.get(target) else {
        return Err(StrataError::QueryTargetNotFound(format!("unit {unit}")));
    };

    let mut seen = HashSet::from([target]);
    let mut callees = Vec::new();
    let mut queue = VecDeque::from([(target, 0usize)]);
    while let Some((current, level)) = queue.pop_front() {
        if level >= max_depth {
            continue;
        }
        for callee in snap.graph.callees_of(current) {
            if !seen.insert(callee) {
                continue;
            }
            if let Some(u) = snap.arena.get(callee) {
                callees.push(ContextEntry::new(u, level + 1));
                queue.push_back((callee, level + 1));
            }
        }
    }
    callees.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.qualified_name.cmp(&b.qualified_name)));

    let external: Vec<String> = snap
        .graph
        .calls_from(target)
        .filter_map(|edge| match &edge.callee {
            Callee::External(name) => Some(name.clone()),
            Callee::Resolved(_) => None,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let callers = snap
        .graph
        .callers_of(target)
        .into_iter()
        .filter_map(|id| snap.arena.get(id))
        .map(|u| ContextEntry::new(u, 1))
        .collect();

    Ok(ContextResponse {
        unit: UnitView::from(root),
        complexity: snap.unit_flow(target).map(UnitFlow::complexity),
        callees,
        external,
        callers,
    })
}

/// Units of one file, or of every indexed file under a directory. An empty
/// path or `.` means the whole project.
pub fn structure(project: &Project, path: &Path) -> Result<StructureResponse> {
    let snap = project.snapshot();
    let rel = if path.as_os_str().is_empty() {
        PathBuf::new()
    } else {
        relative_path(project.root(), path)?
    };

    let mut files: Vec<FileStructure> = snap
        .files
        .iter()
        .filter(|(file, _)| file.starts_with(&rel))
        .map(|(_, analysis)| file_structure(analysis))
        .collect();
    if files.is_empty() && !rel.as_os_str().is_empty() {
        // A single file outside the snapshot is parsed on the fly.
        if !project.root().join(&rel).is_file() {
            return Err(StrataError::QueryTargetNotFound(format!("path {}", rel.display())));
        }
        let (analysis, _) = file_analysis(project, &snap, &rel)?;
        files.push(file_structure(&analysis));
    }

    Ok(StructureResponse {
        path: rel,
        units: files.iter().map(|f| f.units.len()).sum(),
        files,
    })
}

fn file_structure(analysis: &FileAnalysis) -> FileStructure {
    FileStructure {
        file: analysis.path.clone(),
        language: analysis.language,
        units: analysis.units().iter().map(StructureUnit::from).collect(),
    }
}

pub fn cfg(project: &Project, file: &Path, unit: &str) -> Result<CfgResponse> {
    let snap = project.snapshot();
    let (analysis, _) = file_analysis(project, &snap, file)?;
    let (unit, flow) = callable(&analysis, unit)?;
    let complexity = flow.complexity();
    Ok(CfgResponse {
        unit: unit.qualified_name.clone(),
        file: analysis.path.clone(),
        blocks: flow.cfg.blocks.clone(),
        edges: flow.cfg.edges.clone(),
        complexity,
        refactor_candidate: complexity > project.config().complexity_threshold,
    })
}

pub fn dfg(project: &Project, file: &Path, unit: &str) -> Result<DfgResponse> {
    let snap = project.snapshot();
    let (analysis, _) = file_analysis(project, &snap, file)?;
    let (unit, flow) = callable(&analysis, unit)?;
    Ok(DfgResponse {
        unit: unit.qualified_name.clone(),
        file: analysis.path.clone(),
        variables: flow.dfg.variables.clone(),
        chains: flow.dfg.chains.clone(),
    })
}

pub fn slice(project: &Project, file: &Path, unit: &str, line: usize) -> Result<SliceResponse> {
    let snap = project.snapshot();
    let (analysis, _) = file_analysis(project, &snap, file)?;
    let (unit, flow) = callable(&analysis, unit)?;
    let slice = slice::backward(&unit.qualified_name, flow, line)?;
    Ok(SliceResponse {
        file: analysis.path.clone(),
        slice,
    })
}

pub fn semantic(project: &Project, query: &str, k: usize) -> Result<SemanticResponse> {
    if query.trim().is_empty() {
        return Err(StrataError::InvalidRequest("empty semantic query".into()));
    }
    let snap = project.snapshot();
    let matches = snap.semantic.query(query, k, project.embedder())?;
    let hits = matches
        .into_iter()
        .filter_map(|m| {
            let unit = snap.arena.get(snap.arena.id_of(&m.qualified_name)?)?;
            Some(SemanticHit {
                qualified_name: m.qualified_name,
                score: m.score,
                kind: unit.kind,
                file: unit.file.clone(),
                start_line: unit.start_line,
                signature: unit.signature.clone(),
            })
        })
        .collect();
    Ok(SemanticResponse {
        query: query.to_string(),
        hits,
    })
}

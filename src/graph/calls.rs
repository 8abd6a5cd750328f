//! Layer 2: call resolution and the call graph.
//!
//! A call site resolves in three passes:
//! 1. units of the caller's own file (`self`/`this` receivers select methods
//!    of the caller's type, a type-name receiver selects that type's methods);
//! 2. units of imported modules, using the import closest to the call line
//!    when several could bind the name;
//! 3. Go only: units of the same package directory.
//!
//! Anything else, including ambiguous matches, becomes an external edge.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::arena::UnitArena;
use super::types::{CallEdge, CallSite, Callee, CodeUnit, FileAnalysis, ImportRecord, UnitId, UnitKind};
use crate::parser::{module_key, SupportedLanguage};

/// Resolved callee qualified names per file, parallel to `extraction.calls`.
pub type Resolutions = BTreeMap<PathBuf, Vec<Option<String>>>;

const SELF_RECEIVERS: &[&str] = &["self", "this", "Self", "cls"];

/// Languages whose files can import each other.
fn family(language: SupportedLanguage) -> u8 {
    match language {
        SupportedLanguage::Rust => 0,
        SupportedLanguage::Python => 1,
        SupportedLanguage::JavaScript | SupportedLanguage::TypeScript | SupportedLanguage::Tsx => 2,
        SupportedLanguage::Go => 3,
        SupportedLanguage::Java => 4,
    }
}

struct FileSlot<'a> {
    analysis: &'a FileAnalysis,
    module: Vec<String>,
    dir: Vec<String>,
}

pub struct Resolver<'a> {
    arena: &'a UnitArena,
    slots: Vec<FileSlot<'a>>,
    by_path: HashMap<&'a Path, usize>,
}

impl<'a> Resolver<'a> {
    pub fn new(arena: &'a UnitArena, files: &'a BTreeMap<PathBuf, Arc<FileAnalysis>>) -> Self {
        let slots: Vec<FileSlot<'a>> = files
            .values()
            .map(|analysis| FileSlot {
                analysis: analysis.as_ref(),
                module: segments(&module_key(&analysis.path), '.'),
                dir: analysis
                    .path
                    .parent()
                    .map(|p| path_segments(p))
                    .unwrap_or_default(),
            })
            .collect();
        let by_path = slots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.analysis.path.as_path(), i))
            .collect();
        Self { arena, slots, by_path }
    }

    /// Resolve the calls of one file.
    ///
    /// Calls whose caller is not `dirty` keep their `previous` resolution when
    /// one is available for the same call list.
    pub fn resolve_file<F>(&self, path: &Path, previous: Option<&[Option<String>]>, dirty: F) -> Vec<Option<String>>
    where
        F: Fn(&str) -> bool,
    {
        let Some(&slot) = self.by_path.get(path) else {
            return Vec::new();
        };
        let file = self.slots[slot].analysis;
        let calls = &file.extraction.calls;
        let previous = previous.filter(|p| p.len() == calls.len());
        let mut scope = FileScope::new(self, slot);

        calls
            .iter()
            .enumerate()
            .map(|(i, call)| {
                let caller = file.extraction.units.get(call.caller);
                match (previous, caller) {
                    (Some(prev), Some(c)) if !dirty(&c.qualified_name) => prev[i].clone(),
                    (_, Some(c)) => scope
                        .resolve(c, call)
                        .and_then(|id| self.arena.get(id))
                        .map(|u| u.qualified_name.clone()),
                    (_, None) => None,
                }
            })
            .collect()
    }

    fn unit(&self, id: UnitId) -> &'a CodeUnit {
        &self.arena.units()[id as usize]
    }

    /// Type scope of a caller: the nearest enclosing scope that is not a
    /// function.
    fn enclosing_type(&self, caller: &CodeUnit) -> Option<String> {
        let mut parent = caller.parent.clone();
        while let Some(p) = parent {
            match self.arena.id_of(&p).map(|id| self.unit(id)) {
                Some(u) if u.kind.is_callable() => parent = u.parent.clone(),
                // A class unit, or a scope with no unit of its own (`impl`).
                _ => return Some(p),
            }
        }
        None
    }

    /// Slots whose module (or, for Go, package directory) matches `target`.
    fn modules_matching(&self, language: SupportedLanguage, target: &[String]) -> Vec<usize> {
        let fam = family(language);
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| family(s.analysis.language) == fam)
            .filter(|(_, s)| {
                if language == SupportedLanguage::Go {
                    !s.dir.is_empty() && (ends_with(target, &s.dir) || ends_with(&s.dir, target))
                } else if target.is_empty() {
                    language == SupportedLanguage::Rust && s.module.len() <= 1
                } else {
                    ends_with(&s.module, target)
                }
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Top-level units named `name` (`class` None) or methods of `class`.
    fn members(&self, slot: usize, name: &str, class: Option<&str>) -> Vec<UnitId> {
        let path = &self.slots[slot].analysis.path;
        self.arena
            .file_units(path)
            .filter(|(_, u)| u.name == name)
            .filter(|(_, u)| match class {
                Some(c) => u.kind.is_callable() && u.parent_name() == Some(c),
                None => u.parent.is_none() && u.kind != UnitKind::Method,
            })
            .map(|(id, _)| id)
            .collect()
    }
}

/// Per-file resolution state: the caller file and memoized module lookups.
struct FileScope<'r, 'a> {
    resolver: &'r Resolver<'a>,
    slot: usize,
    language: SupportedLanguage,
    modules: HashMap<Vec<String>, Vec<usize>>,
}

impl<'r, 'a> FileScope<'r, 'a> {
    fn new(resolver: &'r Resolver<'a>, slot: usize) -> Self {
        Self {
            resolver,
            slot,
            language: resolver.slots[slot].analysis.language,
            modules: HashMap::new(),
        }
    }

    fn file(&self) -> &'a FileAnalysis {
        self.resolver.slots[self.slot].analysis
    }

    fn resolve(&mut self, caller: &CodeUnit, call: &CallSite) -> Option<UnitId> {
        let local = self.same_file(caller, call);
        if !local.is_empty() {
            return unique(local);
        }
        let imported = self.imported(call);
        if let Some(candidates) = imported {
            return unique(candidates);
        }
        if self.language == SupportedLanguage::Go {
            return unique(self.same_package(call));
        }
        None
    }

    fn same_file(&self, caller: &CodeUnit, call: &CallSite) -> Vec<UnitId> {
        let r = self.resolver;
        let units = || r.arena.file_units(&self.file().path);

        match call.receiver.as_deref() {
            Some(recv) if SELF_RECEIVERS.contains(&recv) => {
                let Some(ty) = r.enclosing_type(caller) else {
                    return Vec::new();
                };
                units()
                    .filter(|(_, u)| u.kind.is_callable() && u.name == call.name && u.parent.as_deref() == Some(ty.as_str()))
                    .map(|(id, _)| id)
                    .collect()
            }
            Some(recv) => units()
                .filter(|(_, u)| u.kind.is_callable() && u.name == call.name && u.parent_name() == Some(recv))
                .map(|(id, _)| id)
                .collect(),
            None => {
                // Scopes visible from the caller, innermost first.
                let mut chain = vec![caller.qualified_name.as_str()];
                let mut parent = caller.parent.as_deref();
                while let Some(p) = parent {
                    chain.push(p);
                    parent = r.arena.id_of(p).and_then(|id| r.unit(id).parent.as_deref());
                }
                let methods_visible = self.language == SupportedLanguage::Java;
                let mut best: Option<(usize, Vec<UnitId>)> = None;
                for (id, u) in units() {
                    if u.name != call.name || (u.kind == UnitKind::Method && !methods_visible) {
                        continue;
                    }
                    let depth = match u.parent.as_deref() {
                        None => chain.len(),
                        Some(p) => match chain.iter().position(|c| *c == p) {
                            Some(pos) => pos,
                            None => continue,
                        },
                    };
                    match best.as_mut() {
                        Some((d, ids)) if *d == depth => ids.push(id),
                        Some((d, _)) if *d < depth => {}
                        _ => best = Some((depth, vec![id])),
                    }
                }
                best.map(|(_, ids)| ids).unwrap_or_default()
            }
        }
    }

    /// Candidates from the closest import that yields any. `None` when no
    /// import binds the call.
    fn imported(&mut self, call: &CallSite) -> Option<Vec<UnitId>> {
        let file = self.file();
        let mut best: Option<(&ImportRecord, Vec<UnitId>)> = None;
        for import in &file.extraction.imports {
            let found = self.through_import(import, call);
            if found.is_empty() {
                continue;
            }
            let closer = match &best {
                None => true,
                Some((b, _)) => proximity(import.line, call.line) < proximity(b.line, call.line),
            };
            if closer {
                best = Some((import, found));
            }
        }
        best.map(|(_, ids)| ids)
    }

    fn through_import(&mut self, import: &ImportRecord, call: &CallSite) -> Vec<UnitId> {
        let base = import_segments(self.language, &self.file().path, &import.module);
        let mut found = Vec::new();

        match call.receiver.as_deref() {
            None => {
                for imported in import.names.iter().filter(|n| n.local() == call.name) {
                    found.extend(self.lookup(&base, &imported.name, None));
                }
                if import.wildcard {
                    found.extend(self.lookup(&base, &call.name, None));
                }
            }
            Some(recv) => {
                let parts = receiver_segments(recv);
                let Some((head, rest)) = parts.split_first() else {
                    return found;
                };
                if recv == import.module || import.module_binding() == Some(head.as_str()) {
                    let rest = if recv == import.module { &[][..] } else { rest };
                    found.extend(self.lookup_path(&base, rest, &call.name));
                }
                for imported in import.names.iter().filter(|n| n.local() == head) {
                    let mut sub = base.clone();
                    sub.push(imported.name.clone());
                    found.extend(self.lookup_path(&sub, rest, &call.name));
                    if rest.is_empty() {
                        // `from models import User; User.create()`
                        found.extend(self.lookup(&base, &call.name, Some(&imported.name)));
                        found.extend(self.lookup(&sub, &call.name, Some(&imported.name)));
                    }
                }
                if import.wildcard && rest.is_empty() {
                    found.extend(self.lookup(&base, &call.name, Some(head)));
                }
            }
        }
        found.sort_unstable();
        found.dedup();
        found
    }

    /// `module.rest...name`: a function in a submodule, or a method of a
    /// type named by the last receiver segment.
    fn lookup_path(&mut self, module: &[String], rest: &[String], name: &str) -> Vec<UnitId> {
        let mut full = module.to_vec();
        full.extend(rest.iter().cloned());
        let direct = self.lookup(&full, name, None);
        if !direct.is_empty() {
            return direct;
        }
        match rest.split_last() {
            Some((class, outer)) => {
                let mut owner = module.to_vec();
                owner.extend(outer.iter().cloned());
                let mut ids = self.lookup(&owner, name, Some(class));
                ids.extend(self.lookup(&full, name, Some(class)));
                ids
            }
            None => Vec::new(),
        }
    }

    fn lookup(&mut self, module: &[String], name: &str, class: Option<&str>) -> Vec<UnitId> {
        let resolver = self.resolver;
        let language = self.language;
        let slots = self
            .modules
            .entry(module.to_vec())
            .or_insert_with(|| resolver.modules_matching(language, module));
        slots
            .iter()
            .flat_map(|&slot| resolver.members(slot, name, class))
            .collect()
    }

    fn same_package(&self, call: &CallSite) -> Vec<UnitId> {
        let r = self.resolver;
        let dir = &r.slots[self.slot].dir;
        r.slots
            .iter()
            .enumerate()
            .filter(|(i, s)| {
                s.analysis.language == SupportedLanguage::Go
                    && &s.dir == dir
                    && (call.receiver.is_some() || *i != self.slot)
            })
            .flat_map(|(_, s)| r.arena.file_units(&s.analysis.path))
            .filter(|(_, u)| u.name == call.name)
            .filter(|(_, u)| match call.receiver {
                None => u.parent.is_none() && u.kind == UnitKind::Function,
                Some(_) => u.kind == UnitKind::Method,
            })
            .map(|(id, _)| id)
            .collect()
    }
}

/// Ordering key for imports relative to a call: the latest import at or
/// above the call comes first, then the earliest one below it.
fn proximity(import_line: usize, call_line: usize) -> (bool, usize) {
    if import_line <= call_line {
        (false, call_line - import_line)
    } else {
        (true, import_line - call_line)
    }
}

fn unique(ids: Vec<UnitId>) -> Option<UnitId> {
    match ids.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

fn ends_with(haystack: &[String], suffix: &[String]) -> bool {
    !suffix.is_empty() && haystack.len() >= suffix.len() && haystack[haystack.len() - suffix.len()..] == *suffix
}

fn segments(text: &str, sep: char) -> Vec<String> {
    text.split(sep).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn path_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str().map(str::to_string),
            _ => None,
        })
        .collect()
}

fn receiver_segments(receiver: &str) -> Vec<String> {
    receiver
        .split(|c| c == '.' || c == ':')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Module path of an import as project-relative segments.
fn import_segments(language: SupportedLanguage, importer: &Path, module: &str) -> Vec<String> {
    let dir = importer.parent().map(path_segments).unwrap_or_default();
    match language {
        SupportedLanguage::Python => {
            let dots = module.chars().take_while(|c| *c == '.').count();
            let rest = segments(&module[dots..], '.');
            if dots == 0 {
                return rest;
            }
            let mut base = dir;
            for _ in 1..dots {
                base.pop();
            }
            base.extend(rest);
            base
        }
        SupportedLanguage::JavaScript | SupportedLanguage::TypeScript | SupportedLanguage::Tsx => {
            if !module.starts_with('.') {
                return segments(module, '/');
            }
            let mut out = dir;
            for part in module.split('/') {
                match part {
                    "" | "." => {}
                    ".." => {
                        out.pop();
                    }
                    p => out.push(p.to_string()),
                }
            }
            if let Some(last) = out.last_mut() {
                for ext in [".js", ".jsx", ".mjs", ".cjs", ".ts", ".tsx"] {
                    if let Some(stem) = last.strip_suffix(ext) {
                        *last = stem.to_string();
                        break;
                    }
                }
            }
            if out.len() > 1 && out.last().is_some_and(|l| l == "index") {
                out.pop();
            }
            out
        }
        SupportedLanguage::Rust => segments(module, ':')
            .into_iter()
            .skip_while(|s| matches!(s.as_str(), "crate" | "self" | "super"))
            .collect(),
        SupportedLanguage::Go => segments(module, '/'),
        SupportedLanguage::Java => segments(module, '.'),
    }
}

/// Name recorded for an unresolved call.
pub fn external_name(call: &CallSite) -> String {
    match &call.receiver {
        Some(r) => format!("{r}.{}", call.name),
        None => call.name.clone(),
    }
}

/// Reverse-call closure entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactEntry {
    pub unit: UnitId,
    /// Call distance from the queried unit (direct callers are 1).
    pub depth: usize,
}

/// Directed call graph over a unit arena. Resolved edges are mirrored in a
/// petgraph graph whose node indices equal unit ids.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    edges: Vec<CallEdge>,
    /// Edge indices per caller id, external edges included.
    outgoing: Vec<Vec<usize>>,
    graph: DiGraph<UnitId, usize>,
}

impl CallGraph {
    /// Build edges for every file from its resolutions.
    pub fn link(arena: &UnitArena, files: &BTreeMap<PathBuf, Arc<FileAnalysis>>, resolutions: &Resolutions) -> Self {
        let mut edges = Vec::new();
        for (path, analysis) in files {
            let first = arena.file_range(path).start;
            let resolved = resolutions.get(path);
            for (i, call) in analysis.extraction.calls.iter().enumerate() {
                if call.caller >= analysis.extraction.units.len() {
                    continue;
                }
                let target = resolved
                    .and_then(|r| r.get(i))
                    .and_then(|t| t.as_deref())
                    .and_then(|q| arena.id_of(q));
                edges.push(CallEdge {
                    caller: first + call.caller as UnitId,
                    callee: match target {
                        Some(id) => Callee::Resolved(id),
                        None => Callee::External(external_name(call)),
                    },
                    line: call.line,
                });
            }
        }
        Self::build(arena.len(), edges)
    }

    pub fn build(unit_count: usize, edges: Vec<CallEdge>) -> Self {
        let mut graph = DiGraph::with_capacity(unit_count, edges.len());
        for id in 0..unit_count {
            graph.add_node(id as UnitId);
        }
        let mut outgoing = vec![Vec::new(); unit_count];
        for (i, edge) in edges.iter().enumerate() {
            if let Some(out) = outgoing.get_mut(edge.caller as usize) {
                out.push(i);
            }
            if let Callee::Resolved(target) = edge.callee {
                if (target as usize) < unit_count && (edge.caller as usize) < unit_count {
                    graph.add_edge(NodeIndex::new(edge.caller as usize), NodeIndex::new(target as usize), i);
                }
            }
        }
        Self { edges, outgoing, graph }
    }

    pub fn edges(&self) -> &[CallEdge] {
        &self.edges
    }

    pub fn resolved_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Outgoing edges of a unit, external ones included, in source order.
    pub fn calls_from(&self, unit: UnitId) -> impl Iterator<Item = &CallEdge> + '_ {
        self.outgoing
            .get(unit as usize)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    /// Distinct resolved callees, ascending.
    pub fn callees_of(&self, unit: UnitId) -> Vec<UnitId> {
        if unit as usize >= self.graph.node_count() {
            return Vec::new();
        }
        let mut callees: Vec<UnitId> = self
            .graph
            .neighbors_directed(NodeIndex::new(unit as usize), Direction::Outgoing)
            .map(|n| n.index() as UnitId)
            .collect();
        callees.sort_unstable();
        callees.dedup();
        callees
    }

    /// Distinct direct callers, ascending.
    pub fn callers_of(&self, unit: UnitId) -> Vec<UnitId> {
        if unit as usize >= self.graph.node_count() {
            return Vec::new();
        }
        let mut callers: Vec<UnitId> = self
            .graph
            .neighbors_directed(NodeIndex::new(unit as usize), Direction::Incoming)
            .map(|n| n.index() as UnitId)
            .collect();
        callers.sort_unstable();
        callers.dedup();
        callers
    }

    /// Every unit that reaches `unit` through calls, with its shortest
    /// distance. `max_depth` of `None` means unbounded.
    pub fn impact(&self, unit: UnitId, max_depth: Option<usize>) -> Vec<ImpactEntry> {
        let mut seen = HashSet::from([unit]);
        let mut out = Vec::new();
        let mut queue = VecDeque::from([(unit, 0usize)]);
        while let Some((current, depth)) = queue.pop_front() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for caller in self.callers_of(current) {
                if seen.insert(caller) {
                    out.push(ImpactEntry { unit: caller, depth: depth + 1 });
                    queue.push_back((caller, depth + 1));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow;
    use crate::parser::{extractor, parse};

    fn analyze(path: &str, source: &str) -> FileAnalysis {
        let path = PathBuf::from(path);
        let language = SupportedLanguage::from_path(&path).unwrap();
        let tree = parse(source.as_bytes(), language).unwrap();
        let walked = extractor::walk(&tree, &path, 3);
        let flows = walked
            .extraction
            .units
            .iter()
            .zip(&walked.nodes)
            .map(|(u, n)| u.kind.is_callable().then(|| flow::analyze(&tree, *n)))
            .collect();
        FileAnalysis {
            path,
            language,
            hash: String::new(),
            modified: 0,
            extraction: walked.extraction,
            flows,
        }
    }

    struct Project {
        files: BTreeMap<PathBuf, Arc<FileAnalysis>>,
        arena: UnitArena,
        graph: CallGraph,
    }

    impl Project {
        fn new(sources: &[(&str, &str)]) -> Self {
            let files: BTreeMap<PathBuf, Arc<FileAnalysis>> = sources
                .iter()
                .map(|(p, s)| (PathBuf::from(p), Arc::new(analyze(p, s))))
                .collect();
            let arena = UnitArena::build(files.values().map(|a| a.as_ref()));
            let resolver = Resolver::new(&arena, &files);
            let resolutions: Resolutions = files
                .keys()
                .map(|p| (p.clone(), resolver.resolve_file(p, None, |_| true)))
                .collect();
            let graph = CallGraph::link(&arena, &files, &resolutions);
            Self { files, arena, graph }
        }

        fn callees(&self, caller: &str) -> Vec<String> {
            let id = self.arena.id_of(caller).unwrap();
            self.graph
                .calls_from(id)
                .map(|e| match &e.callee {
                    Callee::Resolved(t) => self.arena.get(*t).unwrap().qualified_name.clone(),
                    Callee::External(name) => format!("external:{name}"),
                })
                .collect()
        }
    }

    #[test]
    fn test_cross_file_python_import() {
        let p = Project::new(&[
            ("app/x.py", "from app.y import bar\n\ndef foo():\n    return bar()\n"),
            ("app/y.py", "def bar():\n    return 1\n"),
        ]);
        assert_eq!(p.callees("app.x.foo"), vec!["app.y.bar"]);
        assert_eq!(p.graph.resolved_count(), 1);
    }

    #[test]
    fn test_self_receiver_prefers_own_class() {
        let p = Project::new(&[(
            "svc.py",
            "class A:\n    def run(self):\n        return self.step()\n    def step(self):\n        pass\n\nclass B:\n    def step(self):\n        pass\n",
        )]);
        assert_eq!(p.callees("svc.A.run"), vec!["svc.A.step"]);
    }

    #[test]
    fn test_class_receiver_and_builtin_external() {
        let p = Project::new(&[(
            "src/config.rs",
            "struct Config;\nimpl Config {\n    fn new() -> Self { Config }\n}\nfn main() {\n    let c = Config::new();\n    println(c);\n}\n",
        )]);
        assert_eq!(
            p.callees("src.config.main"),
            vec!["src.config.Config.new", "external:println"]
        );
    }

    #[test]
    fn test_module_alias_receiver() {
        let p = Project::new(&[
            ("main.py", "import helpers.text as t\n\ndef run():\n    t.clean('x')\n"),
            ("helpers/text.py", "def clean(s):\n    return s\n"),
        ]);
        assert_eq!(p.callees("main.run"), vec!["helpers.text.clean"]);
    }

    #[test]
    fn test_js_relative_import() {
        let p = Project::new(&[
            ("src/app.js", "import { format as fmt } from './util/format.js';\nexport function show(x) {\n  return fmt(x);\n}\n"),
            ("src/util/format.js", "export function format(x) {\n  return String(x);\n}\n"),
        ]);
        assert_eq!(p.callees("src.app.show"), vec!["src.util.format.format"]);
    }

    #[test]
    fn test_go_same_package() {
        let p = Project::new(&[
            ("pkg/a.go", "package pkg\n\nfunc Run() {\n\thelper()\n}\n"),
            ("pkg/b.go", "package pkg\n\nfunc helper() {}\n"),
        ]);
        assert_eq!(p.callees("pkg.a.Run"), vec!["pkg.b.helper"]);
    }

    #[test]
    fn test_ambiguous_import_stays_unresolved() {
        let p = Project::new(&[
            ("main.py", "from lib import *\n\ndef run():\n    go()\n"),
            ("a/lib.py", "def go():\n    pass\n"),
            ("b/lib.py", "def go():\n    pass\n"),
        ]);
        assert_eq!(p.callees("main.run"), vec!["external:go"]);
    }

    #[test]
    fn test_closest_import_wins() {
        let p = Project::new(&[
            (
                "main.py",
                "from one import go\n\ndef first():\n    go()\n\nfrom two import go\n\ndef second():\n    go()\n",
            ),
            ("one.py", "def go():\n    pass\n"),
            ("two.py", "def go():\n    pass\n"),
        ]);
        assert_eq!(p.callees("main.first"), vec!["one.go"]);
        assert_eq!(p.callees("main.second"), vec!["two.go"]);
    }

    #[test]
    fn test_impact_closure_with_depth() {
        let p = Project::new(&[(
            "m.py",
            "def a():\n    b()\n\ndef b():\n    c()\n\ndef c():\n    pass\n\ndef d():\n    a()\n",
        )]);
        let c = p.arena.id_of("m.c").unwrap();
        let all: Vec<(String, usize)> = p
            .graph
            .impact(c, None)
            .into_iter()
            .map(|e| (p.arena.get(e.unit).unwrap().qualified_name.clone(), e.depth))
            .collect();
        assert_eq!(
            all,
            vec![("m.b".into(), 1), ("m.a".into(), 2), ("m.d".into(), 3)]
        );
        assert_eq!(p.graph.impact(c, Some(1)).len(), 1);
    }

    #[test]
    fn test_recursion_and_cycles_are_allowed() {
        let p = Project::new(&[("r.py", "def f(n):\n    return f(n - 1)\n")]);
        let f = p.arena.id_of("r.f").unwrap();
        assert_eq!(p.graph.callers_of(f), vec![f]);
        assert!(p.graph.impact(f, None).is_empty());
    }

    #[test]
    fn test_previous_resolutions_are_kept_for_clean_callers() {
        let p = Project::new(&[("m.py", "def a():\n    b()\n\ndef b():\n    pass\n")]);
        let resolver = Resolver::new(&p.arena, &p.files);
        let stale = vec![Some("m.elsewhere".to_string())];
        let kept = resolver.resolve_file(Path::new("m.py"), Some(&stale), |_| false);
        assert_eq!(kept, stale);
        let fresh = resolver.resolve_file(Path::new("m.py"), Some(&stale), |q| q == "m.a");
        assert_eq!(fresh, vec![Some("m.b".to_string())]);
    }

    #[test]
    fn test_edge_endpoints_exist() {
        let p = Project::new(&[
            ("x.py", "from y import bar\n\ndef foo():\n    bar()\n    print(1)\n"),
            ("y.py", "def bar():\n    pass\n"),
        ]);
        for edge in p.graph.edges() {
            assert!(p.arena.get(edge.caller).is_some());
            if let Callee::Resolved(t) = edge.callee {
                assert!(p.arena.get(t).is_some());
            }
        }
    }

    #[test]
    fn test_outgoing_edges_per_caller() {
        let p = Project::new(&[(
            "m.py",
            "def a():\n    b()\n    print(1)\n    b()\n\ndef b():\n    c()\n\ndef c():\n    pass\n",
        )]);
        let (a, b, c) = (
            p.arena.id_of("m.a").unwrap(),
            p.arena.id_of("m.b").unwrap(),
            p.arena.id_of("m.c").unwrap(),
        );
        let lines: Vec<usize> = p.graph.calls_from(a).map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
        assert!(p.graph.calls_from(a).all(|e| e.caller == a));
        assert_eq!(p.graph.callees_of(a), vec![b]);
        assert_eq!(p.graph.callees_of(b), vec![c]);
        assert!(p.graph.callees_of(c).is_empty());
        assert_eq!(p.graph.calls_from(99).count(), 0);
    }
}

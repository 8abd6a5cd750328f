//! Layer 5: program dependence graph and backward slices.
//!
//! PDG nodes are statements. Data edges come from the def/use chains; control
//! edges come from post-dominance on the CFG: a statement is control dependent
//! on a branch when it runs on some but not all paths out of the branch.

use petgraph::algo::dominators;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{EdgeRef, Reversed};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

use super::lower::StmtId;
use super::UnitFlow;
use crate::error::{Result, StrataError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "via", rename_all = "snake_case")]
pub enum DependenceKind {
    /// The statement at the requested line.
    Target,
    /// Defines a variable read by an included statement.
    Data(String),
    /// Decides whether an included statement runs.
    Control,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceLine {
    pub line: usize,
    pub text: String,
    pub dependence: DependenceKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependenceSlice {
    pub unit: String,
    pub target_line: usize,
    /// Included lines in ascending order.
    pub lines: Vec<SliceLine>,
}

impl DependenceSlice {
    pub fn line_numbers(&self) -> Vec<usize> {
        self.lines.iter().map(|l| l.line).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Dep {
    Data(String),
    Control,
}

/// Statement-level dependence graph of one unit. Edges point from the
/// statement depended upon to the dependent statement.
pub struct DependenceGraph {
    graph: DiGraph<StmtId, Dep>,
}

impl DependenceGraph {
    pub fn build(flow: &UnitFlow) -> Self {
        let mut graph = DiGraph::with_capacity(flow.stmts.len(), flow.dfg.chains.len());
        for stmt in &flow.stmts {
            graph.add_node(stmt.id);
        }

        for chain in &flow.dfg.chains {
            graph.update_edge(
                NodeIndex::new(chain.def_stmt),
                NodeIndex::new(chain.use_stmt),
                Dep::Data(chain.variable.clone()),
            );
        }

        for (branch, dependent) in control_dependences(flow) {
            if branch != dependent && graph.find_edge(NodeIndex::new(branch), NodeIndex::new(dependent)).is_none() {
                graph.add_edge(NodeIndex::new(branch), NodeIndex::new(dependent), Dep::Control);
            }
        }

        Self { graph }
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

/// Backward slice of `flow` from the statements at `line`.
pub fn backward(unit: &str, flow: &UnitFlow, line: usize) -> Result<DependenceSlice> {
    let targets = target_statements(flow, line);
    if targets.is_empty() {
        return Err(StrataError::QueryTargetNotFound(format!(
            "no statement at line {line} in {unit}"
        )));
    }

    let pdg = DependenceGraph::build(flow);
    let mut reasons: BTreeMap<StmtId, DependenceKind> = BTreeMap::new();
    let mut queue = VecDeque::new();
    for &t in &targets {
        reasons.insert(t, DependenceKind::Target);
        queue.push_back(NodeIndex::new(t));
    }

    while let Some(node) = queue.pop_front() {
        for edge in pdg.graph.edges_directed(node, Direction::Incoming) {
            let source = edge.source();
            let stmt = pdg.graph[source];
            if reasons.contains_key(&stmt) {
                continue;
            }
            let kind = match edge.weight() {
                Dep::Data(var) => DependenceKind::Data(var.clone()),
                Dep::Control => DependenceKind::Control,
            };
            reasons.insert(stmt, kind);
            queue.push_back(source);
        }
    }

    // One entry per line; a target outranks anything else on its line.
    let mut by_line: BTreeMap<usize, SliceLine> = BTreeMap::new();
    for (stmt, dependence) in reasons {
        let info = &flow.stmts[stmt];
        let replace = match by_line.get(&info.line) {
            None => true,
            Some(existing) => dependence == DependenceKind::Target && existing.dependence != DependenceKind::Target,
        };
        if replace {
            by_line.insert(
                info.line,
                SliceLine {
                    line: info.line,
                    text: info.text.clone(),
                    dependence,
                },
            );
        }
    }

    Ok(DependenceSlice {
        unit: unit.to_string(),
        target_line: line,
        lines: by_line.into_values().collect(),
    })
}

/// Statements starting on `line`, or else the innermost ones spanning it.
fn target_statements(flow: &UnitFlow, line: usize) -> Vec<StmtId> {
    let placed: HashSet<StmtId> = flow
        .cfg
        .blocks
        .iter()
        .flat_map(|b| b.stmts.iter().copied())
        .collect();
    let candidates = flow
        .stmts
        .iter()
        .filter(|s| s.id != 0 && placed.contains(&s.id));

    let starting: Vec<StmtId> = candidates.clone().filter(|s| s.line == line).map(|s| s.id).collect();
    if !starting.is_empty() {
        return starting;
    }
    let spanning: Vec<_> = candidates.filter(|s| s.covers(line)).collect();
    let Some(narrowest) = spanning.iter().map(|s| s.end_line - s.line).min() else {
        return Vec::new();
    };
    spanning
        .into_iter()
        .filter(|s| s.end_line - s.line == narrowest)
        .map(|s| s.id)
        .collect()
}

/// `(branch statement, dependent statement)` pairs from post-dominance.
fn control_dependences(flow: &UnitFlow) -> Vec<(StmtId, StmtId)> {
    let cfg = &flow.cfg;
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(cfg.blocks.len(), cfg.edges.len());
    for block in &cfg.blocks {
        graph.add_node(block.id);
    }
    for edge in &cfg.edges {
        graph.update_edge(NodeIndex::new(edge.from), NodeIndex::new(edge.to), ());
    }

    // Blocks that cannot reach the exit (infinite loops) get a virtual edge
    // so every block has a post-dominator.
    let exit = NodeIndex::new(cfg.exit);
    let mut reaches_exit = HashSet::new();
    let mut queue = VecDeque::from([exit]);
    while let Some(n) = queue.pop_front() {
        if reaches_exit.insert(n) {
            queue.extend(graph.neighbors_directed(n, Direction::Incoming));
        }
    }
    for block in &cfg.blocks {
        let n = NodeIndex::new(block.id);
        if !reaches_exit.contains(&n) {
            graph.update_edge(n, exit, ());
        }
    }

    let post = dominators::simple_fast(Reversed(&graph), exit);

    let mut out = Vec::new();
    for edge in &cfg.edges {
        let from = NodeIndex::new(edge.from);
        let Some(branch) = cfg.blocks[edge.from].stmts.last().copied() else {
            continue;
        };
        let stop = post.immediate_dominator(from);
        let mut runner = Some(NodeIndex::new(edge.to));
        while let Some(node) = runner {
            if Some(node) == stop || node == exit {
                break;
            }
            for &s in &cfg.blocks[node.index()].stmts {
                out.push((branch, s));
            }
            runner = post.immediate_dominator(node);
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

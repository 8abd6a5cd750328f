//! Layer 4: def/use chains from reaching definitions.
//!
//! Tracked variables are the names a unit defines (parameters included).
//! Reaching definitions is solved over the CFG with a worklist; at merge
//! points every reaching definition is kept, so a use after an `if` without
//! `else` links to both the branch definition and the earlier one.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::cfg::ControlFlowGraph;
use super::lower::{StmtId, UnitBody};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub def_lines: Vec<usize>,
    pub use_lines: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefUseChain {
    pub variable: String,
    pub def_stmt: StmtId,
    pub def_line: usize,
    pub use_stmt: StmtId,
    pub use_line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFlowGraph {
    pub variables: BTreeMap<String, VariableInfo>,
    pub chains: Vec<DefUseChain>,
}

impl DataFlowGraph {
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Chains ending at a statement.
    pub fn reaching(&self, use_stmt: StmtId) -> impl Iterator<Item = &DefUseChain> + '_ {
        self.chains.iter().filter(move |c| c.use_stmt == use_stmt)
    }
}

/// Reaching-definition state: variable -> defining statements.
type Reach = BTreeMap<String, BTreeSet<StmtId>>;

pub fn build(body: &UnitBody, cfg: &ControlFlowGraph) -> DataFlowGraph {
    let tracked: BTreeSet<&str> = body
        .stmts
        .iter()
        .flat_map(|s| s.defs.iter().map(|d| d.as_str()))
        .collect();

    let mut variables: BTreeMap<String, VariableInfo> = BTreeMap::new();
    let stmt_blocks = cfg.block_of_stmts(body.stmts.len());
    for stmt in &body.stmts {
        if stmt_blocks.get(stmt.id).copied().flatten().is_none() {
            continue;
        }
        for d in &stmt.defs {
            push_line(&mut variables.entry(d.clone()).or_default().def_lines, stmt.line);
        }
        for u in stmt.uses.iter().filter(|u| tracked.contains(u.as_str())) {
            push_line(&mut variables.entry(u.clone()).or_default().use_lines, stmt.line);
        }
    }

    // Worklist over blocks.
    let n = cfg.blocks.len();
    let mut block_in: Vec<Reach> = vec![Reach::new(); n];
    let mut block_out: Vec<Reach> = vec![Reach::new(); n];
    let mut queue: VecDeque<usize> = (0..n).collect();
    let mut queued = vec![true; n];

    while let Some(b) = queue.pop_front() {
        queued[b] = false;
        let mut input = Reach::new();
        for p in cfg.predecessors(b) {
            merge(&mut input, &block_out[p]);
        }
        let mut state = input.clone();
        for &s in &cfg.blocks[b].stmts {
            apply_defs(&mut state, body, s);
        }
        block_in[b] = input;
        if state != block_out[b] {
            block_out[b] = state;
            for e in cfg.successors(b) {
                if !queued[e.to] {
                    queued[e.to] = true;
                    queue.push_back(e.to);
                }
            }
        }
    }

    let mut chains = Vec::new();
    for block in &cfg.blocks {
        let mut state = block_in[block.id].clone();
        for &s in &block.stmts {
            let Some(stmt) = body.stmts.get(s) else {
                continue;
            };
            for var in stmt.uses.iter().filter(|u| tracked.contains(u.as_str())) {
                let Some(defs) = state.get(var) else {
                    continue;
                };
                for &d in defs {
                    chains.push(DefUseChain {
                        variable: var.clone(),
                        def_stmt: d,
                        def_line: body.stmts[d].line,
                        use_stmt: s,
                        use_line: stmt.line,
                    });
                }
            }
            apply_defs(&mut state, body, s);
        }
    }
    chains.sort_by(|a, b| {
        (a.use_stmt, a.def_stmt, &a.variable).cmp(&(b.use_stmt, b.def_stmt, &b.variable))
    });

    DataFlowGraph { variables, chains }
}

fn push_line(lines: &mut Vec<usize>, line: usize) {
    if let Err(pos) = lines.binary_search(&line) {
        lines.insert(pos, line);
    }
}

fn merge(into: &mut Reach, from: &Reach) {
    for (var, defs) in from {
        into.entry(var.clone()).or_default().extend(defs.iter().copied());
    }
}

/// A definition kills every earlier definition of the same name.
fn apply_defs(state: &mut Reach, body: &UnitBody, stmt: StmtId) {
    if let Some(info) = body.stmts.get(stmt) {
        for d in &info.defs {
            state.insert(d.clone(), BTreeSet::from([stmt]));
        }
    }
}

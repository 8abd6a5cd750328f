//! Intra-unit flow analysis: Layers 3 (CFG), 4 (DFG) and 5 (dependence slices).
//!
//! A callable unit is lowered once into a statement tree ([`lower`]); the CFG
//! and DFG are built from that tree and cached. Slices are computed on demand
//! from the cached [`UnitFlow`].

pub mod cfg;
pub mod defuse;
pub mod dfg;
pub mod lower;
pub mod slice;

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use crate::parser::SyntaxTree;

pub use cfg::{BasicBlock, BlockKind, CfgEdge, ControlFlowGraph, EdgeKind};
pub use dfg::{DataFlowGraph, DefUseChain, VariableInfo};
pub use lower::{StmtId, StmtInfo, UnitBody};
pub use slice::{DependenceKind, DependenceSlice, SliceLine};

/// Cached flow results for one callable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFlow {
    pub stmts: Vec<StmtInfo>,
    pub cfg: ControlFlowGraph,
    pub dfg: DataFlowGraph,
}

impl UnitFlow {
    pub fn complexity(&self) -> u32 {
        self.cfg.complexity
    }
}

/// Lower a function node and build its CFG and DFG.
pub fn analyze(tree: &SyntaxTree, function: Node<'_>) -> UnitFlow {
    let body = lower::lower_unit(tree, function);
    let cfg = cfg::build(&body);
    let dfg = dfg::build(&body, &cfg);
    UnitFlow {
        stmts: body.stmts,
        cfg,
        dfg,
    }
}

//! Layer 3: control flow graphs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};

use super::lower::{Arm, Handler, Stmt, StmtId, UnitBody};

pub type BlockId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Entry,
    Exit,
    Body,
    Condition,
    LoopHeader,
    Handler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Fallthrough,
    True,
    False,
    Back,
    Exception,
    Jump,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub kind: BlockKind,
    pub stmts: Vec<StmtId>,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgEdge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFlowGraph {
    /// Reachable blocks; `blocks[entry]` is the entry, the exit is last.
    pub blocks: Vec<BasicBlock>,
    pub edges: Vec<CfgEdge>,
    pub entry: BlockId,
    pub exit: BlockId,
    /// Cyclomatic complexity, `edges - blocks + 2`.
    pub complexity: u32,
}

impl ControlFlowGraph {
    pub fn successors(&self, block: BlockId) -> impl Iterator<Item = &CfgEdge> + '_ {
        self.edges.iter().filter(move |e| e.from == block)
    }

    pub fn predecessors(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.edges.iter().filter(move |e| e.to == block).map(|e| e.from)
    }

    /// Block holding each statement; pruned statements map to `None`.
    pub fn block_of_stmts(&self, stmt_count: usize) -> Vec<Option<BlockId>> {
        let mut out = vec![None; stmt_count];
        for block in &self.blocks {
            for &s in &block.stmts {
                if let Some(slot) = out.get_mut(s) {
                    *slot = Some(block.id);
                }
            }
        }
        out
    }
}

pub fn build(body: &UnitBody) -> ControlFlowGraph {
    let mut builder = Builder::default();
    let entry = builder.block(BlockKind::Entry);
    let exit = builder.block(BlockKind::Exit);
    builder.exit = exit;
    builder.blocks[entry].stmts.push(UnitBody::ENTRY);

    let end = builder.seq(&body.root, Some(entry));
    builder.link(end, exit, EdgeKind::Fallthrough);
    builder.finish(body, entry, exit)
}

#[derive(Default)]
struct RawBlock {
    kind: Option<BlockKind>,
    stmts: Vec<StmtId>,
}

struct JumpTargets {
    break_to: BlockId,
    continue_to: Option<BlockId>,
}

#[derive(Default)]
struct Builder {
    blocks: Vec<RawBlock>,
    edges: Vec<(BlockId, BlockId, EdgeKind)>,
    exit: BlockId,
    jumps: Vec<JumpTargets>,
    /// Handler blocks of the enclosing `try` statements, innermost last.
    handlers: Vec<Vec<BlockId>>,
}

impl Builder {
    fn block(&mut self, kind: BlockKind) -> BlockId {
        self.blocks.push(RawBlock {
            kind: Some(kind),
            stmts: Vec::new(),
        });
        self.blocks.len() - 1
    }

    fn edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        self.edges.push((from, to, kind));
    }

    fn link(&mut self, from: Option<BlockId>, to: BlockId, kind: EdgeKind) {
        if let Some(from) = from {
            self.edge(from, to, kind);
        }
    }

    /// The block to append a plain statement to. Code after a jump starts a
    /// fresh block with no predecessors; pruning removes it.
    fn current(&mut self, cur: Option<BlockId>) -> BlockId {
        match cur {
            Some(b) => b,
            None => self.block(BlockKind::Body),
        }
    }

    /// Start a block of `kind` holding `stmt`, reusing `cur` when it is an
    /// empty body block.
    fn start(&mut self, cur: Option<BlockId>, kind: BlockKind, stmt: StmtId) -> BlockId {
        if let Some(b) = cur {
            let raw = &mut self.blocks[b];
            if raw.kind == Some(BlockKind::Body) && raw.stmts.is_empty() {
                raw.kind = Some(kind);
                raw.stmts.push(stmt);
                return b;
            }
        }
        let block = self.block(kind);
        self.blocks[block].stmts.push(stmt);
        self.link(cur, block, EdgeKind::Fallthrough);
        block
    }

    fn seq(&mut self, stmts: &[Stmt], mut cur: Option<BlockId>) -> Option<BlockId> {
        for stmt in stmts {
            cur = self.stmt(stmt, cur);
        }
        cur
    }

    fn stmt(&mut self, stmt: &Stmt, cur: Option<BlockId>) -> Option<BlockId> {
        match stmt {
            Stmt::Simple(id) => {
                let block = self.current(cur);
                self.blocks[block].stmts.push(*id);
                Some(block)
            }
            Stmt::If { cond, then, alt } => {
                let cond_block = self.start(cur, BlockKind::Condition, *cond);
                let join = self.block(BlockKind::Body);

                let then_block = self.block(BlockKind::Body);
                self.edge(cond_block, then_block, EdgeKind::True);
                let then_end = self.seq(then, Some(then_block));
                self.link(then_end, join, EdgeKind::Fallthrough);

                match alt {
                    Some(alt) => {
                        let else_block = self.block(BlockKind::Body);
                        self.edge(cond_block, else_block, EdgeKind::False);
                        let else_end = self.seq(alt, Some(else_block));
                        self.link(else_end, join, EdgeKind::Fallthrough);
                    }
                    None => self.edge(cond_block, join, EdgeKind::False),
                }
                Some(join)
            }
            Stmt::Loop {
                header,
                body,
                infinite,
            } => {
                let head = self.block(BlockKind::LoopHeader);
                self.blocks[head].stmts.push(*header);
                self.link(cur, head, EdgeKind::Fallthrough);
                let after = self.block(BlockKind::Body);

                self.jumps.push(JumpTargets {
                    break_to: after,
                    continue_to: Some(head),
                });
                let body_block = self.block(BlockKind::Body);
                self.edge(head, body_block, EdgeKind::True);
                let body_end = self.seq(body, Some(body_block));
                self.link(body_end, head, EdgeKind::Back);
                self.jumps.pop();

                if !infinite {
                    self.edge(head, after, EdgeKind::False);
                }
                Some(after)
            }
            Stmt::Return(id) => {
                let block = self.current(cur);
                self.blocks[block].stmts.push(*id);
                let exit = self.exit;
                self.edge(block, exit, EdgeKind::Jump);
                None
            }
            Stmt::Raise(id) => {
                let block = self.current(cur);
                self.blocks[block].stmts.push(*id);
                match self.handlers.last().cloned() {
                    Some(targets) if !targets.is_empty() => {
                        for h in targets {
                            self.edge(block, h, EdgeKind::Exception);
                        }
                    }
                    _ => {
                        let exit = self.exit;
                        self.edge(block, exit, EdgeKind::Exception);
                    }
                }
                None
            }
            Stmt::Break(id) => {
                let block = self.current(cur);
                self.blocks[block].stmts.push(*id);
                let target = self.jumps.last().map(|j| j.break_to).unwrap_or(self.exit);
                self.edge(block, target, EdgeKind::Jump);
                None
            }
            Stmt::Continue(id) => {
                let block = self.current(cur);
                self.blocks[block].stmts.push(*id);
                let target = self
                    .jumps
                    .iter()
                    .rev()
                    .find_map(|j| j.continue_to)
                    .unwrap_or(self.exit);
                self.edge(block, target, EdgeKind::Back);
                None
            }
            Stmt::Try {
                body,
                handlers,
                finally,
            } => self.try_stmt(cur, body, handlers, finally.as_deref()),
            Stmt::Switch {
                subject,
                arms,
                has_default,
                breaks,
            } => self.switch_stmt(cur, *subject, arms, *has_default, *breaks),
        }
    }

    fn try_stmt(
        &mut self,
        cur: Option<BlockId>,
        body: &[Stmt],
        handlers: &[Handler],
        finally: Option<&[Stmt]>,
    ) -> Option<BlockId> {
        let try_entry = self.block(BlockKind::Body);
        self.link(cur, try_entry, EdgeKind::Fallthrough);

        let handler_blocks: Vec<BlockId> = handlers
            .iter()
            .map(|h| {
                let block = self.block(BlockKind::Handler);
                self.blocks[block].stmts.push(h.header);
                block
            })
            .collect();
        for &h in &handler_blocks {
            self.edge(try_entry, h, EdgeKind::Exception);
        }

        self.handlers.push(handler_blocks.clone());
        let body_end = self.seq(body, Some(try_entry));
        self.handlers.pop();

        let join = self.block(BlockKind::Body);
        self.link(body_end, join, EdgeKind::Fallthrough);
        for (handler, block) in handlers.iter().zip(handler_blocks) {
            let end = self.seq(&handler.body, Some(block));
            self.link(end, join, EdgeKind::Fallthrough);
        }

        match finally {
            Some(stmts) => self.seq(stmts, Some(join)),
            None => Some(join),
        }
    }

    fn switch_stmt(
        &mut self,
        cur: Option<BlockId>,
        subject: StmtId,
        arms: &[Arm],
        has_default: bool,
        breaks: bool,
    ) -> Option<BlockId> {
        let head = self.start(cur, BlockKind::Condition, subject);
        let after = self.block(BlockKind::Body);
        if breaks {
            self.jumps.push(JumpTargets {
                break_to: after,
                continue_to: None,
            });
        }
        for arm in arms {
            let block = self.block(BlockKind::Body);
            self.blocks[block].stmts.push(arm.label);
            self.edge(head, block, EdgeKind::True);
            let end = self.seq(&arm.body, Some(block));
            self.link(end, after, EdgeKind::Fallthrough);
        }
        if breaks {
            self.jumps.pop();
        }
        if !has_default {
            self.edge(head, after, EdgeKind::False);
        }
        Some(after)
    }

    /// Prune unreachable blocks, renumber, dedupe edges and compute complexity.
    fn finish(self, body: &UnitBody, entry: BlockId, exit: BlockId) -> ControlFlowGraph {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([entry]);
        while let Some(b) = queue.pop_front() {
            if !reachable.insert(b) {
                continue;
            }
            for &(from, to, _) in &self.edges {
                if from == b && !reachable.contains(&to) {
                    queue.push_back(to);
                }
            }
        }

        let mut order: Vec<BlockId> = (0..self.blocks.len())
            .filter(|b| *b != exit && reachable.contains(b))
            .collect();
        order.push(exit);
        let mut remap = vec![None; self.blocks.len()];
        for (new, &old) in order.iter().enumerate() {
            remap[old] = Some(new);
        }

        let blocks: Vec<BasicBlock> = order
            .iter()
            .enumerate()
            .map(|(new, &old)| {
                let raw = &self.blocks[old];
                let lines = raw.stmts.iter().filter_map(|s| body.stmts.get(*s));
                let start_line = lines.clone().map(|s| s.line).min();
                let end_line = lines.map(|s| s.end_line).max();
                BasicBlock {
                    id: new,
                    kind: raw.kind.unwrap_or(BlockKind::Body),
                    stmts: raw.stmts.clone(),
                    start_line,
                    end_line,
                }
            })
            .collect();

        let mut seen = BTreeSet::new();
        let mut edges = Vec::new();
        for &(from, to, kind) in &self.edges {
            let (Some(from), Some(to)) = (remap[from], remap[to]) else {
                continue;
            };
            if seen.insert((from, to)) {
                edges.push(CfgEdge { from, to, kind });
            }
        }

        let complexity = (edges.len() as i64 - blocks.len() as i64 + 2).max(1) as u32;
        ControlFlowGraph {
            entry: 0,
            exit: blocks.len() - 1,
            blocks,
            edges,
            complexity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::test_support::flow_of;
    use crate::parser::SupportedLanguage;

    #[test]
    fn test_straight_line_complexity_one() {
        let flow = flow_of(
            SupportedLanguage::Python,
            "def f(a):\n    b = a + 1\n    return b\n",
        );
        assert_eq!(flow.cfg.complexity, 1);
        assert_eq!(flow.cfg.blocks[flow.cfg.entry].kind, BlockKind::Entry);
        assert_eq!(flow.cfg.blocks[flow.cfg.exit].kind, BlockKind::Exit);
    }

    #[test]
    fn test_if_else_and_loop() {
        let flow = flow_of(
            SupportedLanguage::Python,
            "def f(xs):\n    t = 0\n    for x in xs:\n        if x > 0:\n            t += x\n        else:\n            t -= x\n    return t\n",
        );
        assert_eq!(flow.cfg.complexity, 3);
        let kinds: Vec<_> = flow.cfg.edges.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EdgeKind::Back));
        assert!(kinds.contains(&EdgeKind::True));
        assert!(kinds.contains(&EdgeKind::False));
    }

    #[test]
    fn test_early_return_prunes_dead_code() {
        let flow = flow_of(
            SupportedLanguage::Python,
            "def f(a):\n    return a\n    print('dead')\n",
        );
        let dead_line_present = flow
            .cfg
            .blocks
            .iter()
            .any(|b| b.start_line == Some(3));
        assert!(!dead_line_present, "unreachable block should be pruned");
        assert_eq!(flow.cfg.complexity, 1);
    }

    #[test]
    fn test_elif_chain_complexity() {
        let flow = flow_of(
            SupportedLanguage::Python,
            "def f(x):\n    if x == 1:\n        return 'a'\n    elif x == 2:\n        return 'b'\n    elif x == 3:\n        return 'c'\n    return 'd'\n",
        );
        assert_eq!(flow.cfg.complexity, 4);
    }

    #[test]
    fn test_try_catch_adds_exception_edge() {
        let flow = flow_of(
            SupportedLanguage::JavaScript,
            "function f() {\n  try {\n    risky();\n  } catch (e) {\n    recover(e);\n  }\n  return 1;\n}\n",
        );
        assert!(flow.cfg.edges.iter().any(|e| e.kind == EdgeKind::Exception));
        assert!(flow.cfg.blocks.iter().any(|b| b.kind == BlockKind::Handler));
        assert_eq!(flow.cfg.complexity, 2);
    }

    #[test]
    fn test_switch_without_default() {
        let flow = flow_of(
            SupportedLanguage::Go,
            "package p\nfunc f(k int) int {\n\tswitch k {\n\tcase 1:\n\t\treturn 10\n\tcase 2:\n\t\treturn 20\n\t}\n\treturn 0\n}\n",
        );
        assert_eq!(flow.cfg.complexity, 3);
    }

    #[test]
    fn test_infinite_loop_with_break() {
        let flow = flow_of(
            SupportedLanguage::Rust,
            "fn f() -> u32 {\n    let mut n = 0;\n    loop {\n        n += 1;\n        if n > 3 { break; }\n    }\n    n\n}\n",
        );
        assert_eq!(flow.cfg.complexity, 2);
        let exit = flow.cfg.exit;
        assert!(flow.cfg.predecessors(exit).count() >= 1, "exit reachable through break");
    }
}

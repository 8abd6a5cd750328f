//! Lowering of a function body into a language-neutral statement tree.
//!
//! Every leaf statement and every compound-statement header becomes a
//! [`StmtInfo`] with its defs and uses. Statement 0 is a synthetic entry
//! statement on the signature line that defines the parameters.

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use super::defuse::{Collector, DefUse};
use crate::parser::grammar::{children_by_field, end_line, named_children_with_fields, node_text, start_line};
use crate::parser::language::LanguageSpec;
use crate::parser::SyntaxTree;

pub type StmtId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StmtInfo {
    pub id: StmtId,
    pub line: usize,
    pub end_line: usize,
    /// First source line of the statement, trimmed.
    pub text: String,
    pub defs: Vec<String>,
    pub uses: Vec<String>,
}

impl StmtInfo {
    pub fn covers(&self, line: usize) -> bool {
        self.line <= line && line <= self.end_line
    }
}

#[derive(Debug, Clone)]
pub struct Handler {
    pub header: StmtId,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Arm {
    pub label: StmtId,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Simple(StmtId),
    If {
        cond: StmtId,
        then: Vec<Stmt>,
        alt: Option<Vec<Stmt>>,
    },
    Loop {
        header: StmtId,
        body: Vec<Stmt>,
        infinite: bool,
    },
    Return(StmtId),
    Raise(StmtId),
    Break(StmtId),
    Continue(StmtId),
    Try {
        body: Vec<Stmt>,
        handlers: Vec<Handler>,
        finally: Option<Vec<Stmt>>,
    },
    Switch {
        subject: StmtId,
        arms: Vec<Arm>,
        has_default: bool,
        /// `break` inside an arm leaves the switch (C-style switches).
        breaks: bool,
    },
}

/// A lowered unit body: flat statement table plus structure.
#[derive(Debug, Clone)]
pub struct UnitBody {
    pub stmts: Vec<StmtInfo>,
    pub root: Vec<Stmt>,
}

impl UnitBody {
    /// The synthetic parameter statement.
    pub const ENTRY: StmtId = 0;
}

pub fn lower_unit(tree: &SyntaxTree, function: Node<'_>) -> UnitBody {
    let spec = tree.language().spec();
    let mut lowerer = Lowerer {
        spec,
        src: tree.source(),
        collector: Collector::new(spec, tree.source()),
        stmts: Vec::new(),
    };

    let params = lowerer.collector.parameters(function);
    let entry = lowerer.push(function, params, true);
    debug_assert_eq!(entry, UnitBody::ENTRY);

    let mut root = Vec::new();
    if let Some(body) = function.child_by_field_name("body") {
        if spec.block_kinds.contains(&body.kind()) {
            lowerer.lower(body, &mut root);
        } else {
            // expression-bodied arrow functions
            let id = lowerer.simple(body);
            root.push(Stmt::Return(id));
        }
    }

    UnitBody {
        stmts: lowerer.stmts,
        root,
    }
}

struct Lowerer<'a> {
    spec: &'static LanguageSpec,
    src: &'a str,
    collector: Collector<'a>,
    stmts: Vec<StmtInfo>,
}

impl<'a> Lowerer<'a> {
    fn push(&mut self, node: Node<'_>, du: DefUse, single_line: bool) -> StmtId {
        let id = self.stmts.len();
        let line = start_line(node);
        let text = node_text(node, self.src)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        self.stmts.push(StmtInfo {
            id,
            line,
            end_line: if single_line { line } else { end_line(node) },
            text,
            defs: du.defs,
            uses: du.uses,
        });
        id
    }

    fn simple(&mut self, node: Node<'_>) -> StmtId {
        let du = self.collector.statement(node);
        self.push(node, du, false)
    }

    fn header(&mut self, node: Node<'_>, exclude: &[&str]) -> StmtId {
        let du = self.collector.header(node, exclude);
        self.push(node, du, true)
    }

    fn is_skipped(&self, kind: &str) -> bool {
        self.spec.is_comment(kind)
            || self.spec.is_definition(kind)
            || self.spec.attribute_kinds.contains(&kind)
            || self.spec.wrapper_kinds.contains(&kind)
    }

    fn lower(&mut self, node: Node<'_>, out: &mut Vec<Stmt>) {
        let kind = node.kind();
        let spec = self.spec;
        if self.is_skipped(kind) {
            return;
        }

        if spec.block_kinds.contains(&kind) {
            for (_, child) in named_children_with_fields(node) {
                self.lower(child, out);
            }
        } else if spec.expression_wrappers.contains(&kind) && node.named_child_count() == 1 {
            if let Some(inner) = node.named_child(0) {
                self.lower(inner, out);
            }
        } else if spec.transparent_kinds.contains(&kind) {
            let header = self.header(node, &["body"]);
            out.push(Stmt::Simple(header));
            for (field, child) in named_children_with_fields(node) {
                if field == Some("body") || spec.block_kinds.contains(&child.kind()) {
                    self.lower(child, out);
                }
            }
        } else if spec.if_kinds.contains(&kind) {
            let stmt = self.if_stmt(node);
            out.push(stmt);
        } else if spec.loop_kinds.contains(&kind) {
            self.loop_stmt(node, out);
        } else if spec.return_kinds.contains(&kind) {
            let id = self.simple(node);
            if kind.contains("raise") || kind.contains("throw") {
                out.push(Stmt::Raise(id));
            } else {
                out.push(Stmt::Return(id));
            }
        } else if spec.break_kinds.contains(&kind) {
            let id = self.simple(node);
            out.push(Stmt::Break(id));
        } else if spec.continue_kinds.contains(&kind) {
            let id = self.simple(node);
            out.push(Stmt::Continue(id));
        } else if spec.try_kinds.contains(&kind) {
            self.try_stmt(node, out);
        } else if spec.switch_kinds.contains(&kind) {
            let stmt = self.switch_stmt(node);
            out.push(stmt);
        } else {
            let id = self.simple(node);
            out.push(Stmt::Simple(id));
        }
    }

    fn branch(&mut self, node: Node<'_>) -> Vec<Stmt> {
        let mut out = Vec::new();
        self.lower(node, &mut out);
        out
    }

    fn if_stmt(&mut self, node: Node<'_>) -> Stmt {
        let cond = self.header(node, &["consequence", "alternative", "body"]);
        let then = node
            .child_by_field_name("consequence")
            .or_else(|| node.child_by_field_name("body"))
            .map(|b| self.branch(b))
            .unwrap_or_default();
        let alternatives = children_by_field(node, "alternative");
        let alt = self.alternatives(&alternatives);
        Stmt::If { cond, then, alt }
    }

    fn alternatives(&mut self, alternatives: &[Node<'_>]) -> Option<Vec<Stmt>> {
        let (first, rest) = alternatives.split_first()?;
        let kind = first.kind();

        if self.spec.elif_kinds.contains(&kind) {
            let cond = self.header(*first, &["consequence"]);
            let then = first
                .child_by_field_name("consequence")
                .map(|b| self.branch(b))
                .unwrap_or_default();
            let alt = self.alternatives(rest);
            return Some(vec![Stmt::If { cond, then, alt }]);
        }

        let mut out = Vec::new();
        if self.spec.else_kinds.contains(&kind) {
            match first.child_by_field_name("body") {
                Some(body) => self.lower(body, &mut out),
                None => {
                    for (_, child) in named_children_with_fields(*first) {
                        self.lower(child, &mut out);
                    }
                }
            }
        } else {
            self.lower(*first, &mut out);
        }
        Some(out)
    }

    fn loop_stmt(&mut self, node: Node<'_>, out: &mut Vec<Stmt>) {
        let header = self.header(node, &["body", "alternative"]);
        let body = node
            .child_by_field_name("body")
            .map(|b| self.branch(b))
            .unwrap_or_default();
        let infinite = named_children_with_fields(node)
            .iter()
            .all(|(field, child)| *field == Some("body") || self.spec.is_comment(child.kind()));
        out.push(Stmt::Loop {
            header,
            body,
            infinite,
        });

        // Python's `for ... else` runs after normal termination.
        if let Some(alt) = node.child_by_field_name("alternative") {
            match alt.child_by_field_name("body") {
                Some(body) => self.lower(body, out),
                None => self.lower(alt, out),
            }
        }
    }

    fn try_stmt(&mut self, node: Node<'_>, out: &mut Vec<Stmt>) {
        if let Some(resources) = node.child_by_field_name("resources") {
            let id = self.simple(resources);
            out.push(Stmt::Simple(id));
        }

        let mut body = node
            .child_by_field_name("body")
            .map(|b| self.branch(b))
            .unwrap_or_default();
        let mut handlers = Vec::new();
        let mut finally = None;

        for (_, child) in named_children_with_fields(node) {
            let kind = child.kind();
            if self.spec.catch_kinds.contains(&kind) {
                let header = self.header(child, &["body"]);
                let handler_body = self.clause_body(child);
                handlers.push(Handler {
                    header,
                    body: handler_body,
                });
            } else if self.spec.finally_kinds.contains(&kind) {
                finally = Some(self.clause_body(child));
            } else if self.spec.else_kinds.contains(&kind) {
                let extra = self.clause_body(child);
                body.extend(extra);
            }
        }

        out.push(Stmt::Try {
            body,
            handlers,
            finally,
        });
    }

    /// Body of a catch/finally/else clause: its `body` field or its blocks.
    fn clause_body(&mut self, clause: Node<'_>) -> Vec<Stmt> {
        if let Some(body) = clause.child_by_field_name("body") {
            return self.branch(body);
        }
        let mut out = Vec::new();
        for (_, child) in named_children_with_fields(clause) {
            if self.spec.block_kinds.contains(&child.kind()) {
                self.lower(child, &mut out);
            }
        }
        out
    }

    fn switch_stmt(&mut self, node: Node<'_>) -> Stmt {
        let subject = self.header(node, &["body"]);

        let mut arm_nodes = Vec::new();
        for (field, child) in named_children_with_fields(node) {
            if self.spec.case(child.kind()).is_some() {
                arm_nodes.push(child);
            } else if field == Some("body") {
                for (_, inner) in named_children_with_fields(child) {
                    if self.spec.case(inner.kind()).is_some() {
                        arm_nodes.push(inner);
                    }
                }
            }
        }

        let has_default = arm_nodes.iter().any(|arm| self.is_default_arm(*arm));
        let arms = arm_nodes.into_iter().map(|arm| self.arm(arm)).collect();
        Stmt::Switch {
            subject,
            arms,
            has_default,
            breaks: !node.kind().starts_with("match"),
        }
    }

    fn arm(&mut self, arm: Node<'_>) -> Arm {
        let body_field = self.spec.case(arm.kind()).and_then(|c| c.body);
        match body_field {
            Some(field) => {
                let label = self.header(arm, &[field]);
                let body = arm
                    .child_by_field_name(field)
                    .map(|b| self.branch(b))
                    .unwrap_or_default();
                Arm { label, body }
            }
            None => {
                let mut du = DefUse::default();
                let mut statements = Vec::new();
                for (field, child) in named_children_with_fields(arm) {
                    if is_label(field, child) {
                        du.merge(self.collector.statement(child));
                    } else if !self.spec.is_comment(child.kind()) {
                        statements.push(child);
                    }
                }
                let label = self.push(arm, du, true);
                let mut body = Vec::new();
                for child in statements {
                    self.lower(child, &mut body);
                }
                Arm { label, body }
            }
        }
    }

    fn is_default_arm(&self, arm: Node<'_>) -> bool {
        if arm.kind().contains("default") {
            return true;
        }
        named_children_with_fields(arm).iter().any(|(field, child)| {
            if !is_label(*field, *child) {
                return false;
            }
            let text = node_text(*child, self.src).trim();
            text == "_" || text.starts_with("default")
        })
    }
}

fn is_label(field: Option<&str>, node: Node<'_>) -> bool {
    matches!(field, Some("value" | "pattern" | "type" | "communication"))
        || matches!(node.kind(), "switch_label" | "case_pattern" | "guard")
}

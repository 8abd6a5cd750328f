//! Definition and use collection for single statements.
//!
//! Names are collected syntactically: identifiers in binding position (the
//! target field of an assignment-like node, parameters) are definitions,
//! every other identifier is a use. Nested definitions are not entered.

use tree_sitter::Node;

use crate::parser::grammar::{children_by_field, named_children_with_fields, node_text};
use crate::parser::language::{AssignSpec, LanguageSpec};

/// Fields that never bind names inside a pattern.
const PATTERN_SKIP: &[&str] = &["type", "key", "condition"];
/// Fields that never bind names inside a parameter list.
const PARAM_SKIP: &[&str] = &["type", "value", "default_value", "right", "return_type"];
/// Fields holding the container of a field or element access.
const PROJECTION_BASE: &[&str] = &["object", "value", "operand", "array"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefUse {
    pub defs: Vec<String>,
    pub uses: Vec<String>,
}

impl DefUse {
    fn def(&mut self, name: &str) {
        if !self.defs.iter().any(|d| d == name) {
            self.defs.push(name.to_string());
        }
    }

    fn used(&mut self, name: &str) {
        if !self.uses.iter().any(|u| u == name) {
            self.uses.push(name.to_string());
        }
    }

    pub fn merge(&mut self, other: DefUse) {
        for d in &other.defs {
            self.def(d);
        }
        for u in &other.uses {
            self.used(u);
        }
    }
}

pub struct Collector<'a> {
    spec: &'static LanguageSpec,
    src: &'a str,
}

impl<'a> Collector<'a> {
    pub fn new(spec: &'static LanguageSpec, src: &'a str) -> Self {
        Self { spec, src }
    }

    /// Defs and uses of a whole statement.
    pub fn statement(&self, node: Node<'_>) -> DefUse {
        let mut out = DefUse::default();
        self.collect(node, &mut out, true);
        out
    }

    /// Defs and uses of a compound statement's header: everything except the
    /// `exclude` fields and nested blocks.
    pub fn header(&self, node: Node<'_>, exclude: &[&str]) -> DefUse {
        let mut out = DefUse::default();
        if let Some(assign) = self.spec.assignment(node.kind()) {
            self.assignment(node, assign, &mut out, exclude);
            return out;
        }
        for (field, child) in named_children_with_fields(node) {
            if self.excluded(field, child, exclude) {
                continue;
            }
            self.collect(child, &mut out, false);
        }
        out
    }

    /// Parameter names of a function node.
    pub fn parameters(&self, function: Node<'_>) -> DefUse {
        let mut out = DefUse::default();
        for field in self.spec.param_fields {
            for params in children_by_field(function, field) {
                self.bind(params, &mut out, false, PARAM_SKIP);
            }
        }
        out
    }

    fn excluded(&self, field: Option<&str>, child: Node<'_>, exclude: &[&str]) -> bool {
        field.is_some_and(|f| exclude.contains(&f))
            || self.spec.block_kinds.contains(&child.kind())
            || self.spec.case(child.kind()).is_some()
    }

    fn collect(&self, node: Node<'_>, out: &mut DefUse, is_root: bool) {
        let kind = node.kind();
        if !is_root && self.spec.is_definition(kind) {
            return;
        }
        if let Some(assign) = self.spec.assignment(kind) {
            self.assignment(node, assign, out, &[]);
            return;
        }
        if let Some(update) = self.spec.update(kind) {
            let operand = match update.field {
                Some(field) => node.child_by_field_name(field),
                None => node.named_child(0),
            };
            if let Some(operand) = operand {
                self.bind(operand, out, true, PATTERN_SKIP);
            }
            return;
        }
        if self.spec.is_identifier(kind) {
            out.used(node_text(node, self.src));
            return;
        }
        for (field, child) in named_children_with_fields(node) {
            if field.is_some_and(|f| self.spec.skips_use(kind, f)) {
                continue;
            }
            self.collect(child, out, false);
        }
    }

    fn assignment(&self, node: Node<'_>, assign: &AssignSpec, out: &mut DefUse, exclude: &[&str]) {
        let augmented = assign.augmented || self.compound_operator(node);
        let mut targets = Vec::new();
        for (field, child) in named_children_with_fields(node) {
            if field == Some(assign.target) {
                targets.push(child);
                continue;
            }
            if self.excluded(field, child, exclude) {
                continue;
            }
            self.collect(child, out, false);
        }
        for target in targets {
            self.bind(target, out, augmented, PATTERN_SKIP);
        }
    }

    /// `x += 1` style operators spelled through an `operator` field.
    fn compound_operator(&self, node: Node<'_>) -> bool {
        node.child_by_field_name("operator")
            .map(|op| node_text(op, self.src))
            .is_some_and(|op| op.ends_with('=') && op != "=" && op != ":=")
    }

    fn bind(&self, node: Node<'_>, out: &mut DefUse, augmented: bool, skip: &[&str]) {
        let kind = node.kind();
        if self.spec.is_identifier(kind) {
            let name = node_text(node, self.src);
            if augmented {
                out.used(name);
            }
            out.def(name);
            return;
        }
        if self.spec.projection_kinds.contains(&kind) {
            // `a[i] = v` and `obj.x = v` update part of the base variable:
            // it is read and redefined.
            self.collect(node, out, false);
            if let Some(base) = self.projection_base(node) {
                out.def(node_text(base, self.src));
            }
            return;
        }
        if kind == "type_annotation" {
            return;
        }
        for (field, child) in named_children_with_fields(node) {
            if field.is_some_and(|f| skip.contains(&f)) {
                continue;
            }
            self.bind(child, out, augmented, skip);
        }
    }

    /// Innermost identifier a chain of projections is rooted at.
    fn projection_base<'t>(&self, mut node: Node<'t>) -> Option<Node<'t>> {
        while self.spec.projection_kinds.contains(&node.kind()) {
            node = PROJECTION_BASE
                .iter()
                .find_map(|f| node.child_by_field_name(f))
                .or_else(|| node.named_child(0))?;
        }
        self.spec.is_identifier(node.kind()).then_some(node)
    }
}

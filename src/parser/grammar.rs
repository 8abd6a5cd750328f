//! Grammar adapter over tree-sitter.
//!
//! `parse` always succeeds on text input: tree-sitter recovers from syntax
//! errors and [`SyntaxTree::has_errors`] reports whether it had to. Only binary
//! content, unsupported languages and parser failures are errors.

use std::path::Path;
use tree_sitter::{InputEdit, Node, Parser, Tree};

use super::language::SupportedLanguage;
use crate::error::{Result, StrataError};

/// A parsed file: the tree plus the text it was parsed from.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    tree: Tree,
    source: String,
    language: SupportedLanguage,
}

impl SyntaxTree {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn language(&self) -> SupportedLanguage {
        self.language
    }

    /// True if tree-sitter inserted ERROR or MISSING nodes.
    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }

    pub fn text(&self, node: Node<'_>) -> &str {
        node_text(node, &self.source)
    }
}

/// Parse in-memory bytes with an explicit language.
pub fn parse(bytes: &[u8], language: SupportedLanguage) -> Result<SyntaxTree> {
    parse_with(bytes, language, Path::new("<memory>"), None)
}

/// Parse a file's bytes, detecting the language from its extension.
pub fn parse_path(path: &Path, bytes: &[u8]) -> Result<SyntaxTree> {
    let language = SupportedLanguage::from_path(path)
        .ok_or_else(|| StrataError::UnsupportedLanguage(path.to_path_buf()))?;
    parse_with(bytes, language, path, None)
}

/// Re-parse after an edit, reusing the unchanged parts of `previous`.
pub fn reparse(previous: &SyntaxTree, new_bytes: &[u8], edit: &InputEdit) -> Result<SyntaxTree> {
    let mut old = previous.tree.clone();
    old.edit(edit);
    parse_with(new_bytes, previous.language, Path::new("<memory>"), Some(&old))
}

fn parse_with(
    bytes: &[u8],
    language: SupportedLanguage,
    path: &Path,
    old: Option<&Tree>,
) -> Result<SyntaxTree> {
    if bytes.contains(&0) {
        return Err(StrataError::BinaryContent(path.to_path_buf()));
    }
    let source = std::str::from_utf8(bytes)
        .map_err(|_| StrataError::BinaryContent(path.to_path_buf()))?
        .to_string();

    let mut parser = Parser::new();
    parser
        .set_language(&language.tree_sitter_language())
        .map_err(|e| StrataError::ParserInitError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let tree = parser
        .parse(&source, old)
        .ok_or_else(|| StrataError::TreeSitterParseFailed(path.to_path_buf()))?;

    Ok(SyntaxTree {
        tree,
        source,
        language,
    })
}

pub fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

/// 1-based line of a node's first byte.
pub fn start_line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

pub fn end_line(node: Node<'_>) -> usize {
    node.end_position().row + 1
}

/// Named children paired with the field they occupy, in source order.
pub fn named_children_with_fields<'t>(node: Node<'t>) -> Vec<(Option<&'static str>, Node<'t>)> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    if !cursor.goto_first_child() {
        return out;
    }
    loop {
        let child = cursor.node();
        if child.is_named() {
            out.push((cursor.field_name(), child));
        }
        if !cursor.goto_next_sibling() {
            break;
        }
    }
    out
}

/// All named children occupying `field` (some grammars repeat a field).
pub fn children_by_field<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    named_children_with_fields(node)
        .into_iter()
        .filter(|(f, _)| *f == Some(field))
        .map(|(_, n)| n)
        .collect()
}

//! Summary text embedded for each unit.
//!
//! The summary combines structure from every layer so that two units with the
//! same behavior but different names still land close together: what a unit
//! calls matters more than what it is called.

use sha2::{Digest, Sha256};
use std::fmt::Write;

use crate::graph::types::CodeUnit;

/// Inputs gathered from the snapshot for one unit.
#[derive(Debug, Default)]
pub struct SummaryParts<'a> {
    pub callees: Vec<&'a str>,
    pub callers: Vec<&'a str>,
    pub complexity: Option<u32>,
    pub variables: Option<usize>,
    pub imports: Vec<&'a str>,
}

pub fn summarize(unit: &CodeUnit, mut parts: SummaryParts<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", unit.kind, unit.qualified_name);
    let _ = writeln!(out, "signature: {}", unit.signature);
    if let Some(doc) = &unit.docstring {
        let _ = writeln!(out, "doc: {doc}");
    }

    for list in [&mut parts.callees, &mut parts.callers, &mut parts.imports] {
        list.sort_unstable();
        list.dedup();
    }
    if !parts.callees.is_empty() {
        let _ = writeln!(out, "calls: {}", parts.callees.join(", "));
    }
    if !parts.callers.is_empty() {
        let _ = writeln!(out, "called by: {}", parts.callers.join(", "));
    }
    if let Some(c) = parts.complexity {
        let _ = writeln!(out, "complexity: {c}");
    }
    if let Some(v) = parts.variables {
        let _ = writeln!(out, "variables: {v}");
    }
    if !parts.imports.is_empty() {
        let _ = writeln!(out, "imports: {}", parts.imports.join(", "));
    }
    if !unit.preview.is_empty() {
        out.push_str("body:\n");
        out.push_str(&unit.preview);
        if !unit.preview.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// Hex SHA-256 of a summary.
pub fn summary_hash(summary: &str) -> String {
    hex(&Sha256::digest(summary.as_bytes()))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::UnitKind;
    use std::path::PathBuf;

    fn unit() -> CodeUnit {
        CodeUnit {
            qualified_name: "cache.remember".into(),
            name: "remember".into(),
            kind: UnitKind::Function,
            signature: "def remember(key, value)".into(),
            file: PathBuf::from("cache.py"),
            start_line: 1,
            end_line: 3,
            docstring: Some("Store a value.".into()),
            parent: None,
            preview: "def remember(key, value):\n    client.setex(key, 60, value)".into(),
        }
    }

    #[test]
    fn test_summary_sorts_and_dedupes_names() {
        let text = summarize(
            &unit(),
            SummaryParts {
                callees: vec!["setex", "get", "setex"],
                callers: vec!["views.show", "api.handler"],
                complexity: Some(2),
                variables: Some(3),
                imports: vec!["redis"],
            },
        );
        assert!(text.contains("calls: get, setex\n"));
        assert!(text.contains("called by: api.handler, views.show\n"));
        assert!(text.contains("complexity: 2\n"));
        assert!(text.contains("doc: Store a value.\n"));
        assert!(text.ends_with("client.setex(key, 60, value)\n"));
    }

    #[test]
    fn test_summary_hash_tracks_content() {
        let a = summarize(&unit(), SummaryParts::default());
        let b = summarize(&unit(), SummaryParts::default());
        assert_eq!(summary_hash(&a), summary_hash(&b));
        assert_eq!(summary_hash(&a).len(), 64);

        let c = summarize(
            &unit(),
            SummaryParts {
                callers: vec!["main"],
                ..SummaryParts::default()
            },
        );
        assert_ne!(summary_hash(&a), summary_hash(&c));
    }
}

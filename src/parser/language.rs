//! Language registry.
//!
//! Each supported language maps to a static [`LanguageSpec`]: the node kinds
//! the extractor and the flow builders look for. Adding a language means adding
//! a grammar dependency and one table; no other module matches on language.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportedLanguage {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Java,
}

impl SupportedLanguage {
    /// Detect language from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::from_extension(ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            "js" | "mjs" | "cjs" | "jsx" => Some(Self::JavaScript),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            _ => None,
        }
    }

    pub fn tree_sitter_language(&self) -> tree_sitter::Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
        }
    }

    /// Node-kind tables for this language.
    pub fn spec(&self) -> &'static LanguageSpec {
        match self {
            Self::Rust => &RUST,
            Self::Python => &PYTHON,
            Self::JavaScript => &JAVASCRIPT,
            Self::TypeScript | Self::Tsx => &TYPESCRIPT,
            Self::Go => &GO,
            Self::Java => &JAVA,
        }
    }

    /// Separator used when this language writes a module path.
    pub fn path_separator(&self) -> &'static str {
        match self {
            Self::Rust => "::",
            Self::JavaScript | Self::TypeScript | Self::Tsx | Self::Go => "/",
            Self::Python | Self::Java => ".",
        }
    }

    /// Go resolves unqualified calls across files of the same directory.
    pub fn has_package_scope(&self) -> bool {
        matches!(self, Self::Go)
    }

    pub fn all() -> &'static [SupportedLanguage] {
        &[
            Self::Rust,
            Self::Python,
            Self::JavaScript,
            Self::TypeScript,
            Self::Tsx,
            Self::Go,
            Self::Java,
        ]
    }
}

impl fmt::Display for SupportedLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Java => "java",
        };
        f.write_str(name)
    }
}

/// A call node and the fields naming its callee.
#[derive(Debug)]
pub struct CallSpec {
    pub kind: &'static str,
    /// Field holding the callee expression (`foo`, `a.b.foo`, `Type::new`).
    pub function_field: &'static str,
    /// Field holding the receiver when the grammar splits it out (Java).
    pub receiver_field: Option<&'static str>,
}

/// A node that binds names: `target` field is written, `value` field is read.
#[derive(Debug)]
pub struct AssignSpec {
    pub kind: &'static str,
    pub target: &'static str,
    pub augmented: bool,
}

/// `x++` style nodes; `field` is `None` when the operand is the only child.
#[derive(Debug)]
pub struct UpdateSpec {
    pub kind: &'static str,
    pub field: Option<&'static str>,
}

/// A switch/match arm; `body` names the arm body field when there is one,
/// otherwise every non-label child is a statement.
#[derive(Debug)]
pub struct CaseSpec {
    pub kind: &'static str,
    pub body: Option<&'static str>,
}

#[derive(Debug)]
pub struct LanguageSpec {
    pub function_kinds: &'static [&'static str],
    pub class_kinds: &'static [&'static str],
    /// Nodes that name a scope without being a unit (`impl Foo`).
    pub scope_kinds: &'static [&'static str],
    /// Nodes wrapping a declaration (decorators, `export`).
    pub wrapper_kinds: &'static [&'static str],
    pub attribute_kinds: &'static [&'static str],
    pub comment_kinds: &'static [&'static str],
    pub import_kinds: &'static [&'static str],
    pub calls: &'static [CallSpec],
    /// Fields holding parameter lists on function nodes.
    pub param_fields: &'static [&'static str],

    pub block_kinds: &'static [&'static str],
    /// Statement wrappers around expressions (`expression_statement`).
    pub expression_wrappers: &'static [&'static str],
    pub if_kinds: &'static [&'static str],
    pub elif_kinds: &'static [&'static str],
    pub else_kinds: &'static [&'static str],
    pub loop_kinds: &'static [&'static str],
    pub return_kinds: &'static [&'static str],
    pub break_kinds: &'static [&'static str],
    pub continue_kinds: &'static [&'static str],
    pub try_kinds: &'static [&'static str],
    pub catch_kinds: &'static [&'static str],
    pub finally_kinds: &'static [&'static str],
    pub switch_kinds: &'static [&'static str],
    pub cases: &'static [CaseSpec],
    /// Nodes whose header is a plain statement and whose body runs inline.
    pub transparent_kinds: &'static [&'static str],

    pub identifier_kinds: &'static [&'static str],
    pub assignments: &'static [AssignSpec],
    pub updates: &'static [UpdateSpec],
    /// Member-access style targets: writing through them reads the base.
    pub projection_kinds: &'static [&'static str],
    /// `(parent kind, field)` pairs whose identifiers are names, not reads.
    pub skip_use_fields: &'static [(&'static str, &'static str)],
}

impl LanguageSpec {
    pub fn is_function(&self, kind: &str) -> bool {
        self.function_kinds.contains(&kind)
    }

    pub fn is_class(&self, kind: &str) -> bool {
        self.class_kinds.contains(&kind)
    }

    /// Nested definitions are their own units and stay out of a body's flow.
    pub fn is_definition(&self, kind: &str) -> bool {
        self.is_function(kind) || self.is_class(kind) || self.scope_kinds.contains(&kind)
    }

    pub fn is_comment(&self, kind: &str) -> bool {
        self.comment_kinds.contains(&kind)
    }

    pub fn call(&self, kind: &str) -> Option<&'static CallSpec> {
        self.calls.iter().find(|c| c.kind == kind)
    }

    pub fn assignment(&self, kind: &str) -> Option<&'static AssignSpec> {
        self.assignments.iter().find(|a| a.kind == kind)
    }

    pub fn update(&self, kind: &str) -> Option<&'static UpdateSpec> {
        self.updates.iter().find(|u| u.kind == kind)
    }

    pub fn case(&self, kind: &str) -> Option<&'static CaseSpec> {
        self.cases.iter().find(|c| c.kind == kind)
    }

    pub fn is_identifier(&self, kind: &str) -> bool {
        self.identifier_kinds.contains(&kind)
    }

    pub fn skips_use(&self, parent_kind: &str, field: &str) -> bool {
        self.skip_use_fields
            .iter()
            .any(|(k, f)| *k == parent_kind && *f == field)
    }
}

static RUST: LanguageSpec = LanguageSpec {
    function_kinds: &["function_item"],
    class_kinds: &["struct_item", "enum_item", "trait_item", "union_item"],
    scope_kinds: &["impl_item", "mod_item"],
    wrapper_kinds: &[],
    attribute_kinds: &["attribute_item", "inner_attribute_item"],
    comment_kinds: &["line_comment", "block_comment"],
    import_kinds: &["use_declaration"],
    calls: &[CallSpec {
        kind: "call_expression",
        function_field: "function",
        receiver_field: None,
    }],
    param_fields: &["parameters"],

    block_kinds: &["block"],
    expression_wrappers: &["expression_statement"],
    if_kinds: &["if_expression"],
    elif_kinds: &[],
    else_kinds: &["else_clause"],
    loop_kinds: &["for_expression", "while_expression", "loop_expression"],
    return_kinds: &["return_expression"],
    break_kinds: &["break_expression"],
    continue_kinds: &["continue_expression"],
    try_kinds: &[],
    catch_kinds: &[],
    finally_kinds: &[],
    switch_kinds: &["match_expression"],
    cases: &[CaseSpec {
        kind: "match_arm",
        body: Some("value"),
    }],
    transparent_kinds: &["unsafe_block"],

    identifier_kinds: &["identifier", "self"],
    assignments: &[
        AssignSpec { kind: "let_declaration", target: "pattern", augmented: false },
        AssignSpec { kind: "let_condition", target: "pattern", augmented: false },
        AssignSpec { kind: "for_expression", target: "pattern", augmented: false },
        AssignSpec { kind: "assignment_expression", target: "left", augmented: false },
        AssignSpec { kind: "compound_assignment_expr", target: "left", augmented: true },
        AssignSpec { kind: "match_arm", target: "pattern", augmented: false },
    ],
    updates: &[],
    projection_kinds: &["field_expression", "index_expression", "unary_expression"],
    skip_use_fields: &[],
};

static PYTHON: LanguageSpec = LanguageSpec {
    function_kinds: &["function_definition"],
    class_kinds: &["class_definition"],
    scope_kinds: &[],
    wrapper_kinds: &["decorated_definition"],
    attribute_kinds: &["decorator"],
    comment_kinds: &["comment"],
    import_kinds: &["import_statement", "import_from_statement"],
    calls: &[CallSpec {
        kind: "call",
        function_field: "function",
        receiver_field: None,
    }],
    param_fields: &["parameters"],

    block_kinds: &["block"],
    expression_wrappers: &[],
    if_kinds: &["if_statement"],
    elif_kinds: &["elif_clause"],
    else_kinds: &["else_clause"],
    loop_kinds: &["for_statement", "while_statement"],
    return_kinds: &["return_statement", "raise_statement"],
    break_kinds: &["break_statement"],
    continue_kinds: &["continue_statement"],
    try_kinds: &["try_statement"],
    catch_kinds: &["except_clause", "except_group_clause"],
    finally_kinds: &["finally_clause"],
    switch_kinds: &["match_statement"],
    cases: &[CaseSpec {
        kind: "case_clause",
        body: Some("consequence"),
    }],
    transparent_kinds: &["with_statement"],

    identifier_kinds: &["identifier"],
    assignments: &[
        AssignSpec { kind: "assignment", target: "left", augmented: false },
        AssignSpec { kind: "augmented_assignment", target: "left", augmented: true },
        AssignSpec { kind: "named_expression", target: "name", augmented: false },
        AssignSpec { kind: "for_statement", target: "left", augmented: false },
        AssignSpec { kind: "for_in_clause", target: "left", augmented: false },
        AssignSpec { kind: "as_pattern", target: "alias", augmented: false },
        AssignSpec { kind: "except_clause", target: "alias", augmented: false },
    ],
    updates: &[],
    projection_kinds: &["attribute", "subscript"],
    skip_use_fields: &[("attribute", "attribute"), ("keyword_argument", "name")],
};

static JAVASCRIPT: LanguageSpec = LanguageSpec {
    function_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
    ],
    class_kinds: &["class_declaration"],
    scope_kinds: &[],
    wrapper_kinds: &["export_statement"],
    attribute_kinds: &["decorator"],
    comment_kinds: &["comment"],
    import_kinds: &["import_statement"],
    calls: &[
        CallSpec { kind: "call_expression", function_field: "function", receiver_field: None },
        CallSpec { kind: "new_expression", function_field: "constructor", receiver_field: None },
    ],
    param_fields: &["parameters", "parameter"],

    block_kinds: &["statement_block"],
    expression_wrappers: &[],
    if_kinds: &["if_statement"],
    elif_kinds: &[],
    else_kinds: &["else_clause"],
    loop_kinds: &["for_statement", "for_in_statement", "while_statement", "do_statement"],
    return_kinds: &["return_statement", "throw_statement"],
    break_kinds: &["break_statement"],
    continue_kinds: &["continue_statement"],
    try_kinds: &["try_statement"],
    catch_kinds: &["catch_clause"],
    finally_kinds: &["finally_clause"],
    switch_kinds: &["switch_statement"],
    cases: &[
        CaseSpec { kind: "switch_case", body: None },
        CaseSpec { kind: "switch_default", body: None },
    ],
    transparent_kinds: &["labeled_statement"],

    identifier_kinds: &[
        "identifier",
        "shorthand_property_identifier",
        "shorthand_property_identifier_pattern",
    ],
    assignments: &[
        AssignSpec { kind: "variable_declarator", target: "name", augmented: false },
        AssignSpec { kind: "assignment_expression", target: "left", augmented: false },
        AssignSpec { kind: "augmented_assignment_expression", target: "left", augmented: true },
        AssignSpec { kind: "for_in_statement", target: "left", augmented: false },
        AssignSpec { kind: "catch_clause", target: "parameter", augmented: false },
    ],
    updates: &[UpdateSpec { kind: "update_expression", field: Some("argument") }],
    projection_kinds: &["member_expression", "subscript_expression"],
    skip_use_fields: &[],
};

static TYPESCRIPT: LanguageSpec = LanguageSpec {
    function_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
    ],
    class_kinds: &[
        "class_declaration",
        "abstract_class_declaration",
        "interface_declaration",
    ],
    scope_kinds: &[],
    wrapper_kinds: &["export_statement"],
    attribute_kinds: &["decorator"],
    comment_kinds: &["comment"],
    import_kinds: &["import_statement"],
    calls: &[
        CallSpec { kind: "call_expression", function_field: "function", receiver_field: None },
        CallSpec { kind: "new_expression", function_field: "constructor", receiver_field: None },
    ],
    param_fields: &["parameters", "parameter"],

    block_kinds: &["statement_block"],
    expression_wrappers: &[],
    if_kinds: &["if_statement"],
    elif_kinds: &[],
    else_kinds: &["else_clause"],
    loop_kinds: &["for_statement", "for_in_statement", "while_statement", "do_statement"],
    return_kinds: &["return_statement", "throw_statement"],
    break_kinds: &["break_statement"],
    continue_kinds: &["continue_statement"],
    try_kinds: &["try_statement"],
    catch_kinds: &["catch_clause"],
    finally_kinds: &["finally_clause"],
    switch_kinds: &["switch_statement"],
    cases: &[
        CaseSpec { kind: "switch_case", body: None },
        CaseSpec { kind: "switch_default", body: None },
    ],
    transparent_kinds: &["labeled_statement"],

    identifier_kinds: &[
        "identifier",
        "shorthand_property_identifier",
        "shorthand_property_identifier_pattern",
    ],
    assignments: &[
        AssignSpec { kind: "variable_declarator", target: "name", augmented: false },
        AssignSpec { kind: "assignment_expression", target: "left", augmented: false },
        AssignSpec { kind: "augmented_assignment_expression", target: "left", augmented: true },
        AssignSpec { kind: "for_in_statement", target: "left", augmented: false },
        AssignSpec { kind: "catch_clause", target: "parameter", augmented: false },
    ],
    updates: &[UpdateSpec { kind: "update_expression", field: Some("argument") }],
    projection_kinds: &["member_expression", "subscript_expression"],
    skip_use_fields: &[],
};

static GO: LanguageSpec = LanguageSpec {
    function_kinds: &["function_declaration", "method_declaration"],
    class_kinds: &["type_spec"],
    scope_kinds: &[],
    wrapper_kinds: &["type_declaration"],
    attribute_kinds: &[],
    comment_kinds: &["comment"],
    import_kinds: &["import_declaration"],
    calls: &[CallSpec {
        kind: "call_expression",
        function_field: "function",
        receiver_field: None,
    }],
    param_fields: &["receiver", "parameters"],

    block_kinds: &["block", "statement_list"],
    expression_wrappers: &[],
    if_kinds: &["if_statement"],
    elif_kinds: &[],
    else_kinds: &[],
    loop_kinds: &["for_statement"],
    return_kinds: &["return_statement"],
    break_kinds: &["break_statement"],
    continue_kinds: &["continue_statement"],
    try_kinds: &[],
    catch_kinds: &[],
    finally_kinds: &[],
    switch_kinds: &[
        "expression_switch_statement",
        "type_switch_statement",
        "select_statement",
    ],
    cases: &[
        CaseSpec { kind: "expression_case", body: None },
        CaseSpec { kind: "type_case", body: None },
        CaseSpec { kind: "communication_case", body: None },
        CaseSpec { kind: "default_case", body: None },
    ],
    transparent_kinds: &[],

    identifier_kinds: &["identifier"],
    assignments: &[
        AssignSpec { kind: "short_var_declaration", target: "left", augmented: false },
        AssignSpec { kind: "assignment_statement", target: "left", augmented: false },
        AssignSpec { kind: "var_spec", target: "name", augmented: false },
        AssignSpec { kind: "const_spec", target: "name", augmented: false },
        AssignSpec { kind: "range_clause", target: "left", augmented: false },
    ],
    updates: &[
        UpdateSpec { kind: "inc_statement", field: None },
        UpdateSpec { kind: "dec_statement", field: None },
    ],
    projection_kinds: &["selector_expression", "index_expression", "unary_expression"],
    skip_use_fields: &[],
};

static JAVA: LanguageSpec = LanguageSpec {
    function_kinds: &["method_declaration", "constructor_declaration"],
    class_kinds: &[
        "class_declaration",
        "interface_declaration",
        "enum_declaration",
        "record_declaration",
    ],
    scope_kinds: &[],
    wrapper_kinds: &[],
    attribute_kinds: &["marker_annotation", "annotation"],
    comment_kinds: &["line_comment", "block_comment"],
    import_kinds: &["import_declaration"],
    calls: &[
        CallSpec { kind: "method_invocation", function_field: "name", receiver_field: Some("object") },
        CallSpec { kind: "object_creation_expression", function_field: "type", receiver_field: None },
    ],
    param_fields: &["parameters"],

    block_kinds: &["block", "constructor_body"],
    expression_wrappers: &[],
    if_kinds: &["if_statement"],
    elif_kinds: &[],
    else_kinds: &[],
    loop_kinds: &[
        "for_statement",
        "enhanced_for_statement",
        "while_statement",
        "do_statement",
    ],
    return_kinds: &["return_statement", "throw_statement"],
    break_kinds: &["break_statement"],
    continue_kinds: &["continue_statement"],
    try_kinds: &["try_statement", "try_with_resources_statement"],
    catch_kinds: &["catch_clause"],
    finally_kinds: &["finally_clause"],
    switch_kinds: &["switch_expression", "switch_statement"],
    cases: &[
        CaseSpec { kind: "switch_block_statement_group", body: None },
        CaseSpec { kind: "switch_rule", body: None },
    ],
    transparent_kinds: &["synchronized_statement"],

    identifier_kinds: &["identifier"],
    assignments: &[
        AssignSpec { kind: "variable_declarator", target: "name", augmented: false },
        AssignSpec { kind: "assignment_expression", target: "left", augmented: false },
        AssignSpec { kind: "enhanced_for_statement", target: "name", augmented: false },
        AssignSpec { kind: "catch_formal_parameter", target: "name", augmented: false },
        AssignSpec { kind: "resource", target: "name", augmented: false },
    ],
    updates: &[UpdateSpec { kind: "update_expression", field: None }],
    projection_kinds: &["field_access", "array_access"],
    skip_use_fields: &[("field_access", "field"), ("method_invocation", "name")],
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_from_path_detects_extensions() {
        assert_eq!(
            SupportedLanguage::from_path(&PathBuf::from("src/lib.rs")),
            Some(SupportedLanguage::Rust)
        );
        assert_eq!(
            SupportedLanguage::from_path(&PathBuf::from("app/view.tsx")),
            Some(SupportedLanguage::Tsx)
        );
        assert_eq!(
            SupportedLanguage::from_path(&PathBuf::from("cmd/main.go")),
            Some(SupportedLanguage::Go)
        );
        assert_eq!(SupportedLanguage::from_path(&PathBuf::from("Makefile")), None);
        assert_eq!(SupportedLanguage::from_path(&PathBuf::from("init.lua")), None);
    }

    #[test]
    fn test_every_grammar_loads() {
        for lang in SupportedLanguage::all() {
            let mut parser = tree_sitter::Parser::new();
            assert!(
                parser.set_language(&lang.tree_sitter_language()).is_ok(),
                "grammar for {lang} should load"
            );
        }
    }

    #[test]
    fn test_spec_lookups() {
        let spec = SupportedLanguage::Python.spec();
        assert!(spec.is_function("function_definition"));
        assert!(spec.is_definition("class_definition"));
        assert!(spec.assignment("augmented_assignment").unwrap().augmented);
        assert!(spec.skips_use("attribute", "attribute"));
        assert!(spec.call("call").is_some());
        assert!(SupportedLanguage::Rust.spec().case("match_arm").is_some());
    }
}

//! Layer 1: unit extraction from tree-sitter ASTs.
//!
//! Walks a parsed file once and produces:
//! - `CodeUnit`s for functions, methods and classes (nested units included)
//! - normalized import records
//! - call sites, attributed to the innermost enclosing callable unit
//!
//! Declaration kinds come from the language's `LanguageSpec`; only import
//! syntax needs per-language code.

use std::collections::HashMap;
use std::path::{Component, Path};
use tree_sitter::Node;

use super::grammar::{children_by_field, end_line, start_line, SyntaxTree};
use super::language::{LanguageSpec, SupportedLanguage};
use crate::graph::types::{CallSite, CodeUnit, FileExtraction, ImportRecord, ImportedName, UnitKind};

/// Lines kept in `CodeUnit::preview` unless configured otherwise.
pub const DEFAULT_PREVIEW_LINES: usize = 10;
/// Maximum bytes kept in a preview.
const MAX_PREVIEW_BYTES: usize = 2048;

/// Extract units, imports and calls from a parsed file.
///
/// `path` should be relative to the project root; it becomes the module key
/// of every qualified name.
pub fn extract(tree: &SyntaxTree, path: &Path) -> FileExtraction {
    extract_with(tree, path, DEFAULT_PREVIEW_LINES)
}

pub fn extract_with(tree: &SyntaxTree, path: &Path, preview_lines: usize) -> FileExtraction {
    walk(tree, path, preview_lines).extraction
}

/// Extraction plus the definition node of every unit, parallel to `units`.
/// Flow analysis lowers callable units from these nodes.
pub(crate) struct Walked<'t> {
    pub extraction: FileExtraction,
    pub nodes: Vec<Node<'t>>,
}

pub(crate) fn walk<'t>(tree: &'t SyntaxTree, path: &Path, preview_lines: usize) -> Walked<'t> {
    let language = tree.language();
    let mut walker = Walker {
        src: tree.source(),
        spec: language.spec(),
        language,
        path,
        module: module_key(path),
        preview_lines,
        units: Vec::new(),
        nodes: Vec::new(),
        imports: Vec::new(),
        calls: Vec::new(),
        seen: HashMap::new(),
    };
    let mut scopes = Vec::new();
    walker.visit(tree.root(), &mut scopes);

    Walked {
        extraction: FileExtraction {
            path: path.to_path_buf(),
            language: Some(language),
            module: walker.module,
            units: walker.units,
            imports: walker.imports,
            calls: walker.calls,
            has_errors: tree.has_errors(),
        },
        nodes: walker.nodes,
    }
}

/// Dotted module key for a relative path: `src/auth/login.py` -> `src.auth.login`.
///
/// Package entry files (`__init__.py`, `mod.rs`, `lib.rs`, `main.rs`,
/// `index.js`) take the key of their directory.
pub fn module_key(path: &Path) -> String {
    let mut parts: Vec<String> = path
        .with_extension("")
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str().map(|s| s.to_string()),
            _ => None,
        })
        .collect();

    if parts.len() > 1 {
        let last = parts.last().map(|s| s.as_str()).unwrap_or("");
        if matches!(last, "__init__" | "mod" | "lib" | "main" | "index") {
            parts.pop();
        }
    }
    parts.join(".")
}

struct Scope {
    qualified_name: String,
    is_type: bool,
    /// Index of the unit when the scope is a callable unit.
    callable: Option<usize>,
}

struct Walker<'t, 'p> {
    src: &'t str,
    spec: &'static LanguageSpec,
    language: SupportedLanguage,
    path: &'p Path,
    module: String,
    preview_lines: usize,
    units: Vec<CodeUnit>,
    nodes: Vec<Node<'t>>,
    imports: Vec<ImportRecord>,
    calls: Vec<CallSite>,
    seen: HashMap<String, usize>,
}

impl<'t, 'p> Walker<'t, 'p> {
    fn text(&self, node: Node<'_>) -> &'t str {
        self.src.get(node.byte_range()).unwrap_or("")
    }

    fn name_of(&self, node: Node<'_>) -> Option<String> {
        node.child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .filter(|s| !s.is_empty())
    }

    fn visit(&mut self, node: Node<'t>, scopes: &mut Vec<Scope>) {
        let kind = node.kind();

        if self.spec.import_kinds.contains(&kind) {
            self.record_import(node);
            return;
        }

        if self.spec.call(kind).is_some() {
            self.record_call(node, scopes);
        }

        if self.spec.is_function(kind) {
            if let Some(name) = self.name_of(node) {
                let mut receiver_scope = None;
                let unit_kind = if kind == "method_declaration" && self.language == SupportedLanguage::Go {
                    receiver_scope = self.go_receiver_type(node);
                    UnitKind::Method
                } else if scopes.last().is_some_and(|s| s.is_type) {
                    UnitKind::Method
                } else {
                    UnitKind::Function
                };
                let parent = match receiver_scope {
                    Some(ty) => Some(format!("{}.{}", self.module, ty)),
                    None => scopes.last().map(|s| s.qualified_name.clone()),
                };
                let decl = self.declaration_of(node);
                let index = self.push_unit(node, decl, node, name, unit_kind, parent);
                self.descend(node, scopes, index, false);
                return;
            }
        }

        if self.spec.is_class(kind) {
            if let Some(name) = self.class_name(node) {
                let decl = self.declaration_of(node);
                let parent = scopes.last().map(|s| s.qualified_name.clone());
                let index = self.push_unit(node, decl, node, name, UnitKind::Class, parent);
                self.descend(node, scopes, index, true);
                return;
            }
        }

        if self.spec.scope_kinds.contains(&kind) {
            if let Some(name) = self.scope_name(node) {
                let qualified_name = match scopes.last() {
                    Some(s) => format!("{}.{}", s.qualified_name, name),
                    None => format!("{}.{}", self.module, name),
                };
                scopes.push(Scope {
                    qualified_name,
                    is_type: kind == "impl_item",
                    callable: None,
                });
                self.visit_children(node, scopes);
                scopes.pop();
                return;
            }
        }

        if kind == "variable_declarator" && self.bound_callable(node, scopes) {
            return;
        }

        self.visit_children(node, scopes);
    }

    fn visit_children(&mut self, node: Node<'t>, scopes: &mut Vec<Scope>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child, scopes);
        }
    }

    fn descend(&mut self, node: Node<'t>, scopes: &mut Vec<Scope>, index: usize, is_type: bool) {
        scopes.push(Scope {
            qualified_name: self.units[index].qualified_name.clone(),
            is_type,
            callable: (!is_type).then_some(index),
        });
        self.visit_children(node, scopes);
        scopes.pop();
    }

    /// `const name = (..) => ..` and `const name = function (..) {..}`.
    fn bound_callable(&mut self, declarator: Node<'t>, scopes: &mut Vec<Scope>) -> bool {
        let Some(value) = declarator.child_by_field_name("value") else {
            return false;
        };
        if !matches!(value.kind(), "arrow_function" | "function_expression" | "function") {
            return false;
        }
        let Some(name) = declarator
            .child_by_field_name("name")
            .filter(|n| n.kind() == "identifier")
            .map(|n| self.text(n).to_string())
        else {
            return false;
        };

        let statement = declarator.parent().unwrap_or(declarator);
        let decl = self.declaration_of(statement);
        let parent = scopes.last().map(|s| s.qualified_name.clone());
        let index = self.push_unit(value, decl, statement, name, UnitKind::Function, parent);
        self.descend(value, scopes, index, false);
        true
    }

    fn push_unit(
        &mut self,
        def: Node<'t>,
        decl: Node<'t>,
        header_from: Node<'t>,
        name: String,
        kind: UnitKind,
        parent: Option<String>,
    ) -> usize {
        let base = match &parent {
            Some(p) => format!("{p}.{name}"),
            None if self.module.is_empty() => name.clone(),
            None => format!("{}.{}", self.module, name),
        };
        let count = self.seen.entry(base.clone()).or_insert(0);
        *count += 1;
        let qualified_name = if *count == 1 {
            base
        } else {
            format!("{base}#{count}")
        };

        let unit = CodeUnit {
            qualified_name,
            name,
            kind,
            signature: self.signature(header_from, def),
            file: self.path.to_path_buf(),
            start_line: start_line(header_from),
            end_line: end_line(header_from).max(end_line(def)),
            docstring: self.docstring(decl, def),
            parent,
            preview: self.preview(header_from),
        };
        self.units.push(unit);
        self.nodes.push(def);
        self.units.len() - 1
    }

    /// Walk up through decorator/export wrappers to the node comments attach to.
    fn declaration_of(&self, node: Node<'t>) -> Node<'t> {
        let mut decl = node;
        while let Some(parent) = decl.parent() {
            if self.spec.wrapper_kinds.contains(&parent.kind()) {
                decl = parent;
            } else {
                break;
            }
        }
        decl
    }

    fn class_name(&self, node: Node<'t>) -> Option<String> {
        if self.language == SupportedLanguage::Go {
            let ty = node.child_by_field_name("type")?;
            if !matches!(ty.kind(), "struct_type" | "interface_type") {
                return None;
            }
        }
        self.name_of(node)
    }

    fn scope_name(&self, node: Node<'t>) -> Option<String> {
        match node.kind() {
            "impl_item" => {
                let ty = node.child_by_field_name("type")?;
                Some(strip_generics(self.text(ty)).to_string())
            }
            _ => self.name_of(node),
        }
    }

    /// `func (s *Server) Start()` -> `Server`.
    fn go_receiver_type(&self, node: Node<'t>) -> Option<String> {
        let receiver = node.child_by_field_name("receiver")?;
        let mut stack = vec![receiver];
        while let Some(n) = stack.pop() {
            if n.kind() == "type_identifier" {
                return Some(self.text(n).to_string());
            }
            let mut cursor = n.walk();
            let children: Vec<_> = n.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
        None
    }

    /// Header text from the declaration start up to its body.
    fn signature(&self, header_from: Node<'t>, def: Node<'t>) -> String {
        let start = header_from.start_byte();
        let text = match def.child_by_field_name("body") {
            Some(body) if body.start_byte() > start => {
                self.src.get(start..body.start_byte()).unwrap_or("")
            }
            _ => self.text(header_from).lines().next().unwrap_or(""),
        };
        text.trim_end()
            .trim_end_matches(['{', ':'])
            .trim_end()
            .trim_end_matches("=>")
            .trim_end()
            .to_string()
    }

    fn preview(&self, node: Node<'t>) -> String {
        let mut text = self.text(node);
        if text.len() > MAX_PREVIEW_BYTES {
            let mut end = MAX_PREVIEW_BYTES;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            text = &text[..end];
        }
        text.lines()
            .take(self.preview_lines)
            .collect::<Vec<_>>()
            .join("\n")
    }

    // ─── Docstrings ─────────────────────────────────────────────

    fn docstring(&self, decl: Node<'t>, def: Node<'t>) -> Option<String> {
        self.leading_comments(decl).or_else(|| {
            if self.language == SupportedLanguage::Python {
                self.python_body_docstring(def)
            } else {
                None
            }
        })
    }

    /// The contiguous comment block ending on the line above `decl`.
    fn leading_comments(&self, decl: Node<'t>) -> Option<String> {
        let mut block: Vec<Node<'t>> = Vec::new();
        let mut next_row = decl.start_position().row;
        let mut sibling = decl.prev_sibling();

        while let Some(node) = sibling {
            let kind = node.kind();
            if self.spec.attribute_kinds.contains(&kind) {
                next_row = node.start_position().row;
                sibling = node.prev_sibling();
                continue;
            }
            if !self.spec.is_comment(kind) {
                break;
            }
            if node.end_position().row + 1 < next_row {
                break;
            }
            next_row = node.start_position().row;
            block.push(node);
            sibling = node.prev_sibling();
        }

        if block.is_empty() {
            return None;
        }
        block.reverse();
        let text = block
            .iter()
            .map(|n| clean_comment(self.text(*n)))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        (!text.is_empty()).then_some(text)
    }

    fn python_body_docstring(&self, def: Node<'t>) -> Option<String> {
        let body = def.child_by_field_name("body")?;
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = first.named_child(0).filter(|n| n.kind() == "string")?;
        let mut cursor = string.walk();
        let content = string
            .named_children(&mut cursor)
            .find(|n| n.kind() == "string_content")
            .map(|n| self.text(n).to_string())
            .unwrap_or_else(|| {
                self.text(string)
                    .trim_start_matches(['r', 'b', 'u', 'f', 'R', 'B', 'U', 'F'])
                    .trim_matches(['"', '\''])
                    .to_string()
            });
        let content = content.trim().to_string();
        (!content.is_empty()).then_some(content)
    }

    // ─── Calls ──────────────────────────────────────────────────

    fn record_call(&mut self, node: Node<'t>, scopes: &[Scope]) {
        let Some(caller) = scopes.iter().rev().find_map(|s| s.callable) else {
            return;
        };
        let Some(spec) = self.spec.call(node.kind()) else {
            return;
        };
        let Some(func) = node.child_by_field_name(spec.function_field) else {
            return;
        };

        let (name, receiver) = match spec.receiver_field {
            Some(field) => (
                strip_generics(self.text(func)).to_string(),
                node.child_by_field_name(field)
                    .map(|r| compact(self.text(r))),
            ),
            None => {
                let func = if func.kind() == "generic_function" {
                    func.child_by_field_name("function").unwrap_or(func)
                } else {
                    func
                };
                split_callee(&compact(self.text(func)))
            }
        };

        if !is_identifier(&name) {
            return;
        }
        self.calls.push(CallSite {
            caller,
            name,
            receiver: receiver.filter(|r| !r.is_empty()),
            line: start_line(node),
        });
    }

    // ─── Imports ────────────────────────────────────────────────

    fn record_import(&mut self, node: Node<'t>) {
        let line = start_line(node);
        match self.language {
            SupportedLanguage::Python => self.python_import(node, line),
            SupportedLanguage::Rust => {
                if let Some(arg) = node.child_by_field_name("argument") {
                    self.rust_use(arg, "", line);
                }
            }
            SupportedLanguage::JavaScript | SupportedLanguage::TypeScript | SupportedLanguage::Tsx => {
                self.js_import(node, line)
            }
            SupportedLanguage::Go => self.go_import(node),
            SupportedLanguage::Java => self.java_import(node, line),
        }
    }

    fn python_import(&mut self, node: Node<'t>, line: usize) {
        let names = children_by_field(node, "name");
        if node.kind() == "import_statement" {
            for name in names {
                let (module, alias) = self.aliased(name);
                self.imports.push(ImportRecord {
                    module,
                    names: Vec::new(),
                    alias,
                    wildcard: false,
                    line,
                });
            }
            return;
        }

        let module = node
            .child_by_field_name("module_name")
            .map(|m| self.text(m).to_string())
            .unwrap_or_default();
        let mut cursor = node.walk();
        let wildcard = node
            .named_children(&mut cursor)
            .any(|c| c.kind() == "wildcard_import");
        let names = names
            .into_iter()
            .map(|n| {
                let (name, alias) = self.aliased(n);
                ImportedName { name, alias }
            })
            .collect();
        self.imports.push(ImportRecord {
            module,
            names,
            alias: None,
            wildcard,
            line,
        });
    }

    /// `a.b as c` -> (`a.b`, Some(`c`)); plain names have no alias.
    fn aliased(&self, node: Node<'t>) -> (String, Option<String>) {
        if node.kind() == "aliased_import" {
            let name = node
                .child_by_field_name("name")
                .map(|n| self.text(n).to_string())
                .unwrap_or_default();
            let alias = node.child_by_field_name("alias").map(|n| self.text(n).to_string());
            (name, alias)
        } else {
            (self.text(node).to_string(), None)
        }
    }

    fn rust_use(&mut self, node: Node<'t>, prefix: &str, line: usize) {
        let join = |prefix: &str, rest: &str| {
            if prefix.is_empty() {
                rest.to_string()
            } else {
                format!("{prefix}::{rest}")
            }
        };
        match node.kind() {
            "use_list" => {
                let mut cursor = node.walk();
                let items: Vec<_> = node.named_children(&mut cursor).collect();
                for item in items {
                    self.rust_use(item, prefix, line);
                }
            }
            "scoped_use_list" => {
                let path = node
                    .child_by_field_name("path")
                    .map(|p| join(prefix, self.text(p)))
                    .unwrap_or_else(|| prefix.to_string());
                if let Some(list) = node.child_by_field_name("list") {
                    self.rust_use(list, &path, line);
                }
            }
            "use_wildcard" => {
                let mut cursor = node.walk();
                let path = node
                    .named_children(&mut cursor)
                    .next()
                    .map(|p| join(prefix, self.text(p)))
                    .unwrap_or_else(|| prefix.to_string());
                self.imports.push(ImportRecord {
                    module: path,
                    names: Vec::new(),
                    alias: None,
                    wildcard: true,
                    line,
                });
            }
            "use_as_clause" => {
                let path = node
                    .child_by_field_name("path")
                    .map(|p| join(prefix, self.text(p)))
                    .unwrap_or_default();
                let alias = node.child_by_field_name("alias").map(|a| self.text(a).to_string());
                self.push_rust_path(&path, alias, line);
            }
            "self" if !prefix.is_empty() => {
                self.imports.push(ImportRecord {
                    module: prefix.to_string(),
                    names: Vec::new(),
                    alias: None,
                    wildcard: false,
                    line,
                });
            }
            _ => {
                let path = join(prefix, self.text(node));
                self.push_rust_path(&path, None, line);
            }
        }
    }

    fn push_rust_path(&mut self, path: &str, alias: Option<String>, line: usize) {
        match path.rsplit_once("::") {
            Some((module, name)) => self.imports.push(ImportRecord {
                module: module.to_string(),
                names: vec![ImportedName {
                    name: name.to_string(),
                    alias,
                }],
                alias: None,
                wildcard: false,
                line,
            }),
            None => self.imports.push(ImportRecord {
                module: path.to_string(),
                names: Vec::new(),
                alias,
                wildcard: false,
                line,
            }),
        }
    }

    fn js_import(&mut self, node: Node<'t>, line: usize) {
        let Some(source) = node.child_by_field_name("source") else {
            return;
        };
        let module = unquote(self.text(source)).to_string();
        let mut record = ImportRecord {
            module,
            names: Vec::new(),
            alias: None,
            wildcard: false,
            line,
        };

        let mut cursor = node.walk();
        let clauses: Vec<_> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "import_clause")
            .collect();
        for clause in clauses {
            let mut cursor = clause.walk();
            let parts: Vec<_> = clause.named_children(&mut cursor).collect();
            for part in parts {
                match part.kind() {
                    "identifier" => record.names.push(ImportedName {
                        name: self.text(part).to_string(),
                        alias: None,
                    }),
                    "namespace_import" => {
                        let mut cursor = part.walk();
                        record.alias = part
                            .named_children(&mut cursor)
                            .find(|n| n.kind() == "identifier")
                            .map(|n| self.text(n).to_string());
                    }
                    "named_imports" => {
                        let mut cursor = part.walk();
                        let specs: Vec<_> = part
                            .named_children(&mut cursor)
                            .filter(|n| n.kind() == "import_specifier")
                            .collect();
                        for spec in specs {
                            let name = spec
                                .child_by_field_name("name")
                                .map(|n| unquote(self.text(n)).to_string())
                                .unwrap_or_default();
                            let alias = spec
                                .child_by_field_name("alias")
                                .map(|n| self.text(n).to_string());
                            record.names.push(ImportedName { name, alias });
                        }
                    }
                    _ => {}
                }
            }
        }
        self.imports.push(record);
    }

    fn go_import(&mut self, node: Node<'t>) {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if n.kind() == "import_spec" {
                let Some(path) = n.child_by_field_name("path") else {
                    continue;
                };
                let name = n.child_by_field_name("name");
                let alias = name
                    .filter(|a| a.kind() == "package_identifier")
                    .map(|a| self.text(a).to_string());
                let wildcard = name.is_some_and(|a| a.kind() == "dot");
                self.imports.push(ImportRecord {
                    module: unquote(self.text(path)).to_string(),
                    names: Vec::new(),
                    alias,
                    wildcard,
                    line: start_line(n),
                });
                continue;
            }
            let mut cursor = n.walk();
            let children: Vec<_> = n.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }

    fn java_import(&mut self, node: Node<'t>, line: usize) {
        let text = self.text(node);
        let path = text
            .trim()
            .trim_start_matches("import")
            .trim()
            .trim_start_matches("static ")
            .trim()
            .trim_end_matches(';')
            .trim();
        if let Some(module) = path.strip_suffix(".*") {
            self.imports.push(ImportRecord {
                module: module.to_string(),
                names: Vec::new(),
                alias: None,
                wildcard: true,
                line,
            });
        } else if let Some((module, name)) = path.rsplit_once('.') {
            self.imports.push(ImportRecord {
                module: module.to_string(),
                names: vec![ImportedName {
                    name: name.to_string(),
                    alias: None,
                }],
                alias: None,
                wildcard: false,
                line,
            });
        }
    }
}

/// Strip comment markers from one comment node's text.
fn clean_comment(text: &str) -> String {
    text.lines()
        .map(|line| {
            let mut l = line.trim();
            for prefix in ["///", "//!", "//", "/**", "/*", "#"] {
                if let Some(rest) = l.strip_prefix(prefix) {
                    l = rest;
                    break;
                }
            }
            l = l.trim_end_matches("*/").trim();
            l.strip_prefix('*').unwrap_or(l).trim().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// `a.b.c` -> (`c`, Some(`a.b`)); `Type::new` -> (`new`, Some(`Type`)).
fn split_callee(text: &str) -> (String, Option<String>) {
    let dot = text.rfind('.').map(|i| (i, i + 1));
    let path = text.rfind("::").map(|i| (i, i + 2));
    let arrow = text.rfind("->").map(|i| (i, i + 2));
    let split = [dot, path, arrow].into_iter().flatten().max_by_key(|(i, _)| *i);

    match split {
        Some((at, after)) => {
            let receiver = text[..at].trim_end_matches('?').to_string();
            (strip_generics(&text[after..]).to_string(), Some(receiver))
        }
        None => (strip_generics(text).to_string(), None),
    }
}

fn strip_generics(text: &str) -> &str {
    text.split('<').next().unwrap_or(text).trim()
}

fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn unquote(text: &str) -> &str {
    text.trim_matches(['"', '\'', '`'])
}

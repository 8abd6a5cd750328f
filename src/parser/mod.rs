//! Parsing layer: tree-sitter grammars, the language registry, and Layer 1
//! unit extraction.

pub mod extractor;
pub mod grammar;
pub mod language;

pub use extractor::{extract, extract_with, module_key, DEFAULT_PREVIEW_LINES};
pub use grammar::{parse, parse_path, reparse, SyntaxTree};
pub use language::{LanguageSpec, SupportedLanguage};

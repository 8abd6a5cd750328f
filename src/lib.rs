//! # Strata
//!
//! Layered code intelligence for AI agents.
//!
//! Strata parses a project with tree-sitter and keeps five layers of analysis
//! per function, each built on the one below:
//!
//! - **L1 units**: functions, methods and classes with signatures and imports
//! - **L2 call graph**: cross-file call resolution and reverse-call impact
//! - **L3 control flow**: basic blocks and cyclomatic complexity
//! - **L4 data flow**: def/use chains from reaching definitions
//! - **L5 slices**: backward dependence slices over the PDG
//!
//! A semantic index ranks units by meaning. Results are cached per file and
//! refreshed incrementally; a per-project daemon serves them over a Unix
//! socket.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata::project::Project;
//! use strata::query;
//! use std::path::Path;
//!
//! let project = Project::open(Path::new("."))?;
//! project.refresh()?;
//! let impact = query::impact(&project.snapshot(), "login", None)?;
//! println!("{} callers", impact.count);
//! # Ok::<(), strata::StrataError>(())
//! ```

pub mod cache;
pub mod config;
pub mod daemon;
pub mod error;
pub mod flow;
pub mod graph;
pub mod parser;
pub mod project;
pub mod query;
pub mod semantic;
pub mod storage;
pub mod watcher;

// Re-exports for convenience
pub use error::{ErrorKind, Result, StrataError};

pub use cache::BuildReport;
pub use config::Config;
pub use graph::{CallGraph, CodeUnit, UnitArena, UnitKind};
pub use parser::SupportedLanguage;
pub use project::{Project, Snapshot};
pub use semantic::{Embedder, HashingEmbedder, SemanticIndex};

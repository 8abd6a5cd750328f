//! Project-wide structure: per-file analysis (Layers 1, 3, 4), the unit
//! arena and the resolved call graph (Layer 2).

pub mod arena;
pub mod builder;
pub mod calls;
pub mod naming;
pub mod types;

pub use arena::UnitArena;
pub use builder::{analyze_source, scan};
pub use calls::{CallGraph, ImpactEntry, Resolutions, Resolver};
pub use naming::disambiguate;
pub use types::{CallEdge, CallSite, Callee, CodeUnit, FileAnalysis, FileExtraction, ImportRecord, UnitId, UnitKind};

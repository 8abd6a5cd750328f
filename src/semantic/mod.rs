//! Semantic index: embeddings of per-unit summaries with exact cosine top-k.

pub mod embedder;
pub mod index;
pub mod summary;

pub use embedder::{Embedder, EmbeddingVector, HashingEmbedder};
pub use index::{EmbeddingRecord, SemanticIndex, SemanticMatch};
pub use summary::{summarize, summary_hash, SummaryParts};

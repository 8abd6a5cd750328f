//! Text embedding behind a trait.
//!
//! The engine never depends on a particular model: anything that maps text to
//! a fixed-length vector can back the semantic index. [`HashingEmbedder`] is
//! the built-in default; it needs no model files and is deterministic, which
//! keeps the persisted index valid across daemon restarts.

use sha2::{Digest, Sha256};

use crate::error::{Result, StrataError};

pub type EmbeddingVector = Vec<f32>;

/// A text embedding function.
pub trait Embedder: Send + Sync {
    /// Identifier stored next to persisted vectors. Vectors written under a
    /// different id are discarded on load.
    fn model_id(&self) -> String;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<EmbeddingVector>;

    /// Embed and check the dimension.
    fn embed_checked(&self, text: &str) -> Result<EmbeddingVector> {
        let vector = self.embed(text)?;
        if vector.len() != self.dimensions() {
            return Err(StrataError::Embedding(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimensions(),
                vector.len()
            )));
        }
        Ok(vector)
    }
}

/// Feature-hashing embedder over identifier-aware tokens.
///
/// Each token is hashed into one of `dims` buckets with a sign bit; the
/// vector is L2-normalized. `getUser`, `get_user` and `get user` embed
/// identically.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> String {
        format!("hashing-sha256-{}", self.dims)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let mut vector = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        utils::normalize_embedding(&mut vector);
        Ok(vector)
    }
}

/// Lowercased word tokens. Splits on punctuation, underscores and camelCase
/// boundaries; drops single characters.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in text.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = c.is_lowercase() || c.is_numeric();
            current.extend(c.to_lowercase());
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens.retain(|t| t.chars().count() > 1);
    tokens
}

pub mod utils {
    /// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot / (norm_a * norm_b)
    }

    /// Scale to unit length in place. Zero vectors are left alone.
    pub fn normalize_embedding(embedding: &mut [f32]) {
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in embedding.iter_mut() {
                *x /= norm;
            }
        }
    }
}

/// Feature-hashing embedder.
///
/// Produces deterministic bag-of-tokens vectors: every identifier token
/// (split on camelCase and snake_case) is hashed into one of `dimensions`
/// buckets with a hash-derived sign, then the vector is L2-normalized.
/// Texts sharing vocabulary end up with a positive cosine, which is enough
/// for the engine to work without downloading a model.
use sha2::{Digest, Sha256};

use super::{Embedder, EmbedderError};

/// Default dimensionality, matching multilingual-e5-small.
pub const DEFAULT_DIMENSIONS: usize = 384;

pub struct HashEmbedder {
    pub dimensions: usize,
}

impl HashEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

/// Stable 64-bit token hash: the first 8 bytes of SHA-256, big-endian.
///
/// Vectors are persisted, so the hash must not change between builds.
fn token_hash(token: &str) -> u64 {
    Sha256::digest(token.as_bytes())
        .iter()
        .take(8)
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Split text into lower-cased word tokens, breaking identifiers on
/// `_` and lower→upper case transitions.
pub(crate) fn word_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let mut current = String::new();
        let mut prev_lower = false;
        for c in raw.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.extend(c.to_lowercase());
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    tokens
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut embedding = vec![0.0f32; self.dimensions];

        for token in word_tokens(text) {
            let hash = token_hash(&token);

            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Embedder trait and shared types for text embedding.
///
/// The engine treats the embedding model as an opaque capability: text in,
/// fixed-dimension vector out. `hashing` provides a deterministic,
/// model-free implementation.
pub mod hashing;

use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("expected {expected} vectors, got {actual}")]
    BatchSizeMismatch { expected: usize, actual: usize },

    #[error("expected dimension {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc` from the indexer's worker pool.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Embed `texts` in groups of at most `batch_size`, checking that every
/// batch returns one vector of the right dimension per input.
///
/// Returns the vectors and the number of embedder calls made.
pub fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[&str],
    batch_size: usize,
) -> Result<(Vec<Vec<f32>>, usize), EmbedderError> {
    let dim = embedder.dimensions();
    let mut vectors = Vec::with_capacity(texts.len());
    let mut calls = 0;

    for batch in texts.chunks(batch_size.max(1)) {
        let out = embedder.embed_batch(batch)?;
        calls += 1;
        if out.len() != batch.len() {
            return Err(EmbedderError::BatchSizeMismatch {
                expected: batch.len(),
                actual: out.len(),
            });
        }
        for v in &out {
            if v.len() != dim {
                return Err(EmbedderError::DimensionMismatch {
                    expected: dim,
                    actual: v.len(),
                });
            }
        }
        vectors.extend(out);
    }

    Ok((vectors, calls))
}

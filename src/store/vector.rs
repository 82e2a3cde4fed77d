//! In-memory vector store with exact cosine top-K.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Location data stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// A single nearest-neighbour hit. `score` is raw cosine in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

/// Capability set the index store needs from a vector backend.
///
/// `search` takes `&self` so any number of readers may query concurrently;
/// mutations take `&mut self` and are therefore serialized by the owner.
pub trait VectorStore: Send + Sync {
    /// Insert or replace the vector for `id`.
    fn insert(&mut self, id: &str, vector: &[f32], metadata: VectorMetadata) -> Result<()>;

    /// Remove `id`; no-op if absent.
    fn delete(&mut self, id: &str);

    /// Top `k` entries by cosine similarity, ties broken by id ascending.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimensions(&self) -> usize;

    /// Release held resources.
    fn close(&mut self);
}

struct Entry {
    unit: Vec<f32>,
    metadata: VectorMetadata,
}

/// Brute-force store: vectors are normalized on insert and scanned in full.
pub struct FlatVectorStore {
    dim: usize,
    entries: HashMap<String, Entry>,
}

impl FlatVectorStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: HashMap::new(),
        }
    }

    fn check_dim(&self, len: usize, what: &str) -> Result<()> {
        if len != self.dim {
            return Err(Error::incompatible(
                "<vector store>",
                format!("{what} has dimension {len}, expected {}", self.dim),
            ));
        }
        Ok(())
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        vec![0.0; v.len()]
    }
}

impl VectorStore for FlatVectorStore {
    fn insert(&mut self, id: &str, vector: &[f32], metadata: VectorMetadata) -> Result<()> {
        self.check_dim(vector.len(), "vector")?;
        self.entries.insert(
            id.to_string(),
            Entry {
                unit: normalize(vector),
                metadata,
            },
        );
        Ok(())
    }

    fn delete(&mut self, id: &str) {
        self.entries.remove(id);
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        self.check_dim(query.len(), "query")?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let q = normalize(query);

        let mut scored: Vec<(&String, f32, &Entry)> = self
            .entries
            .iter()
            .map(|(id, e)| {
                let dot: f32 = e.unit.iter().zip(&q).map(|(a, b)| a * b).sum();
                (id, dot.clamp(-1.0, 1.0), e)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(id, score, e)| VectorHit {
                id: id.clone(),
                score,
                metadata: e.metadata.clone(),
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn dimensions(&self) -> usize {
        self.dim
    }

    fn close(&mut self) {
        self.entries.clear();
        self.entries.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(path: &str) -> VectorMetadata {
        VectorMetadata {
            file_path: path.to_string(),
            start_line: 1,
            end_line: 1,
        }
    }

    #[test]
    fn test_search_orders_by_cosine() {
        let mut store = FlatVectorStore::new(3);
        store.insert("a", &[1.0, 0.0, 0.0], meta("a.rs")).unwrap();
        store.insert("b", &[0.0, 1.0, 0.0], meta("b.rs")).unwrap();
        store.insert("c", &[-1.0, 0.0, 0.0], meta("c.rs")).unwrap();
        store.insert("d", &[0.7, 0.7, 0.0], meta("d.rs")).unwrap();

        let hits = store.search(&[2.0, 0.0, 0.0], 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d", "b", "c"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[3].score + 1.0).abs() < 1e-6);
        assert_eq!(hits[1].metadata.file_path, "d.rs");
    }

    #[test]
    fn test_ties_break_on_id() {
        let mut store = FlatVectorStore::new(2);
        for id in ["z", "m", "a"] {
            store.insert(id, &[1.0, 1.0], meta(id)).unwrap();
        }
        let hits = store.search(&[1.0, 1.0], 2).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m"]);
    }

    #[test]
    fn test_insert_replaces_and_delete_is_idempotent() {
        let mut store = FlatVectorStore::new(2);
        store.insert("x", &[1.0, 0.0], meta("x")).unwrap();
        store.insert("x", &[0.0, 1.0], meta("x2")).unwrap();
        assert_eq!(store.len(), 1);
        let hits = store.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].metadata.file_path, "x2");

        store.delete("x");
        store.delete("x");
        assert!(store.is_empty());
    }

    #[test]
    fn test_dimension_checks() {
        let mut store = FlatVectorStore::new(3);
        assert!(store.insert("x", &[1.0], meta("x")).is_err());
        assert!(store.search(&[1.0, 2.0], 5).is_err());
        assert!(store.search(&[1.0, 2.0, 3.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let mut store = FlatVectorStore::new(2);
        store.insert("z", &[0.0, 0.0], meta("z")).unwrap();
        let hits = store.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].score, 0.0);
    }

    #[test]
    fn test_close_releases_entries() {
        let mut store = FlatVectorStore::new(2);
        store.insert("x", &[1.0, 0.0], meta("x")).unwrap();
        store.close();
        assert_eq!(store.len(), 0);
    }
}

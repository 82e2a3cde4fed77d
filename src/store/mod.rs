//! Per-repository index store.
//!
//! Holds the `CodeIndex` document (file entries with their chunks and
//! vectors), a volatile vector store rebuilt from those chunks, and a
//! chunk-id lookup table. Persistence lives in `persist`, entry mutation and
//! change detection in `files`.
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::Result;

pub mod files;
pub mod models;
pub mod persist;
pub mod vector;

use models::{Chunk, ChunkConfig, CodeIndex, FileEntry, INDEX_VERSION, StoreStats};
use vector::{FlatVectorStore, VectorHit, VectorStore};

/// Where a chunk lives inside the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkRef {
    pub path: String,
    pub position: usize,
}

pub struct IndexStore {
    index: CodeIndex,
    chunk_cfg: ChunkConfig,
    vectors: Box<dyn VectorStore>,
    chunk_refs: HashMap<String, ChunkRef>,
    created_at: Option<chrono::DateTime<Utc>>,
}

impl IndexStore {
    /// Start an empty index for `repo_root`.
    pub fn create(repo_root: impl Into<PathBuf>, dim: usize, chunk_cfg: ChunkConfig) -> Self {
        let repository_path = repo_root.into();
        info!(
            "Creating empty index for {} (dim {dim})",
            repository_path.display()
        );
        Self {
            index: CodeIndex {
                id: index_id(&repository_path),
                version: INDEX_VERSION.to_string(),
                repository_path,
                last_modified: Utc::now(),
                dim,
                file_entries: BTreeMap::new(),
            },
            chunk_cfg,
            vectors: Box::new(FlatVectorStore::new(dim)),
            chunk_refs: HashMap::new(),
            created_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.index.id
    }

    pub fn version(&self) -> &str {
        &self.index.version
    }

    pub fn repository_path(&self) -> &Path {
        &self.index.repository_path
    }

    pub fn dim(&self) -> usize {
        self.index.dim
    }

    pub fn chunk_config(&self) -> &ChunkConfig {
        &self.chunk_cfg
    }

    pub fn set_chunk_config(&mut self, cfg: ChunkConfig) {
        self.chunk_cfg = cfg;
    }

    pub fn last_modified(&self) -> chrono::DateTime<Utc> {
        self.index.last_modified
    }

    /// All file entries, ordered by path.
    pub fn all_files(&self) -> impl Iterator<Item = &FileEntry> {
        self.index.file_entries.values()
    }

    pub fn get_file(&self, path: &str) -> Option<&FileEntry> {
        self.index.file_entries.get(path)
    }

    pub fn file_count(&self) -> usize {
        self.index.file_entries.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.index.file_entries.values().map(|e| e.chunks.len()).sum()
    }

    /// Look up a chunk and its owning file by chunk id.
    pub fn chunk(&self, id: &str) -> Option<(&FileEntry, &Chunk)> {
        let r = self.chunk_refs.get(id)?;
        let entry = self.index.file_entries.get(&r.path)?;
        entry.chunks.get(r.position).map(|c| (entry, c))
    }

    pub fn stats(&self) -> StoreStats {
        let mut languages = BTreeMap::new();
        for entry in self.index.file_entries.values() {
            *languages.entry(entry.language.clone()).or_insert(0) += 1;
        }
        StoreStats {
            file_count: self.file_count(),
            chunk_count: self.chunk_count(),
            vector_count: self.vectors.len(),
            languages,
        }
    }

    /// Nearest chunks to `query` by cosine similarity.
    pub fn search_vectors(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        self.vectors.search(query, k)
    }

    /// Drop in-memory state and return how many vectors were released.
    /// The on-disk index is untouched.
    pub fn close(mut self) -> usize {
        let released = self.vectors.len();
        self.vectors.close();
        self.chunk_refs.clear();
        debug!("Closed index {} ({} vectors released)", self.index.id, released);
        released
    }
}

/// Stable index id derived from the repository path.
fn index_id(repository_path: &Path) -> String {
    let digest = Sha256::digest(repository_path.to_string_lossy().as_bytes());
    hex::encode(&digest[..16])
}

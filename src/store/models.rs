use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted document format version. Indexes with a different major are
/// rejected on load.
pub const INDEX_VERSION: &str = "1.0.0";

/// A contiguous, content-addressed code segment of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

impl Chunk {
    pub fn line_span(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// One indexed source file and its chunks, ordered by `start_line`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub language: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub content_hash: String,
    pub line_count: usize,
    pub chunks: Vec<Chunk>,
}

impl FileEntry {
    pub fn chunk_ids(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(|c| c.id.as_str())
    }
}

/// Line-chunking parameters, recorded in the index header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub chunk_lines: usize,
    pub overlap_lines: usize,
    pub min_chunk_lines: usize,
    #[serde(default = "default_true")]
    pub structural_hints: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_lines: 30,
            overlap_lines: 5,
            min_chunk_lines: 3,
            structural_hints: true,
        }
    }
}

/// Root document persisted as `index.db`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeIndex {
    pub id: String,
    pub version: String,
    pub repository_path: PathBuf,
    pub last_modified: DateTime<Utc>,
    pub dim: usize,
    pub file_entries: BTreeMap<String, FileEntry>,
}

/// Header persisted as `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub version: String,
    pub dim: usize,
    pub repository_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub chunk_cfg: ChunkConfig,
    pub file_count: usize,
    pub chunk_count: usize,
}

/// Summary counters for a loaded store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub file_count: usize,
    pub chunk_count: usize,
    pub vector_count: usize,
    pub languages: BTreeMap<String, usize>,
}

/// Result of comparing an entry against the file currently on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Unchanged,
    Changed,
    Missing,
}

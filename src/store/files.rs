use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::models::{FileEntry, FileStatus};
use super::vector::VectorMetadata;
use super::{ChunkRef, IndexStore};
use crate::error::{Error, Result};

/// SHA-256 of raw file bytes, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stat shortcut: a file not modified after the recorded time and still of
/// the recorded size is taken as unchanged without reading it.
pub fn stat_unchanged(
    mtime: DateTime<Utc>,
    size: u64,
    recorded_mtime: DateTime<Utc>,
    recorded_size: u64,
) -> bool {
    mtime <= recorded_mtime && size == recorded_size
}

/// Hash step, for files whose stat moved.
pub fn content_status(hash: &str, recorded_hash: &str) -> FileStatus {
    if hash == recorded_hash {
        FileStatus::Unchanged
    } else {
        FileStatus::Changed
    }
}

/// Compare an indexed entry with the file at `abs_path`.
///
/// Cheap stat check first; the content hash is only computed when the
/// modification time moved forward or the size changed.
pub fn file_status(abs_path: &Path, entry: &FileEntry) -> FileStatus {
    let meta = match fs::metadata(abs_path) {
        Ok(m) if m.is_file() => m,
        _ => return FileStatus::Missing,
    };
    if let Ok(modified) = meta.modified() {
        if stat_unchanged(DateTime::<Utc>::from(modified), meta.len(), entry.last_modified, entry.size) {
            return FileStatus::Unchanged;
        }
    }
    match fs::read(abs_path) {
        Ok(bytes) => content_status(&content_hash(&bytes), &entry.content_hash),
        Err(_) => FileStatus::Missing,
    }
}

impl IndexStore {
    /// Insert or replace a file entry, keeping the vector store in sync.
    ///
    /// Returns the entry it replaced, if any.
    pub fn add_file_entry(&mut self, entry: FileEntry) -> Result<Option<FileEntry>> {
        let dim = self.dim();
        for chunk in &entry.chunks {
            if let Some(v) = &chunk.vector {
                if v.len() != dim {
                    return Err(Error::incompatible(
                        &entry.path,
                        format!("chunk {} has dimension {}, index uses {dim}", chunk.id, v.len()),
                    ));
                }
            }
        }

        let previous = self.remove_file_entry(&entry.path);

        for (position, chunk) in entry.chunks.iter().enumerate() {
            if let Some(v) = &chunk.vector {
                self.vectors.insert(
                    &chunk.id,
                    v,
                    VectorMetadata {
                        file_path: entry.path.clone(),
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                    },
                )?;
            }
            self.chunk_refs.insert(
                chunk.id.clone(),
                ChunkRef {
                    path: entry.path.clone(),
                    position,
                },
            );
        }

        debug!("Stored {} ({} chunks)", entry.path, entry.chunks.len());
        self.index.last_modified = Utc::now();
        self.index.file_entries.insert(entry.path.clone(), entry);
        Ok(previous)
    }

    /// Remove a file entry and purge its chunks from the vector store.
    pub fn remove_file_entry(&mut self, path: &str) -> Option<FileEntry> {
        let entry = self.index.file_entries.remove(path)?;
        for chunk in &entry.chunks {
            self.vectors.delete(&chunk.id);
            self.chunk_refs.remove(&chunk.id);
        }
        self.index.last_modified = Utc::now();
        debug!("Removed {} ({} chunks)", path, entry.chunks.len());
        Some(entry)
    }

    /// Refresh stat data of an entry whose content proved unchanged.
    pub fn touch_file(&mut self, path: &str, last_modified: DateTime<Utc>, size: u64) -> bool {
        match self.index.file_entries.get_mut(path) {
            Some(entry) => {
                entry.last_modified = last_modified;
                entry.size = size;
                true
            }
            None => false,
        }
    }

    /// Decide whether `entry` needs re-indexing against the working tree.
    pub fn should_reindex_file(&self, entry: &FileEntry) -> FileStatus {
        file_status(&self.repository_path().join(&entry.path), entry)
    }
}

//! Atomic save and load of the index documents.
//!
//! `index.db` and `metadata.json` are each written to a temporary file in
//! the index directory, fsynced and renamed over the target, so readers only
//! ever observe a complete document.
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::models::{CodeIndex, INDEX_VERSION, IndexMetadata};
use super::vector::{FlatVectorStore, VectorMetadata, VectorStore};
use super::{ChunkRef, IndexStore};
use crate::error::{Error, Result};
use crate::location::IndexLocation;

/// Write `target` atomically through a sibling temporary file.
///
/// If `write` fails the temporary file is removed and `target` is left as
/// it was.
pub(crate) fn write_atomic<F>(target: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
{
    let dir = target
        .parent()
        .ok_or_else(|| Error::Internal(format!("no parent directory for {}", target.display())))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer).map_err(|e| Error::io(target, e))?;
        writer.flush().map_err(|e| Error::io(target, e))?;
    }
    tmp.as_file().sync_all().map_err(|e| Error::io(target, e))?;
    tmp.persist(target).map_err(|e| Error::io(target, e.error))?;
    sync_dir(dir);
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn major(version: &str) -> Option<u64> {
    version.split('.').next()?.trim().parse().ok()
}

fn check_version(path: &Path, version: &str) -> Result<()> {
    let found = major(version)
        .ok_or_else(|| Error::corrupted(path, format!("unparseable version `{version}`")))?;
    let supported = major(INDEX_VERSION).unwrap_or(1);
    if found != supported {
        return Err(Error::incompatible(
            path,
            format!("index version {version} is not compatible with {INDEX_VERSION}"),
        ));
    }
    Ok(())
}

fn open_existing(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::NotFound {
            path: path.to_path_buf(),
            what: "index",
        },
        _ => Error::io(path, e),
    })
}

impl IndexStore {
    /// Read only the `metadata.json` header.
    pub fn read_metadata(location: &IndexLocation) -> Result<IndexMetadata> {
        let path = location.metadata_path();
        let file = match open_existing(&path) {
            Err(Error::NotFound { .. }) if location.index_path().is_file() => {
                return Err(Error::corrupted(&path, "metadata.json is missing"));
            }
            other => other?,
        };
        let meta: IndexMetadata = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::corrupted(&path, e.to_string()))?;
        check_version(&path, &meta.version)?;
        Ok(meta)
    }

    /// Load a committed index and rebuild its vector store.
    ///
    /// Fails with `IndexIncompatible` if the index was built with a
    /// different embedding dimension than `expected_dim`.
    pub fn load(location: &IndexLocation, expected_dim: usize) -> Result<Self> {
        let meta = Self::read_metadata(location)?;
        if meta.dim != expected_dim {
            return Err(Error::incompatible(
                location.metadata_path(),
                format!(
                    "index built with dimension {}, embedder produces {expected_dim}",
                    meta.dim
                ),
            ));
        }

        let path = location.index_path();
        let file = open_existing(&path)?;
        let index: CodeIndex = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::corrupted(&path, e.to_string()))?;
        check_version(&path, &index.version)?;
        if index.dim != meta.dim {
            return Err(Error::corrupted(
                &path,
                format!("document dimension {} disagrees with header {}", index.dim, meta.dim),
            ));
        }

        let store = Self::rebuild(index, meta)?;
        info!(
            "Loaded index {} ({} files, {} chunks)",
            path.display(),
            store.file_count(),
            store.chunk_count()
        );
        Ok(store)
    }

    fn rebuild(index: CodeIndex, meta: IndexMetadata) -> Result<Self> {
        let mut vectors = FlatVectorStore::new(index.dim);
        let mut chunk_refs = HashMap::new();

        for entry in index.file_entries.values() {
            for (position, chunk) in entry.chunks.iter().enumerate() {
                if let Some(v) = &chunk.vector {
                    if v.len() != index.dim {
                        return Err(Error::corrupted(
                            &entry.path,
                            format!("chunk {} has dimension {}", chunk.id, v.len()),
                        ));
                    }
                    vectors.insert(
                        &chunk.id,
                        v,
                        VectorMetadata {
                            file_path: entry.path.clone(),
                            start_line: chunk.start_line,
                            end_line: chunk.end_line,
                        },
                    )?;
                }
                chunk_refs.insert(
                    chunk.id.clone(),
                    ChunkRef {
                        path: entry.path.clone(),
                        position,
                    },
                );
            }
        }

        Ok(Self {
            index,
            chunk_cfg: meta.chunk_cfg,
            vectors: Box::new(vectors),
            chunk_refs,
            created_at: Some(meta.created_at),
        })
    }

    /// Commit the index to `location`: `index.db` first, then the header.
    pub fn save(&mut self, location: &IndexLocation) -> Result<IndexMetadata> {
        let dir = location.index_dir();
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let now = Utc::now();
        let created_at = self
            .created_at
            .or_else(|| Self::read_metadata(location).ok().map(|m| m.created_at))
            .unwrap_or(now);

        write_atomic(&location.index_path(), |w| {
            serde_json::to_writer(w, &self.index).map_err(std::io::Error::from)
        })?;

        let meta = IndexMetadata {
            version: self.index.version.clone(),
            dim: self.index.dim,
            repository_path: self.index.repository_path.clone(),
            created_at,
            updated_at: now,
            chunk_cfg: self.chunk_cfg,
            file_count: self.file_count(),
            chunk_count: self.chunk_count(),
        };
        write_atomic(&location.metadata_path(), |w| {
            serde_json::to_writer_pretty(&mut *w, &meta).map_err(std::io::Error::from)?;
            w.write_all(b"\n")
        })?;

        self.created_at = Some(created_at);
        debug!(
            "Committed index to {} ({} files, {} chunks)",
            dir.display(),
            meta.file_count,
            meta.chunk_count
        );
        Ok(meta)
    }
}

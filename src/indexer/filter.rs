//! Decides which files on disk are eligible for indexing.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

use super::languages::detect_language;
use crate::error::{Error, Result};
use crate::location::INDEX_DIR_NAME;

/// Default upper bound on indexed file size (1 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Bytes inspected by the binary sniff.
const SNIFF_LEN: usize = 512;

/// Segments rejected by default, matched against every path component.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "build",
    "dist",
    "target",
    ".idea",
    ".vscode",
    "coverage",
    "cache",
    "tmp",
    "*.min.js",
    "*.min.css",
];

/// Hidden names still indexed when hidden files are off.
const HIDDEN_EXCEPTIONS: &[&str] = &[
    ".github",
    ".gitlab-ci.yml",
    ".dockerignore",
    ".gitignore",
    ".editorconfig",
];

#[derive(Debug, Clone)]
pub struct FileFilter {
    deny: GlobSet,
    include_hidden: bool,
    max_file_size: u64,
}

impl FileFilter {
    pub fn new(include_hidden: bool, extra_excludes: &[String], max_file_size: u64) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_EXCLUDES
            .iter()
            .copied()
            .chain(extra_excludes.iter().map(String::as_str))
        {
            let glob = Glob::new(pattern).map_err(|e| Error::BadPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        let deny = builder.build().map_err(|e| Error::BadPattern {
            pattern: extra_excludes.join(","),
            message: e.to_string(),
        })?;

        Ok(Self {
            deny,
            include_hidden,
            max_file_size,
        })
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Whether a single path segment (file or directory name) is denied.
    pub fn is_segment_denied(&self, segment: &str) -> bool {
        if segment == INDEX_DIR_NAME {
            return true;
        }
        if segment.starts_with('.')
            && segment != "."
            && segment != ".."
            && !self.include_hidden
            && !HIDDEN_EXCEPTIONS.contains(&segment)
        {
            return true;
        }
        self.deny.is_match(segment)
    }

    /// Rule 1: no segment of the repo-relative path is denied.
    pub fn is_path_allowed(&self, rel_path: &str) -> bool {
        rel_path
            .split('/')
            .filter(|s| !s.is_empty())
            .all(|s| !self.is_segment_denied(s))
    }

    /// Rule 4: recognized source extension or special file.
    pub fn has_source_extension(rel_path: &str) -> bool {
        detect_language(rel_path).is_some()
    }

    /// Rule 3: a NUL byte in the sniffed prefix marks the file as binary.
    pub fn is_binary(prefix: &[u8]) -> bool {
        prefix.iter().take(SNIFF_LEN).any(|b| *b == 0)
    }

    /// Full decision for a file whose size is already known.
    pub fn should_index(&self, rel_path: &str, abs_path: &Path, size: u64) -> bool {
        if !self.is_path_allowed(rel_path) {
            return false;
        }
        if size > self.max_file_size {
            return false;
        }
        match sniff(abs_path) {
            Ok(prefix) if Self::is_binary(&prefix) => return false,
            Ok(_) => {}
            Err(_) => return false,
        }
        Self::has_source_extension(rel_path)
    }

    /// Full decision, stat-ing the file for its size.
    pub fn should_index_path(&self, rel_path: &str, abs_path: &Path) -> bool {
        match std::fs::metadata(abs_path) {
            Ok(meta) if meta.is_file() => self.should_index(rel_path, abs_path, meta.len()),
            _ => false,
        }
    }
}

fn sniff(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?.take(SNIFF_LEN as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Repo-relative, `/`-separated form of `path`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

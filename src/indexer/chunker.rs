//! Line-based chunking with optional structural snapping.
//!
//! Files are cut into windows of `chunk_lines` lines stepping by
//! `chunk_lines - overlap_lines`. When a file contains declaration lines
//! (`fn`, `func`, `def`, `class`, `struct`, `interface`), a window end that
//! lies within `overlap_lines` of such a line is moved onto it, and the next
//! window starts exactly there instead of overlapping.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::store::models::{Chunk, ChunkConfig};

static HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:pub(?:\([^)]*\))?|export|default|public|private|protected|internal|static|abstract|final|async|unsafe|extern|override|open|data|sealed)\s+)*(?:func|fn|class|def|interface|struct|type\s+\w+\s+(?:struct|interface))\b",
    )
    .expect("structural hint regex is valid")
});

const MAX_CONTEXT_CHARS: usize = 160;

/// Whether `line` opens a declaration.
pub fn is_structural_hint(line: &str) -> bool {
    HINT_RE.is_match(line)
}

/// Stable chunk identity: 128 bits of SHA-256 over content, path and span.
pub fn chunk_id(content: &str, path: &str, start_line: usize, end_line: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(b"\0");
    hasher.update(path.as_bytes());
    hasher.update(b"\0");
    hasher.update(start_line.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(end_line.to_string().as_bytes());
    let digest = hasher.finalize();
    format!("chunk_{}", hex::encode(&digest[..16]))
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_lines == 0 {
            return Err(Error::bad_request("chunk_size", "must be at least 1 line"));
        }
        if self.overlap_lines >= self.chunk_lines {
            return Err(Error::bad_request(
                "chunk_overlap",
                format!(
                    "must be smaller than chunk_size ({} >= {})",
                    self.overlap_lines, self.chunk_lines
                ),
            ));
        }
        if self.min_chunk_lines == 0 {
            return Err(Error::bad_request("min_chunk_lines", "must be at least 1 line"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    cfg: ChunkConfig,
}

impl Chunker {
    pub fn new(cfg: ChunkConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.cfg
    }

    /// Split `text` into chunks ordered by start line.
    pub fn chunk(&self, text: &str, path: &str, language: &str) -> Vec<Chunk> {
        let normalized = text.replace("\r\n", "\n");
        if normalized.trim().is_empty() {
            return Vec::new();
        }
        let lines: Vec<&str> = normalized.lines().collect();
        let hints: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| is_structural_hint(l))
            .map(|(i, _)| i)
            .collect();

        let snap_to = if self.cfg.structural_hints { hints.as_slice() } else { &[] };
        let windows = self.plan_windows(lines.len(), snap_to);

        let mut chunks = Vec::with_capacity(windows.len());
        for (start, end) in windows {
            let joined = lines[start..end].join("\n");
            if joined.trim().is_empty() {
                continue;
            }
            // leading lines are kept so that line offsets map onto start_line
            let content = joined.trim_end().to_string();
            let start_line = start + 1;
            let end_line = end;
            chunks.push(Chunk {
                id: chunk_id(&content, path, start_line, end_line),
                content,
                start_line,
                end_line,
                language: language.to_string(),
                context: enclosing_hint(&lines, &hints, start),
                vector: None,
            });
        }
        chunks
    }

    /// Zero-based half-open line windows covering `0..line_count`.
    fn plan_windows(&self, line_count: usize, hints: &[usize]) -> Vec<(usize, usize)> {
        let ChunkConfig {
            chunk_lines,
            overlap_lines,
            min_chunk_lines,
            ..
        } = self.cfg;

        if line_count <= chunk_lines || line_count < min_chunk_lines {
            return vec![(0, line_count)];
        }

        let mut windows: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;
        loop {
            let nominal_end = start + chunk_lines;
            if nominal_end >= line_count {
                if line_count - start < min_chunk_lines {
                    if let Some(last) = windows.last_mut() {
                        last.1 = line_count;
                        break;
                    }
                }
                windows.push((start, line_count));
                break;
            }

            let (end, next) = match nearest_hint(hints, start, nominal_end, overlap_lines, line_count) {
                Some(h) => (h, h),
                None => (nominal_end, nominal_end - overlap_lines),
            };
            windows.push((start, end));
            start = next;
        }
        windows
    }
}

/// Hint line nearest to `target` within `±radius`, strictly after `start`.
fn nearest_hint(
    hints: &[usize],
    start: usize,
    target: usize,
    radius: usize,
    line_count: usize,
) -> Option<usize> {
    let lo = target.saturating_sub(radius).max(start + 1);
    let hi = (target + radius).min(line_count - 1);
    hints
        .iter()
        .copied()
        .filter(|h| *h >= lo && *h <= hi)
        .min_by_key(|h| (h.abs_diff(target), *h))
}

/// The closest declaration line at or above `start`, as display context.
fn enclosing_hint(lines: &[&str], hints: &[usize], start: usize) -> Option<String> {
    let idx = hints.iter().rev().find(|h| **h <= start)?;
    let line = lines[*idx].trim();
    let mut context: String = line.chars().take(MAX_CONTEXT_CHARS).collect();
    if context.len() < line.len() {
        context.push('…');
    }
    Some(context)
}

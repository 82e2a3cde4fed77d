//! Rendering of command results for the terminal.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

use crate::indexer::{IndexStats, IndexStatus};
use crate::search::{SearchResult, SearchResults};

/// Lines of chunk content shown per result in table mode.
const PREVIEW_LINES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Raw,
}

pub(super) fn print_results(results: &SearchResults, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(results),
        OutputFormat::Raw => {
            print!("{}", render_raw(results));
            Ok(())
        }
        OutputFormat::Table => {
            print!("{}", render_table(results));
            Ok(())
        }
    }
}

pub(super) fn print_status(status: &IndexStatus, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(status),
        OutputFormat::Raw | OutputFormat::Table => {
            print!("{}", render_status(status));
            Ok(())
        }
    }
}

pub(super) fn print_index_stats(stats: &IndexStats) {
    println!(
        "Indexed {} files ({} added, {} changed, {} unchanged, {} removed, {} skipped) in {} ms",
        stats.files_indexed,
        stats.files_added,
        stats.files_changed,
        stats.files_unchanged,
        stats.files_removed,
        stats.files_skipped,
        stats.duration_ms,
    );
    println!(
        "Chunks: +{} -{} ({} total in {} files)",
        stats.chunks_added, stats.chunks_removed, stats.chunks_total, stats.files_total
    );
    for err in &stats.errors {
        eprintln!("  skipped {} [{}]: {}", err.path, err.kind, err.message);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

fn location(r: &SearchResult) -> String {
    match r.match_line {
        Some(line) => format!("{}:{}", r.file_path, line),
        None => format!("{}:{}-{}", r.file_path, r.start_line, r.end_line),
    }
}

fn render_table(results: &SearchResults) -> String {
    let mut out = String::new();
    if results.is_empty() {
        let _ = writeln!(out, "No results for \"{}\"", results.query);
        return out;
    }
    for r in &results.results {
        let _ = writeln!(
            out,
            "{:>3}. {:.3}  {}  [{} {}]",
            r.rank,
            r.relevance_score,
            location(r),
            r.language,
            r.match_type.as_str()
        );
        if let Some(ctx) = &r.context {
            let _ = writeln!(out, "     in {ctx}");
        }
        if let Some(window) = &r.surrounding {
            for line in &window.before {
                let _ = writeln!(out, "     | {line}");
            }
        }
        for line in r.content.lines().take(PREVIEW_LINES) {
            let _ = writeln!(out, "     > {line}");
        }
        if let Some(window) = &r.surrounding {
            for line in &window.after {
                let _ = writeln!(out, "     | {line}");
            }
        }
    }
    let _ = write!(
        out,
        "{} of {} results ({}, {} ms)",
        results.results.len(),
        results.total_found,
        results.strategy.as_str(),
        results.elapsed_ms
    );
    if results.has_more {
        out.push_str(", more available");
    }
    if results.truncated {
        out.push_str(", truncated");
    }
    out.push('\n');
    out
}

/// One `path:line` header per result followed by the chunk body.
fn render_raw(results: &SearchResults) -> String {
    let mut out = String::new();
    for r in &results.results {
        let _ = writeln!(out, "{}:{}", r.file_path, r.match_line.unwrap_or(r.start_line));
        let _ = writeln!(out, "{}", r.content);
        out.push('\n');
    }
    out
}

fn render_status(status: &IndexStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Repository:  {}", status.repository_path.display());
    let _ = writeln!(out, "Index:       {}", status.index_dir.display());
    let _ = writeln!(out, "Version:     {}", status.version);
    let _ = writeln!(out, "Files:       {}", status.file_count);
    let _ = writeln!(out, "Chunks:      {}", status.chunk_count);
    let _ = writeln!(out, "Dimensions:  {}", status.dim);
    let _ = writeln!(
        out,
        "Chunking:    {} lines, {} overlap",
        status.chunk_cfg.chunk_lines, status.chunk_cfg.overlap_lines
    );
    let _ = writeln!(out, "Size:        {} bytes", status.size_bytes);
    let _ = writeln!(out, "Created:     {}", status.created_at.to_rfc3339());
    let _ = writeln!(out, "Updated:     {}", status.updated_at.to_rfc3339());
    out
}

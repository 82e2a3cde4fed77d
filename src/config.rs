/// Configuration module for codesearch.
///
/// Handles loading, validating, and providing default configuration values.
/// Values come from a JSON file; command-line flags override them.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embedder::hashing::DEFAULT_DIMENSIONS;
use crate::indexer::IndexOptions;
use crate::indexer::filter::DEFAULT_MAX_FILE_SIZE;
use crate::search::SearchQuery;
use crate::search::query::{
    DEFAULT_CONTEXT_LINES, DEFAULT_MAX_RESULTS, DEFAULT_SEMANTIC_WEIGHT, DEFAULT_TEXT_WEIGHT,
    DEFAULT_THRESHOLD,
};

/// Per-repository config file name, looked up in the repository root.
pub const REPO_CONFIG_FILE: &str = ".codesearch.json";

// ── Default value functions ──────────────────────────────────────────

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_chunk_lines() -> usize {
    30
}

fn default_overlap_lines() -> usize {
    5
}

fn default_min_chunk_lines() -> usize {
    3
}

fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_true() -> bool {
    true
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_semantic_weight() -> f32 {
    DEFAULT_SEMANTIC_WEIGHT
}

fn default_text_weight() -> f32 {
    DEFAULT_TEXT_WEIGHT
}

fn default_context_lines() -> usize {
    DEFAULT_CONTEXT_LINES
}

fn default_model_name() -> String {
    "hashing".to_string()
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,

    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,

    #[serde(default = "default_min_chunk_lines")]
    pub min_chunk_lines: usize,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    #[serde(default)]
    pub include_hidden: bool,

    #[serde(default = "default_true")]
    pub respect_gitignore: bool,

    /// Extra glob patterns excluded on top of the built-in list.
    #[serde(default)]
    pub extra_excludes: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,

    #[serde(default = "default_text_weight")]
    pub text_weight: f32,

    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            chunk_lines: default_chunk_lines(),
            overlap_lines: default_overlap_lines(),
            min_chunk_lines: default_min_chunk_lines(),
            max_concurrency: default_max_concurrency(),
            embed_batch_size: default_embed_batch_size(),
            include_hidden: false,
            respect_gitignore: default_true(),
            extra_excludes: Vec::new(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            threshold: default_threshold(),
            semantic_weight: default_semantic_weight(),
            text_weight: default_text_weight(),
            context_lines: default_context_lines(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Candidate config files, most specific first.
    pub fn search_paths(repo_root: &Path) -> Vec<PathBuf> {
        let mut paths = vec![repo_root.join(REPO_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("codesearch").join("config.json"));
        }
        paths
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path must exist. Otherwise the first existing file from
    /// [`Config::search_paths`] is used, falling back to defaults.
    pub fn resolve(explicit: Option<&Path>, repo_root: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            anyhow::ensure!(path.is_file(), "config file not found: {}", path.display());
            return Self::load(path);
        }
        match Self::search_paths(repo_root).into_iter().find(|p| p.is_file()) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// A missing file yields defaults. Invalid JSON is reported and also
    /// yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {}: {e}", path.display());
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.index.chunk_lines > 0, "index.chunk_lines must be positive");
        anyhow::ensure!(
            self.index.overlap_lines < self.index.chunk_lines,
            "index.overlap_lines must be smaller than index.chunk_lines"
        );
        anyhow::ensure!(self.index.max_concurrency > 0, "index.max_concurrency must be positive");
        anyhow::ensure!(self.index.embed_batch_size > 0, "index.embed_batch_size must be positive");
        anyhow::ensure!(self.index.max_file_size > 0, "index.max_file_size must be positive");
        anyhow::ensure!(
            (1..=1000).contains(&self.search.max_results),
            "search.max_results must be in [1, 1000]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.search.threshold),
            "search.threshold must be in [0, 1]"
        );
        anyhow::ensure!(
            self.search.semantic_weight >= 0.0
                && self.search.text_weight >= 0.0
                && self.search.semantic_weight + self.search.text_weight > 0.0,
            "search weights must be non-negative and not both zero"
        );
        anyhow::ensure!(self.model.dimensions > 0, "model.dimensions must be positive");
        anyhow::ensure!(
            self.model.name == "hashing",
            "unsupported model `{}` (available: hashing)",
            self.model.name
        );
        Ok(())
    }

    /// Indexing options seeded from the `index` section.
    #[must_use]
    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            include_hidden: self.index.include_hidden,
            extra_excludes: self.index.extra_excludes.clone(),
            max_file_size: self.index.max_file_size,
            chunk_size: self.index.chunk_lines,
            chunk_overlap: self.index.overlap_lines,
            min_chunk_lines: self.index.min_chunk_lines,
            max_concurrency: self.index.max_concurrency,
            embed_batch_size: self.index.embed_batch_size,
            respect_gitignore: self.index.respect_gitignore,
            ..IndexOptions::default()
        }
    }

    /// A query seeded from the `search` section.
    #[must_use]
    pub fn search_query(&self, text: impl Into<String>) -> SearchQuery {
        let mut query = SearchQuery::new(text)
            .with_max_results(self.search.max_results)
            .with_threshold(self.search.threshold)
            .with_weights(self.search.semantic_weight, self.search.text_weight);
        query.context_lines = self.search.context_lines;
        query
    }
}

// ── Tests ────────────────────────────────────────────────────────────

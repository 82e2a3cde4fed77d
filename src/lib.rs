//! # codesearch: per-project code search
//!
//! Indexes a source tree into line-window chunks with embedding vectors and
//! answers text, exact, regex, semantic and hybrid queries against it.
//!
//! ## Architecture
//!
//! - **[`indexer`]**: File filtering, chunking and the incremental build pipeline
//! - **[`embedder`]**: Embedding trait plus a deterministic feature-hashing model
//! - **[`store`]**: In-memory index, flat vector store and atomic persistence
//! - **[`search`]**: Query analysis, retrieval and ranking
//! - **[`location`]**: Index placement and the cross-process lock
//! - **[`config`]**: JSON configuration loading and validation
//! - **[`cli`]**: Command-line front end
//! - **[`error`]**: Error taxonomy with stable kinds and exit codes

pub mod cli;
pub mod config;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod location;
pub mod search;
pub mod store;

pub use error::{Error, ErrorKind, Result};

//! Walking, filtering, chunking and embedding a repository into an index.
pub mod chunker;
pub mod core;
pub mod filter;
pub mod languages;

pub use self::core::{FileError, IndexOptions, IndexStats, IndexStatus, Indexer};

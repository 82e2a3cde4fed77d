use serde::Serialize;

use super::query::SearchType;

/// Which retrieval path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Text,
    Exact,
    Regex,
    Semantic,
    Hybrid,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Text => "text",
            MatchType::Exact => "exact",
            MatchType::Regex => "regex",
            MatchType::Semantic => "semantic",
            MatchType::Hybrid => "hybrid",
        }
    }
}

/// Lines around a result, read from the working tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextWindow {
    pub before: Vec<String>,
    pub after: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    /// First line inside the chunk that matched, for text-like matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_line: Option<usize>,
    pub content: String,
    pub language: String,
    pub match_type: MatchType,
    pub relevance_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f32>,
    pub exact_match: bool,
    pub rank: usize,
    /// Enclosing declaration line, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surrounding: Option<ContextWindow>,
    /// Discovery order within the request.
    pub found_at: usize,
}

impl SearchResult {
    pub fn line_span(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub strategy: SearchType,
    pub results: Vec<SearchResult>,
    /// Matches that passed filters and threshold, before truncation.
    pub total_found: usize,
    pub has_more: bool,
    /// Set when the deadline cut the search short.
    pub truncated: bool,
    pub elapsed_ms: u64,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

//! Query model, validation and intent classification.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_MAX_RESULTS: usize = 10;
pub const MAX_RESULTS_LIMIT: usize = 1000;
pub const DEFAULT_THRESHOLD: f32 = 0.7;
pub const DEFAULT_CONTEXT_LINES: usize = 3;
pub const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.7;
pub const DEFAULT_TEXT_WEIGHT: f32 = 0.3;

/// Weight used for both paths on short identifier queries.
const IDENTIFIER_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Semantic,
    Text,
    Hybrid,
    Regex,
    Exact,
    Fuzzy,
}

impl SearchType {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchType::Semantic => "semantic",
            SearchType::Text => "text",
            SearchType::Hybrid => "hybrid",
            SearchType::Regex => "regex",
            SearchType::Exact => "exact",
            SearchType::Fuzzy => "fuzzy",
        }
    }

    /// The strategy actually executed for this type.
    pub fn executed(self) -> SearchType {
        match self {
            SearchType::Fuzzy => SearchType::Hybrid,
            other => other,
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "semantic" => Ok(SearchType::Semantic),
            "text" => Ok(SearchType::Text),
            "hybrid" => Ok(SearchType::Hybrid),
            "regex" => Ok(SearchType::Regex),
            "exact" => Ok(SearchType::Exact),
            "fuzzy" => Ok(SearchType::Fuzzy),
            other => Err(Error::bad_request(
                "search_type",
                format!("unknown search type `{other}`"),
            )),
        }
    }
}

/// A search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub search_type: Option<SearchType>,
    pub max_results: usize,
    pub threshold: f32,
    pub include_context: bool,
    pub context_lines: usize,
    /// Regex over the repo-relative path.
    pub file_filter: Option<String>,
    pub language_filter: Option<String>,
    pub semantic_weight: f32,
    pub text_weight: f32,
    pub deadline: Option<Duration>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            search_type: None,
            max_results: DEFAULT_MAX_RESULTS,
            threshold: DEFAULT_THRESHOLD,
            include_context: false,
            context_lines: DEFAULT_CONTEXT_LINES,
            file_filter: None,
            language_filter: None,
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            text_weight: DEFAULT_TEXT_WEIGHT,
            deadline: None,
        }
    }

    pub fn with_search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = Some(search_type);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_context(mut self, context_lines: usize) -> Self {
        self.include_context = true;
        self.context_lines = context_lines;
        self
    }

    pub fn with_file_filter(mut self, pattern: impl Into<String>) -> Self {
        self.file_filter = Some(pattern.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language_filter = Some(language.into());
        self
    }

    pub fn with_weights(mut self, semantic_weight: f32, text_weight: f32) -> Self {
        self.semantic_weight = semantic_weight;
        self.text_weight = text_weight;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn has_default_weights(&self) -> bool {
        self.semantic_weight == DEFAULT_SEMANTIC_WEIGHT && self.text_weight == DEFAULT_TEXT_WEIGHT
    }

    /// Check parameter ranges. Patterns are checked during analysis.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::EmptyQuery);
        }
        if !(1..=MAX_RESULTS_LIMIT).contains(&self.max_results) {
            return Err(Error::bad_request(
                "max_results",
                format!("must be in [1, {MAX_RESULTS_LIMIT}], got {}", self.max_results),
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::bad_request(
                "threshold",
                format!("must be in [0, 1], got {}", self.threshold),
            ));
        }
        for (field, w) in [
            ("semantic_weight", self.semantic_weight),
            ("text_weight", self.text_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::bad_request(field, format!("must be a non-negative number, got {w}")));
            }
        }
        if self.semantic_weight + self.text_weight <= 0.0 {
            return Err(Error::bad_request("weights", "semantic and text weights are both zero"));
        }
        Ok(())
    }
}

/// Outcome of analyzing a query.
#[derive(Debug, Clone)]
pub struct AnalyzedQuery {
    pub strategy: SearchType,
    /// Text handed to the executing path: case-folded for text and semantic
    /// search, verbatim for exact and regex.
    pub processed: String,
    pub keywords: Vec<String>,
    pub boost_terms: Vec<String>,
    /// Normalized so that both weights sum to 1.
    pub semantic_weight: f32,
    pub text_weight: f32,
    /// Compiled pattern for regex search.
    pub pattern: Option<Regex>,
}

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.:]*$").expect("identifier regex is valid"));

const REGEX_META: &[char] = &['.', '^', '$', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '\\'];

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        // english
        "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from",
        "how", "i", "in", "into", "is", "it", "its", "me", "my", "of", "on", "or", "show",
        "that", "the", "this", "to", "what", "when", "where", "which", "who", "why", "with",
        "find", "all", "any", "some", "we", "you",
        // code chatter
        "code", "file", "files", "implementation", "implemented", "using", "used", "where's",
        "snippet", "logic",
    ]
    .into_iter()
    .collect()
});

struct BoostRule {
    trigger: Regex,
    terms: &'static [&'static str],
}

/// Intent patterns: when a query mentions a concept, chunks containing the
/// concept's usual vocabulary get a small ranking bonus.
const BOOST_BANK: &[(&str, &[&str])] = &[
    (r"\b(function|method|func|fn|def)s?\b", &["fn", "func", "def", "function"]),
    (r"\b(class|struct|interface|type)(es|s)?\b", &["class", "struct", "interface", "type"]),
    (r"\b(import|include|require|dependency)s?\b", &["import", "include", "require", "use"]),
    (r"\b(loop|if|for|while|switch|branch)s?\b", &["if", "for", "while", "switch", "match", "loop"]),
    (
        r"\b(error|exception|err|panic|catch|failure)s?\b",
        &["error", "err", "catch", "except", "try", "panic", "result"],
    ),
    (r"\b(test|spec|assert)s?\b", &["test", "assert", "expect", "mock"]),
    (r"\b(api|endpoint|route|handler)s?\b", &["api", "route", "handler", "endpoint"]),
    (
        r"\b(database|db|sql|query|queries|table)s?\b",
        &["db", "sql", "query", "select", "insert", "table", "database"],
    ),
    (r"\b(http|request|response|url|client)s?\b", &["http", "request", "response", "url", "client"]),
];

static BOOST_RULES: LazyLock<Vec<BoostRule>> = LazyLock::new(|| {
    BOOST_BANK
        .iter()
        .map(|&(trigger, terms)| BoostRule {
            trigger: Regex::new(&format!("(?i){trigger}")).expect("boost trigger is valid"),
            terms,
        })
        .collect()
});

/// Split on anything that is not an identifier character.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_delimited(text: &str, open: char, close: char) -> Option<&str> {
    if text.chars().count() > 2 && text.starts_with(open) && text.ends_with(close) {
        Some(&text[open.len_utf8()..text.len() - close.len_utf8()])
    } else {
        None
    }
}

fn is_meta_heavy(text: &str) -> bool {
    !text.contains(char::is_whitespace) && text.chars().filter(|c| REGEX_META.contains(c)).count() >= 3
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::BadPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Classify a raw query string using default weights.
    pub fn analyze(&self, raw: &str) -> Result<AnalyzedQuery> {
        self.analyze_query(&SearchQuery::new(raw))
    }

    /// Validate and analyze a full request. An explicit `search_type` wins
    /// over the detected intent.
    pub fn analyze_query(&self, query: &SearchQuery) -> Result<AnalyzedQuery> {
        query.validate()?;
        if let Some(pattern) = &query.file_filter {
            compile_pattern(pattern)?;
        }

        let raw = query.text.trim();
        let words: Vec<&str> = raw.split_whitespace().collect();
        let identifier_like = words.len() <= 2 && words.iter().all(|w| IDENTIFIER_RE.is_match(w));

        let delimited = strip_delimited(raw, '/', '/').is_some();
        let detected = if delimited || is_meta_heavy(raw) {
            SearchType::Regex
        } else if strip_delimited(raw, '"', '"').is_some() {
            SearchType::Exact
        } else if identifier_like {
            SearchType::Hybrid
        } else if words.len() >= 4
            && words.iter().map(|w| w.chars().count()).sum::<usize>() as f32 / words.len() as f32 > 3.0
        {
            SearchType::Semantic
        } else {
            SearchType::Hybrid
        };
        let mut strategy = query.search_type.unwrap_or(detected).executed();

        // A guessed pattern that does not compile is treated as plain text.
        if query.search_type.is_none() && strategy == SearchType::Regex && !delimited && Regex::new(raw).is_err() {
            debug!(query = raw, "detected pattern does not compile, searching as hybrid");
            strategy = SearchType::Hybrid;
        }

        let (processed, pattern) = match strategy {
            SearchType::Regex => {
                let body = strip_delimited(raw, '/', '/').unwrap_or(raw);
                (body.to_string(), Some(compile_pattern(body)?))
            }
            SearchType::Exact => (strip_delimited(raw, '"', '"').unwrap_or(raw).to_string(), None),
            _ => (raw.to_lowercase(), None),
        };
        if processed.trim().is_empty() {
            return Err(Error::EmptyQuery);
        }

        let tokens: Vec<String> = tokenize(&processed).into_iter().map(|t| t.to_lowercase()).collect();
        let mut keywords: Vec<String> = Vec::new();
        for t in tokens.iter().filter(|t| !STOP_WORDS.contains(t.as_str())) {
            if !keywords.contains(t) {
                keywords.push(t.clone());
            }
        }
        if keywords.is_empty() {
            for t in tokens {
                if !keywords.contains(&t) {
                    keywords.push(t);
                }
            }
        }

        let mut boost_terms: Vec<String> = Vec::new();
        for rule in BOOST_RULES.iter().filter(|r| r.trigger.is_match(raw)) {
            for term in rule.terms {
                if !boost_terms.iter().any(|b| b == term) {
                    boost_terms.push((*term).to_string());
                }
            }
        }

        let (mut semantic_weight, mut text_weight) = (query.semantic_weight, query.text_weight);
        if identifier_like && strategy == SearchType::Hybrid && query.has_default_weights() {
            semantic_weight = IDENTIFIER_WEIGHT;
            text_weight = IDENTIFIER_WEIGHT;
        }
        let total = semantic_weight + text_weight;

        Ok(AnalyzedQuery {
            strategy,
            processed,
            keywords,
            boost_terms,
            semantic_weight: semantic_weight / total,
            text_weight: text_weight / total,
            pattern,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn analyze(raw: &str) -> AnalyzedQuery {
        QueryAnalyzer::new().analyze(raw).unwrap()
    }

    #[test]
    fn test_regex_detection() {
        let q = analyze("/fn\\s+\\w+/");
        assert_eq!(q.strategy, SearchType::Regex);
        assert_eq!(q.processed, "fn\\s+\\w+");
        assert!(q.pattern.unwrap().is_match("fn main"));

        assert_eq!(analyze("^get_.*\\(").strategy, SearchType::Regex);
    }

    #[test]
    fn test_exact_keeps_case() {
        let q = analyze("\"HandleRequest(ctx\"");
        assert_eq!(q.strategy, SearchType::Exact);
        assert_eq!(q.processed, "HandleRequest(ctx");
    }

    #[test]
    fn test_identifier_query_is_hybrid_with_raised_text_weight() {
        let q = analyze("parseConfig");
        assert_eq!(q.strategy, SearchType::Hybrid);
        assert_eq!(q.semantic_weight, 0.5);
        assert_eq!(q.text_weight, 0.5);

        let q = analyze("user validation");
        assert_eq!(q.strategy, SearchType::Hybrid);
        assert_eq!(q.keywords, vec!["user", "validation"]);
    }

    #[test]
    fn test_natural_language_is_semantic() {
        let q = analyze("where do we retry failed network requests");
        assert_eq!(q.strategy, SearchType::Semantic);
        assert!(!q.keywords.contains(&"where".to_string()));
        assert!(q.keywords.contains(&"retry".to_string()));
        assert!(q.boost_terms.contains(&"http".to_string()));
    }

    #[test]
    fn test_short_phrase_falls_back_to_hybrid() {
        let q = analyze("db conn pool");
        assert_eq!(q.strategy, SearchType::Hybrid);
        assert!((q.semantic_weight - 0.7).abs() < 1e-6);
        assert!((q.text_weight - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_explicit_type_overrides() {
        let query = SearchQuery::new("user validation").with_search_type(SearchType::Text);
        assert_eq!(QueryAnalyzer::new().analyze_query(&query).unwrap().strategy, SearchType::Text);

        let query = SearchQuery::new("user validation").with_search_type(SearchType::Fuzzy);
        let q = QueryAnalyzer::new().analyze_query(&query).unwrap();
        assert_eq!(q.strategy, SearchType::Hybrid);
        assert_eq!(q.text_weight, 0.5);

        let query = SearchQuery::new("a+b").with_search_type(SearchType::Regex);
        assert!(QueryAnalyzer::new().analyze_query(&query).unwrap().pattern.is_some());
    }

    #[test]
    fn test_custom_weights_are_kept_and_normalized() {
        let query = SearchQuery::new("parseConfig").with_weights(2.0, 2.0);
        let q = QueryAnalyzer::new().analyze_query(&query).unwrap();
        assert_eq!(q.semantic_weight, 0.5);

        let query = SearchQuery::new("parseConfig").with_weights(0.0, 1.0);
        let q = QueryAnalyzer::new().analyze_query(&query).unwrap();
        assert_eq!(q.semantic_weight, 0.0);
        assert_eq!(q.text_weight, 1.0);
    }

    #[test]
    fn test_stop_words_only_keeps_raw_tokens() {
        let query = SearchQuery::new("what is this").with_search_type(SearchType::Text);
        let q = QueryAnalyzer::new().analyze_query(&query).unwrap();
        assert_eq!(q.keywords, vec!["what", "is", "this"]);
    }

    #[test]
    fn test_boost_terms() {
        let q = analyze("error handling in database layer");
        assert!(q.boost_terms.contains(&"err".to_string()));
        assert!(q.boost_terms.contains(&"sql".to_string()));
        assert!(analyze("user validation").boost_terms.is_empty());
    }

    #[test]
    fn test_validation_errors() {
        let analyzer = QueryAnalyzer::new();
        assert!(matches!(analyzer.analyze("   "), Err(Error::EmptyQuery)));
        assert!(matches!(analyzer.analyze("/a(b/"), Err(Error::BadPattern { .. })));

        let bad = [
            SearchQuery::new("x").with_max_results(0),
            SearchQuery::new("x").with_max_results(1001),
            SearchQuery::new("x").with_threshold(1.5),
            SearchQuery::new("x").with_threshold(-0.1),
            SearchQuery::new("x").with_weights(-1.0, 0.5),
            SearchQuery::new("x").with_weights(f32::NAN, 0.5),
            SearchQuery::new("x").with_weights(0.0, 0.0),
            SearchQuery::new("x").with_file_filter("(unclosed"),
        ];
        for query in bad {
            let err = analyzer.analyze_query(&query).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest, "{query:?}");
        }
    }

    #[test]
    fn test_uncompilable_guess_falls_back_to_hybrid() {
        let q = analyze("**/*.go");
        assert_eq!(q.strategy, SearchType::Hybrid);
        assert!(q.pattern.is_none());
        assert_eq!(q.keywords, vec!["go"]);

        assert_eq!(analyze(r"fn\s+\w+\(").strategy, SearchType::Regex);

        let analyzer = QueryAnalyzer::new();
        let explicit = SearchQuery::new("**/*.go").with_search_type(SearchType::Regex);
        assert!(matches!(analyzer.analyze_query(&explicit), Err(Error::BadPattern { .. })));
        assert!(matches!(analyzer.analyze("/**/*.go/"), Err(Error::BadPattern { .. })));
    }

    #[test]
    fn test_search_type_parsing() {
        assert_eq!("Hybrid".parse::<SearchType>().unwrap(), SearchType::Hybrid);
        assert_eq!(SearchType::Fuzzy.to_string(), "fuzzy");
        assert!("vector".parse::<SearchType>().is_err());
    }
}

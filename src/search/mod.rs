//! Query execution over a loaded index.
//!
//! A request is analyzed into a strategy, routed to the text, exact, regex,
//! semantic or hybrid path, filtered, ranked and optionally decorated with
//! surrounding source lines.
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use tracing::debug;

pub mod query;
pub mod rank;
pub mod results;

pub use query::{AnalyzedQuery, QueryAnalyzer, SearchQuery, SearchType};
pub use results::{ContextWindow, MatchType, SearchResult, SearchResults};

use crate::embedder::Embedder;
use crate::error::{Error, Result};
use crate::location::{IndexLocation, IndexLock, LockRetry};
use crate::store::IndexStore;
use crate::store::models::{Chunk, FileEntry};

/// Lower bound on candidates pulled from each retrieval path.
const MIN_CANDIDATES: usize = 20;

struct Candidate<'a> {
    entry: &'a FileEntry,
    chunk: &'a Chunk,
    text: Option<f32>,
    cosine: Option<f32>,
    exact: bool,
    match_line: Option<usize>,
    found_at: usize,
}

/// Per-request state shared by the retrieval paths.
struct Request<'a> {
    store: &'a IndexStore,
    file_re: Option<Regex>,
    language: Option<String>,
    deadline: Option<Instant>,
    truncated: bool,
    next_found: usize,
}

impl Request<'_> {
    fn accepts(&self, entry: &FileEntry) -> bool {
        if let Some(re) = &self.file_re {
            if !re.is_match(&entry.path) {
                return false;
            }
        }
        match &self.language {
            Some(lang) => entry.language.eq_ignore_ascii_case(lang),
            None => true,
        }
    }

    fn expired(&mut self) -> bool {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.truncated = true;
        }
        self.truncated
    }

    fn next_found(&mut self) -> usize {
        let n = self.next_found;
        self.next_found += 1;
        n
    }
}

/// Line offset (zero based) of a byte offset inside `text`.
fn line_offset(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].matches('\n').count()
}

pub struct SearchEngine {
    embedder: Arc<dyn Embedder>,
    analyzer: QueryAnalyzer,
    lock_retry: LockRetry,
}

impl SearchEngine {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            analyzer: QueryAnalyzer::new(),
            lock_retry: LockRetry::NONE,
        }
    }

    pub fn with_lock_retry(mut self, retry: LockRetry) -> Self {
        self.lock_retry = retry;
        self
    }

    /// Search the committed index at `location` under a shared lock.
    pub fn search(&self, query: &SearchQuery, location: &IndexLocation) -> Result<SearchResults> {
        let analyzed = self.analyzer.analyze_query(query)?;
        location.require_index()?;
        let _lock = IndexLock::shared(location, self.lock_retry)?;
        let store = IndexStore::load(location, self.embedder.dimensions())?;
        let results = self.execute(query, &analyzed, &store);
        store.close();
        results
    }

    /// Search an index that is already loaded in memory.
    pub fn search_store(&self, query: &SearchQuery, store: &IndexStore) -> Result<SearchResults> {
        let analyzed = self.analyzer.analyze_query(query)?;
        self.execute(query, &analyzed, store)
    }

    fn execute(&self, query: &SearchQuery, analyzed: &AnalyzedQuery, store: &IndexStore) -> Result<SearchResults> {
        let started = Instant::now();
        let file_re = match &query.file_filter {
            Some(p) => Some(Regex::new(p).map_err(|e| Error::BadPattern {
                pattern: p.clone(),
                message: e.to_string(),
            })?),
            None => None,
        };
        let mut req = Request {
            store,
            file_re,
            language: query.language_filter.clone(),
            deadline: query.deadline.map(|d| started + d),
            truncated: false,
            next_found: 0,
        };
        let k = (query.max_results * 4).max(MIN_CANDIDATES);

        debug!(
            "Searching `{}` as {} (k = {k})",
            analyzed.processed, analyzed.strategy
        );
        let candidates = match analyzed.strategy {
            SearchType::Semantic => self.semantic_path(&mut req, analyzed, k)?,
            SearchType::Hybrid | SearchType::Fuzzy => {
                let mut text = scan(&mut req, |c| text_match(analyzed, c));
                text.sort_by(|a, b| {
                    b.text
                        .unwrap_or(0.0)
                        .total_cmp(&a.text.unwrap_or(0.0))
                        .then_with(|| a.found_at.cmp(&b.found_at))
                });
                text.truncate(k);
                let semantic = self.semantic_path(&mut req, analyzed, k)?;
                merge(text, semantic)
            }
            SearchType::Text => scan(&mut req, |c| text_match(analyzed, c)),
            SearchType::Exact => scan(&mut req, |c| {
                c.content
                    .find(&analyzed.processed)
                    .map(|at| (1.0, true, line_offset(&c.content, at)))
            }),
            SearchType::Regex => match &analyzed.pattern {
                Some(re) => scan(&mut req, |c| {
                    re.find(&c.content)
                        .map(|m| (1.0, false, line_offset(&c.content, m.start())))
                }),
                None => Vec::new(),
            },
        };

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|c| to_result(analyzed, c))
            .filter(|r| r.relevance_score >= query.threshold)
            .collect();

        let total_found = results.len();
        rank::rank(&mut results);
        results.truncate(query.max_results);

        if query.include_context {
            attach_context(store.repository_path(), &mut results, query.context_lines);
        }

        Ok(SearchResults {
            query: query.text.clone(),
            strategy: analyzed.strategy,
            has_more: total_found > results.len(),
            total_found,
            results,
            truncated: req.truncated,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn semantic_path<'a>(
        &self,
        req: &mut Request<'a>,
        analyzed: &AnalyzedQuery,
        k: usize,
    ) -> Result<Vec<Candidate<'a>>> {
        if req.expired() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(&analyzed.processed)?;
        let store = req.store;
        let mut out = Vec::new();
        for hit in store.search_vectors(&vector, k)? {
            let Some((entry, chunk)) = store.chunk(&hit.id) else {
                continue;
            };
            if !req.accepts(entry) {
                continue;
            }
            out.push(Candidate {
                entry,
                chunk,
                text: None,
                cosine: Some(hit.score),
                exact: false,
                match_line: None,
                found_at: req.next_found(),
            });
        }
        Ok(out)
    }
}

/// Case-insensitive keyword scan. Score is the fraction of keywords found.
fn text_match(analyzed: &AnalyzedQuery, chunk: &Chunk) -> Option<(f32, bool, usize)> {
    if analyzed.keywords.is_empty() {
        return None;
    }
    let lower = chunk.content.to_lowercase();
    let mut matched = 0;
    let mut first: Option<usize> = None;
    for kw in &analyzed.keywords {
        if let Some(at) = lower.find(kw.as_str()) {
            matched += 1;
            first = Some(first.map_or(at, |f| f.min(at)));
        }
    }
    let first = first?;
    let score = matched as f32 / analyzed.keywords.len() as f32;
    let exact = lower.contains(analyzed.processed.as_str());
    Some((score, exact, line_offset(&lower, first)))
}

/// Visit every accepted chunk in path order, checking the deadline between
/// chunks.
fn scan<'a, F>(req: &mut Request<'a>, mut matcher: F) -> Vec<Candidate<'a>>
where
    F: FnMut(&Chunk) -> Option<(f32, bool, usize)>,
{
    let store = req.store;
    let mut out = Vec::new();
    'files: for entry in store.all_files() {
        if !req.accepts(entry) {
            continue;
        }
        for chunk in &entry.chunks {
            if req.expired() {
                break 'files;
            }
            if let Some((score, exact, offset)) = matcher(chunk) {
                out.push(Candidate {
                    entry,
                    chunk,
                    text: Some(score),
                    cosine: None,
                    exact,
                    match_line: Some(chunk.start_line + offset),
                    found_at: req.next_found(),
                });
            }
        }
    }
    out
}

/// Dedupe text and semantic candidates on chunk id.
fn merge<'a>(text: Vec<Candidate<'a>>, semantic: Vec<Candidate<'a>>) -> Vec<Candidate<'a>> {
    let mut by_id: HashMap<&'a str, usize> = HashMap::new();
    let mut merged: Vec<Candidate<'a>> = Vec::with_capacity(text.len() + semantic.len());
    for c in text.into_iter().chain(semantic) {
        let chunk: &'a Chunk = c.chunk;
        match by_id.get(chunk.id.as_str()) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.text = existing.text.or(c.text);
                existing.cosine = existing.cosine.or(c.cosine);
                existing.exact |= c.exact;
                existing.match_line = existing.match_line.or(c.match_line);
                existing.found_at = existing.found_at.min(c.found_at);
            }
            None => {
                by_id.insert(chunk.id.as_str(), merged.len());
                merged.push(c);
            }
        }
    }
    merged
}

fn to_result(analyzed: &AnalyzedQuery, c: Candidate<'_>) -> SearchResult {
    let semantic = c.cosine.map(rank::cosine_scores);
    let semantic_score = semantic.map(|(rel, _)| rel);
    let vector_distance = semantic.map(|(_, dist)| dist);

    let (match_type, relevance) = match analyzed.strategy {
        SearchType::Text => (MatchType::Text, c.text.unwrap_or(0.0)),
        SearchType::Exact => (MatchType::Exact, 1.0),
        SearchType::Regex => (MatchType::Regex, 1.0),
        SearchType::Semantic => (MatchType::Semantic, semantic_score.unwrap_or(0.0)),
        SearchType::Hybrid | SearchType::Fuzzy => {
            let match_type = match (c.text, semantic_score) {
                (Some(_), Some(_)) => MatchType::Hybrid,
                (Some(_), None) => MatchType::Text,
                _ => MatchType::Semantic,
            };
            let fused = rank::fuse(analyzed.semantic_weight, analyzed.text_weight, semantic_score, c.text);
            let bonus = rank::boost_bonus(&analyzed.boost_terms, &c.chunk.content);
            (match_type, (fused + bonus).min(1.0))
        }
    };

    SearchResult {
        chunk_id: c.chunk.id.clone(),
        file_path: c.entry.path.clone(),
        start_line: c.chunk.start_line,
        end_line: c.chunk.end_line,
        match_line: c.match_line,
        content: c.chunk.content.clone(),
        language: c.chunk.language.clone(),
        match_type,
        relevance_score: relevance,
        vector_distance,
        text_score: c.text,
        semantic_score,
        exact_match: c.exact || analyzed.strategy == SearchType::Exact,
        rank: 0,
        context: c.chunk.context.clone(),
        surrounding: None,
        found_at: c.found_at,
    }
}

/// Read surrounding lines from the working tree, one read per file.
/// Unreadable files simply get no context.
fn attach_context(root: &Path, results: &mut [SearchResult], lines: usize) {
    let mut cache: HashMap<String, Option<Vec<String>>> = HashMap::new();
    for r in results.iter_mut() {
        let file = cache.entry(r.file_path.clone()).or_insert_with(|| {
            fs::read_to_string(root.join(&r.file_path))
                .ok()
                .map(|t| t.lines().map(str::to_string).collect())
        });
        let Some(file) = file else {
            continue;
        };
        let len = file.len();
        let start = (r.start_line - 1).min(len);
        let end = r.end_line.min(len);
        r.surrounding = Some(ContextWindow {
            before: file[start.saturating_sub(lines)..start].to_vec(),
            after: file[end..(end + lines).min(len)].to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbedderError;
    use crate::embedder::hashing::HashEmbedder;
    use crate::error::ErrorKind;
    use crate::indexer::chunker::Chunker;
    use crate::indexer::languages::detect_language;
    use crate::store::files::content_hash;
    use crate::store::models::ChunkConfig;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Places texts on three axes by concept so tests can steer cosine.
    struct ConceptEmbedder;

    impl Embedder for ConceptEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedderError> {
            let t = text.to_lowercase();
            Ok(if t.contains("user validation") {
                vec![1.0, 0.0, 0.0]
            } else if t.contains("account check") {
                vec![0.8, 0.6, 0.0]
            } else {
                vec![0.0, 1.0, 0.0]
            })
        }

        fn embed_batch(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, EmbedderError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    fn store_with(root: &Path, files: &[(&str, &str)], embedder: &dyn Embedder) -> IndexStore {
        let chunker = Chunker::new(ChunkConfig::default()).unwrap();
        let mut store = IndexStore::create(root, embedder.dimensions(), ChunkConfig::default());
        for (path, text) in files {
            let language = detect_language(path).unwrap_or("text");
            let mut chunks = chunker.chunk(text, path, language);
            for c in &mut chunks {
                c.vector = Some(embedder.embed(&c.content).unwrap());
            }
            store
                .add_file_entry(FileEntry {
                    path: path.to_string(),
                    language: language.to_string(),
                    size: text.len() as u64,
                    last_modified: Utc::now(),
                    content_hash: content_hash(text.as_bytes()),
                    line_count: text.lines().count(),
                    chunks,
                })
                .unwrap();
        }
        store
    }

    const FILES: &[(&str, &str)] = &[
        (
            "db/pool.go",
            "package db\n\n// Pool keeps database connections\nfunc NewPool() *Pool {\n    return &Pool{}\n}\n",
        ),
        ("web/app.js", "function render() {\n  return 'Hello';\n}\n"),
        ("scripts/Setup.py", "def setup():\n    connect_database()\n"),
    ];

    fn hash_engine() -> SearchEngine {
        SearchEngine::new(Arc::new(HashEmbedder::new(64)))
    }

    #[test]
    fn test_text_search_reports_match_line() {
        let store = store_with(Path::new("/repo"), FILES, &HashEmbedder::new(64));
        let query = SearchQuery::new("database").with_search_type(SearchType::Text);
        let res = hash_engine().search_store(&query, &store).unwrap();

        assert_eq!(res.strategy, SearchType::Text);
        assert_eq!(res.total_found, 2);
        let pool = res.results.iter().find(|r| r.file_path == "db/pool.go").unwrap();
        assert_eq!(pool.match_type, MatchType::Text);
        assert_eq!(pool.match_line, Some(3));
        assert_eq!(pool.start_line, 1);
        assert_eq!(pool.relevance_score, 1.0);
        assert_eq!(res.results.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_threshold_drops_partial_matches() {
        let store = store_with(Path::new("/repo"), FILES, &HashEmbedder::new(64));
        let strict = SearchQuery::new("database render").with_search_type(SearchType::Text);
        let res = hash_engine().search_store(&strict, &store).unwrap();
        assert!(res.results.is_empty());

        let loose = strict.clone().with_threshold(0.5);
        let res = hash_engine().search_store(&loose, &store).unwrap();
        assert_eq!(res.total_found, 3);
        assert!(res.results.iter().all(|r| r.relevance_score >= 0.5));
    }

    #[test]
    fn test_unmatched_term_never_raises_text_score() {
        let store = store_with(Path::new("/repo"), FILES, &HashEmbedder::new(64));
        let engine = hash_engine();
        let scores = |text: &str| -> HashMap<String, f32> {
            let q = SearchQuery::new(text)
                .with_search_type(SearchType::Text)
                .with_threshold(0.0);
            engine
                .search_store(&q, &store)
                .unwrap()
                .results
                .into_iter()
                .map(|r| (r.chunk_id, r.relevance_score))
                .collect()
        };
        let base = scores("database pool");
        let widened = scores("database pool zzyzx");
        assert!(!base.is_empty());
        for (id, score) in &widened {
            assert!(*score <= base[id], "{id}: {score} > {}", base[id]);
        }
    }

    #[test]
    fn test_exact_is_case_sensitive() {
        let store = store_with(Path::new("/repo"), FILES, &HashEmbedder::new(64));
        let engine = hash_engine();
        let hit = engine
            .search_store(&SearchQuery::new("\"NewPool()\""), &store)
            .unwrap();
        assert_eq!(hit.strategy, SearchType::Exact);
        assert_eq!(hit.results.len(), 1);
        assert!(hit.results[0].exact_match);
        assert_eq!(hit.results[0].match_line, Some(4));

        let miss = engine
            .search_store(&SearchQuery::new("\"newpool()\""), &store)
            .unwrap();
        assert!(miss.results.is_empty());
    }

    #[test]
    fn test_regex_search() {
        let store = store_with(Path::new("/repo"), FILES, &HashEmbedder::new(64));
        let res = hash_engine()
            .search_store(&SearchQuery::new("/(func|def) \\w+\\(/"), &store)
            .unwrap();
        assert_eq!(res.strategy, SearchType::Regex);
        let mut paths: Vec<&str> = res.results.iter().map(|r| r.file_path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["db/pool.go", "scripts/Setup.py"]);
        assert!(res.results.iter().all(|r| r.match_type == MatchType::Regex));
    }

    #[test]
    fn test_semantic_scores_are_normalized() {
        let store = store_with(Path::new("/repo"), FILES, &HashEmbedder::new(64));
        let query = SearchQuery::new("database connections pool")
            .with_search_type(SearchType::Semantic)
            .with_threshold(0.0);
        let res = hash_engine().search_store(&query, &store).unwrap();
        assert_eq!(res.results.len(), 3);
        assert_eq!(res.results[0].file_path, "db/pool.go");
        for r in &res.results {
            let d = r.vector_distance.unwrap();
            assert!((0.0..=1.0).contains(&r.relevance_score));
            assert!((r.relevance_score + d - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_hybrid_orders_overlap_then_text_then_semantic() {
        let files: &[(&str, &str)] = &[
            ("a.rs", "fn user_validation() {\n    // user validation entry point\n}\n"),
            ("b.rs", "fn log_user() {\n    // validation of the user name is skipped here\n}\n"),
            ("c.rs", "fn account_check() {\n    // account check for login\n}\n"),
            ("d.rs", "fn unrelated() {}\n"),
        ];
        let store = store_with(Path::new("/repo"), files, &ConceptEmbedder);
        let engine = SearchEngine::new(Arc::new(ConceptEmbedder));
        let query = SearchQuery::new("user validation")
            .with_search_type(SearchType::Hybrid)
            .with_threshold(0.3);
        let res = engine.search_store(&query, &store).unwrap();

        let order: Vec<&str> = res.results.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(order, vec!["a.rs", "b.rs", "c.rs"]);
        assert_eq!(res.results[0].match_type, MatchType::Hybrid);
        assert!(res.results[2].text_score.is_none());
        for pair in res.results.windows(2) {
            assert!(pair[0].relevance_score > pair[1].relevance_score);
        }
    }

    #[test]
    fn test_file_and_language_filters() {
        let store = store_with(Path::new("/repo"), FILES, &HashEmbedder::new(64));
        let engine = hash_engine();
        let base = SearchQuery::new("database").with_search_type(SearchType::Text);

        let res = engine
            .search_store(&base.clone().with_file_filter("^scripts/"), &store)
            .unwrap();
        assert_eq!(res.results.len(), 1);
        assert_eq!(res.results[0].file_path, "scripts/Setup.py");

        let res = engine
            .search_store(&base.clone().with_language("GO"), &store)
            .unwrap();
        assert_eq!(res.results.len(), 1);
        assert_eq!(res.results[0].language, "go");

        let err = engine
            .search_store(&base.with_file_filter("[bad"), &store)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_max_results_sets_has_more() {
        let store = store_with(Path::new("/repo"), FILES, &HashEmbedder::new(64));
        let query = SearchQuery::new("database")
            .with_search_type(SearchType::Text)
            .with_max_results(1);
        let res = hash_engine().search_store(&query, &store).unwrap();
        assert_eq!(res.results.len(), 1);
        assert_eq!(res.total_found, 2);
        assert!(res.has_more);
        assert_eq!(res.results[0].rank, 1);
    }

    #[test]
    fn test_context_lines_from_disk() {
        let repo = tempdir().unwrap();
        let text: String = (1..=50).map(|i| format!("line{i}\n")).collect();
        fs::write(repo.path().join("long.txt"), &text).unwrap();
        let store = store_with(repo.path(), &[("long.txt", text.as_str())], &HashEmbedder::new(64));

        let query = SearchQuery::new("line40")
            .with_search_type(SearchType::Text)
            .with_context(2);
        let res = hash_engine().search_store(&query, &store).unwrap();
        let hit = &res.results[0];
        let window = hit.surrounding.as_ref().unwrap();
        assert_eq!(window.before.len(), 2);
        assert_eq!(window.before[1], format!("line{}", hit.start_line - 1));
        assert!(window.after.len() <= 2);
    }

    #[test]
    fn test_unreadable_file_gets_no_context() {
        let store = store_with(Path::new("/nonexistent/repo"), FILES, &HashEmbedder::new(64));
        let query = SearchQuery::new("database")
            .with_search_type(SearchType::Text)
            .with_context(3);
        let res = hash_engine().search_store(&query, &store).unwrap();
        assert!(!res.results.is_empty());
        assert!(res.results.iter().all(|r| r.surrounding.is_none()));
    }

    #[test]
    fn test_expired_deadline_truncates() {
        let store = store_with(Path::new("/repo"), FILES, &HashEmbedder::new(64));
        let query = SearchQuery::new("database")
            .with_search_type(SearchType::Text)
            .with_deadline(Duration::ZERO);
        let res = hash_engine().search_store(&query, &store).unwrap();
        assert!(res.truncated);
        assert!(res.results.is_empty());
    }

    #[test]
    fn test_missing_index_creates_nothing() {
        let repo = tempdir().unwrap();
        let loc = IndexLocation::with_index_dir(repo.path(), repo.path().join(".codesearch")).unwrap();
        let err = hash_engine().search(&SearchQuery::new("x"), &loc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!repo.path().join(".codesearch").exists());
    }

    #[test]
    fn test_empty_query_is_rejected_before_io() {
        let repo = tempdir().unwrap();
        let loc = IndexLocation::with_index_dir(repo.path(), repo.path().join(".codesearch")).unwrap();
        let err = hash_engine().search(&SearchQuery::new("  "), &loc).unwrap_err();
        assert!(matches!(err, Error::EmptyQuery));
    }
}

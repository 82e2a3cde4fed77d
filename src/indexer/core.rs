use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::Serialize;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tracing::{debug, info, warn};

use super::chunker::Chunker;
use super::filter::{DEFAULT_MAX_FILE_SIZE, FileFilter, relative_path};
use super::languages::detect_language;
use crate::embedder::{Embedder, EmbedderError, embed_in_batches};
use crate::error::{Error, ErrorKind, Result};
use crate::location::{IndexLocation, IndexLock, LOCK_FILE, LockRetry};
use crate::store::IndexStore;
use crate::store::files::{content_hash, content_status, stat_unchanged};
use crate::store::models::{ChunkConfig, FileEntry, FileStatus};

/// Knobs for one build or refresh.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub include_hidden: bool,
    pub extra_excludes: Vec<String>,
    pub max_file_size: u64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_lines: usize,
    pub max_concurrency: usize,
    pub enable_incremental: bool,
    pub force: bool,
    pub respect_gitignore: bool,
    pub embed_batch_size: usize,
    pub deadline: Option<Duration>,
    pub lock_retry: LockRetry,
}

impl Default for IndexOptions {
    fn default() -> Self {
        let chunk = ChunkConfig::default();
        Self {
            include_hidden: false,
            extra_excludes: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            chunk_size: chunk.chunk_lines,
            chunk_overlap: chunk.overlap_lines,
            min_chunk_lines: chunk.min_chunk_lines,
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            enable_incremental: true,
            force: false,
            respect_gitignore: true,
            embed_batch_size: 32,
            deadline: None,
            lock_retry: LockRetry::NONE,
        }
    }
}

impl IndexOptions {
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            chunk_lines: self.chunk_size,
            overlap_lines: self.chunk_overlap,
            min_chunk_lines: self.min_chunk_lines,
            structural_hints: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::bad_request("max_concurrency", "must be at least 1"));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::bad_request("embed_batch_size", "must be at least 1"));
        }
        if self.max_file_size == 0 {
            return Err(Error::bad_request("max_file_size", "must be positive"));
        }
        self.chunk_config().validate()?;
        FileFilter::new(self.include_hidden, &self.extra_excludes, self.max_file_size)?;
        Ok(())
    }
}

/// A file that could not be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl FileError {
    fn new(path: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_added: usize,
    pub files_changed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub files_skipped: usize,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    pub chunks_total: usize,
    pub files_total: usize,
    pub embedding_calls: usize,
    pub duration_ms: u64,
    pub errors: Vec<FileError>,
}

/// Header-level view of a committed index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    pub repository_path: PathBuf,
    pub index_dir: PathBuf,
    pub version: String,
    pub dim: usize,
    pub file_count: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub chunk_cfg: ChunkConfig,
    pub size_bytes: u64,
}

/// Stat data of an already indexed file, used by the walker to diff.
struct KnownFile {
    last_modified: DateTime<Utc>,
    size: u64,
    content_hash: String,
}

struct Job {
    path: String,
    abs: PathBuf,
    language: &'static str,
    size: u64,
    last_modified: DateTime<Utc>,
    previous_hash: Option<String>,
}

enum Outcome {
    Indexed {
        entry: FileEntry,
        embedding_calls: usize,
    },
    Unchanged {
        path: String,
        last_modified: DateTime<Utc>,
        size: u64,
    },
    Failed(FileError),
}

struct WalkPlan {
    root: PathBuf,
    filter: FileFilter,
    respect_gitignore: bool,
    incremental: bool,
    known: HashMap<String, KnownFile>,
    deadline: Option<Instant>,
}

#[derive(Default)]
struct WalkSummary {
    candidates: HashSet<String>,
    unchanged: usize,
    scanned: usize,
    queued: usize,
    complete: bool,
}

struct WorkContext {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    max_file_size: u64,
    deadline: Option<Instant>,
}

#[derive(Default)]
struct Tally {
    successes: usize,
    embed_failures: usize,
    first_embed_error: Option<String>,
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Internal(format!("indexing task failed: {e}"))
}

pub struct Indexer {
    embedder: Arc<dyn Embedder>,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Build or update the index of the repository at `root`.
    pub async fn build(&self, root: impl AsRef<Path>, options: &IndexOptions) -> Result<IndexStats> {
        options.validate()?;
        let location = IndexLocation::for_repo(root)?;
        self.build_at(&location, options).await
    }

    /// Incremental update: never forced, always hash-checked.
    pub async fn refresh(&self, root: impl AsRef<Path>, options: &IndexOptions) -> Result<IndexStats> {
        let options = IndexOptions {
            force: false,
            enable_incremental: true,
            ..options.clone()
        };
        self.build(root, &options).await
    }

    pub async fn build_at(&self, location: &IndexLocation, options: &IndexOptions) -> Result<IndexStats> {
        options.validate()?;
        let started = Instant::now();
        let deadline = options.deadline.map(|d| started + d);

        let _lock = {
            let location = location.clone();
            let retry = options.lock_retry;
            tokio::task::spawn_blocking(move || IndexLock::exclusive(&location, retry))
                .await
                .map_err(join_error)??
        };

        info!("Indexing {}", location.repo_root().display());
        let (mut store, incremental) = self.open_store(location, options)?;

        let known: HashMap<String, KnownFile> = store
            .all_files()
            .map(|e| {
                (
                    e.path.clone(),
                    KnownFile {
                        last_modified: e.last_modified,
                        size: e.size,
                        content_hash: e.content_hash.clone(),
                    },
                )
            })
            .collect();

        let filter = FileFilter::new(options.include_hidden, &options.extra_excludes, options.max_file_size)?;
        let plan = WalkPlan {
            root: location.repo_root().to_path_buf(),
            filter,
            respect_gitignore: options.respect_gitignore,
            incremental,
            known,
            deadline,
        };

        let workers = options.max_concurrency;
        let (job_tx, job_rx) = mpsc::channel::<Job>(workers * 2);
        let (out_tx, mut out_rx) = mpsc::channel::<Outcome>(workers * 2);

        let walker = tokio::task::spawn_blocking(move || walk(plan, job_tx));

        let ctx = Arc::new(WorkContext {
            chunker: Chunker::new(options.chunk_config())?,
            embedder: Arc::clone(&self.embedder),
            batch_size: options.embed_batch_size,
            max_file_size: options.max_file_size,
            deadline,
        });
        let job_rx = Arc::new(TokioMutex::new(job_rx));
        let handles: Vec<_> = (0..workers)
            .map(|_| tokio::spawn(run_worker(Arc::clone(&ctx), Arc::clone(&job_rx), out_tx.clone())))
            .collect();
        drop(out_tx);

        let mut stats = IndexStats::default();
        let mut tally = Tally::default();
        while let Some(outcome) = out_rx.recv().await {
            apply_outcome(&mut store, &mut stats, &mut tally, outcome)?;
        }

        let mut drained = 0;
        for handle in handles {
            drained += handle.await.map_err(join_error)?;
        }
        let summary = walker.await.map_err(join_error)?;

        stats.files_scanned = summary.scanned;
        stats.files_unchanged += summary.unchanged;

        if summary.queued > 0 && tally.successes == 0 && tally.embed_failures > 0 {
            let message = tally.first_embed_error.unwrap_or_default();
            warn!("Every queued file failed to embed, nothing committed");
            return Err(Error::Embed(EmbedderError::InferenceFailed(message)));
        }

        let timed_out = !summary.complete || drained > 0;
        if timed_out {
            warn!("Deadline reached after {} files, skipping deletions", stats.files_indexed);
        } else {
            let stale: Vec<String> = store
                .all_files()
                .filter(|e| !summary.candidates.contains(&e.path))
                .map(|e| e.path.clone())
                .collect();
            for path in stale {
                if let Some(old) = store.remove_file_entry(&path) {
                    stats.files_removed += 1;
                    stats.chunks_removed += old.chunks.len();
                }
            }
        }

        store.save(location)?;

        stats.files_total = store.file_count();
        stats.chunks_total = store.chunk_count();
        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Indexed {} files ({} added, {} changed, {} unchanged, {} removed, {} skipped) in {}ms",
            stats.files_indexed,
            stats.files_added,
            stats.files_changed,
            stats.files_unchanged,
            stats.files_removed,
            stats.files_skipped,
            stats.duration_ms
        );
        store.close();

        if timed_out {
            return Err(Error::Timeout {
                stats: Some(Box::new(stats)),
            });
        }
        Ok(stats)
    }

    /// Load the committed index or start a fresh one. The returned flag says
    /// whether stat and hash shortcuts may be used for this run.
    fn open_store(&self, location: &IndexLocation, options: &IndexOptions) -> Result<(IndexStore, bool)> {
        let cfg = options.chunk_config();
        let dim = self.embedder.dimensions();
        if options.force || !location.exists() {
            return Ok((
                IndexStore::create(location.repo_root(), dim, cfg),
                options.enable_incremental,
            ));
        }

        let mut store = IndexStore::load(location, dim)?;
        if *store.chunk_config() != cfg {
            info!("Chunk configuration changed, re-chunking every file");
            store.set_chunk_config(cfg);
            return Ok((store, false));
        }
        Ok((store, options.enable_incremental))
    }

    /// Remove the index of `root`. Returns whether one existed.
    pub fn drop_index(&self, root: impl AsRef<Path>) -> Result<bool> {
        let location = IndexLocation::for_repo(root)?;
        self.drop_at(&location)
    }

    pub fn drop_at(&self, location: &IndexLocation) -> Result<bool> {
        let dir = location.index_dir();
        if !dir.is_dir() {
            return Ok(false);
        }
        let lock = IndexLock::exclusive(location, LockRetry::NONE)?;
        for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
            let entry = entry.map_err(|e| Error::io(dir, e))?;
            if entry.file_name() == LOCK_FILE {
                continue;
            }
            let path = entry.path();
            let res = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            res.map_err(|e| Error::io(&path, e))?;
        }
        drop(lock);

        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(dir, e)),
        }
        info!("Dropped index {}", dir.display());
        Ok(true)
    }

    pub fn status(&self, root: impl AsRef<Path>) -> Result<IndexStatus> {
        let location = IndexLocation::for_repo(root)?;
        self.status_at(&location)
    }

    pub fn status_at(&self, location: &IndexLocation) -> Result<IndexStatus> {
        location.require_index()?;
        let _lock = IndexLock::shared(location, LockRetry::NONE)?;
        let meta = IndexStore::read_metadata(location)?;
        let size_bytes = [location.index_path(), location.metadata_path()]
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        Ok(IndexStatus {
            repository_path: meta.repository_path,
            index_dir: location.index_dir().to_path_buf(),
            version: meta.version,
            dim: meta.dim,
            file_count: meta.file_count,
            chunk_count: meta.chunk_count,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            chunk_cfg: meta.chunk_cfg,
            size_bytes,
        })
    }
}

fn apply_outcome(store: &mut IndexStore, stats: &mut IndexStats, tally: &mut Tally, outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Indexed {
            entry,
            embedding_calls,
        } => {
            let new_ids: HashSet<String> = entry.chunk_ids().map(str::to_string).collect();
            let previous = store.add_file_entry(entry)?;
            let old_ids: HashSet<String> = previous
                .as_ref()
                .map(|p| p.chunk_ids().map(str::to_string).collect())
                .unwrap_or_default();
            stats.chunks_added += new_ids.difference(&old_ids).count();
            stats.chunks_removed += old_ids.difference(&new_ids).count();
            if previous.is_some() {
                stats.files_changed += 1;
            } else {
                stats.files_added += 1;
            }
            stats.files_indexed += 1;
            stats.embedding_calls += embedding_calls;
            tally.successes += 1;
        }
        Outcome::Unchanged {
            path,
            last_modified,
            size,
        } => {
            store.touch_file(&path, last_modified, size);
            stats.files_unchanged += 1;
            tally.successes += 1;
        }
        Outcome::Failed(err) => {
            warn!("Skipping {}: {}", err.path, err.message);
            if err.kind == ErrorKind::EmbedFailure {
                tally.embed_failures += 1;
                tally.first_embed_error.get_or_insert_with(|| err.message.clone());
            }
            stats.files_skipped += 1;
            stats.errors.push(err);
        }
    }
    Ok(())
}

/// Walk the repository and queue files that need (re)processing.
fn walk(plan: WalkPlan, tx: mpsc::Sender<Job>) -> WalkSummary {
    let mut summary = WalkSummary::default();
    let respect = plan.respect_gitignore;
    let prune = plan.filter.clone();

    let walker = WalkBuilder::new(&plan.root)
        .hidden(false)
        .ignore(respect)
        .git_ignore(respect)
        .git_global(respect)
        .git_exclude(respect)
        .parents(respect)
        .require_git(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            entry.depth() == 0 || !prune.is_segment_denied(&entry.file_name().to_string_lossy())
        })
        .build();

    for result in walker {
        if expired(plan.deadline) {
            return summary;
        }
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Walk error: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let abs = entry.path();
        let Some(rel) = relative_path(&plan.root, abs) else {
            continue;
        };
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("Cannot stat {rel}: {e}");
                continue;
            }
        };
        let size = meta.len();
        if !plan.filter.should_index(&rel, abs, size) {
            debug!("Filtered out {rel}");
            continue;
        }
        let Some(language) = detect_language(&rel) else {
            continue;
        };

        summary.scanned += 1;
        summary.candidates.insert(rel.clone());
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let known = plan.known.get(&rel);
        if plan.incremental
            && known.is_some_and(|k| stat_unchanged(last_modified, size, k.last_modified, k.size))
        {
            summary.unchanged += 1;
            continue;
        }

        let job = Job {
            previous_hash: known
                .filter(|_| plan.incremental)
                .map(|k| k.content_hash.clone()),
            path: rel,
            abs: abs.to_path_buf(),
            language,
            size,
            last_modified,
        };
        summary.queued += 1;
        if tx.blocking_send(job).is_err() {
            return summary;
        }
    }

    summary.complete = true;
    summary
}

/// Pull jobs until the queue closes. Past the deadline, jobs are drained
/// without being processed; the return value counts them.
async fn run_worker(
    ctx: Arc<WorkContext>,
    jobs: Arc<TokioMutex<mpsc::Receiver<Job>>>,
    out: mpsc::Sender<Outcome>,
) -> usize {
    let mut drained = 0;
    loop {
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        if expired(ctx.deadline) {
            drained += 1;
            continue;
        }

        let path = job.path.clone();
        let work = Arc::clone(&ctx);
        let outcome = match tokio::task::spawn_blocking(move || process_file(&work, job)).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(FileError::new(path, ErrorKind::Internal, e.to_string())),
        };
        if out.send(outcome).await.is_err() {
            break;
        }
    }
    drained
}

/// Read, hash, chunk and embed one file.
fn process_file(ctx: &WorkContext, job: Job) -> Outcome {
    let bytes = match fs::read(&job.abs) {
        Ok(b) => b,
        Err(e) => return Outcome::Failed(FileError::new(job.path, ErrorKind::IoFailure, e.to_string())),
    };
    let size = bytes.len() as u64;
    if size > ctx.max_file_size {
        return Outcome::Failed(FileError::new(
            job.path,
            ErrorKind::BadRequest,
            format!("file grew to {size} bytes, limit is {}", ctx.max_file_size),
        ));
    }

    let hash = content_hash(&bytes);
    if job
        .previous_hash
        .as_deref()
        .is_some_and(|prev| content_status(&hash, prev) == FileStatus::Unchanged)
    {
        return Outcome::Unchanged {
            path: job.path,
            last_modified: job.last_modified,
            size,
        };
    }

    let text = match String::from_utf8(bytes) {
        Ok(t) => t,
        Err(_) => {
            return Outcome::Failed(FileError::new(job.path, ErrorKind::BadRequest, "not valid UTF-8"));
        }
    };

    let mut chunks = ctx.chunker.chunk(&text, &job.path, job.language);
    let embedded = {
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        embed_in_batches(ctx.embedder.as_ref(), &texts, ctx.batch_size)
    };
    let (vectors, embedding_calls) = match embedded {
        Ok(v) => v,
        Err(e) => return Outcome::Failed(FileError::new(job.path, ErrorKind::EmbedFailure, e.to_string())),
    };
    for (chunk, vector) in chunks.iter_mut().zip(vectors) {
        chunk.vector = Some(vector);
    }

    debug!("Chunked {} into {} chunks", job.path, chunks.len());
    Outcome::Indexed {
        entry: FileEntry {
            line_count: text.lines().count(),
            path: job.path,
            language: job.language.to_string(),
            size,
            last_modified: job.last_modified,
            content_hash: hash,
            chunks,
        },
        embedding_calls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::hashing::HashEmbedder;
    use std::time::SystemTime;
    use tempfile::tempdir;

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbedderError> {
            Err(EmbedderError::InferenceFailed("model unavailable".into()))
        }

        fn embed_batch(&self, _texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, EmbedderError> {
            Err(EmbedderError::InferenceFailed("model unavailable".into()))
        }

        fn dimensions(&self) -> usize {
            8
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn indexer() -> Indexer {
        Indexer::new(Arc::new(HashEmbedder::new(64)))
    }

    fn options() -> IndexOptions {
        IndexOptions {
            max_concurrency: 2,
            ..IndexOptions::default()
        }
    }

    fn sample_repo(root: &Path) {
        write(root, "src/main.rs", "fn main() {\n    println!(\"hi\");\n}\n");
        write(root, "src/lib.rs", "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n");
        write(root, "tools/gen.py", "def generate():\n    return 42\n");
        write(root, "README.md", "# Sample\n");
        write(root, "node_modules/dep/index.js", "module.exports = 1;\n");
    }

    #[tokio::test]
    async fn test_build_then_refresh_is_incremental() {
        let repo = tempdir().unwrap();
        sample_repo(repo.path());
        let indexer = indexer();

        let first = indexer.build(repo.path(), &options()).await.unwrap();
        assert_eq!(first.files_scanned, 4);
        assert_eq!(first.files_added, 4);
        assert_eq!(first.files_total, 4);
        assert!(first.chunks_total >= 4);
        assert!(first.embedding_calls >= 4);
        assert!(first.errors.is_empty());

        let second = indexer.refresh(repo.path(), &options()).await.unwrap();
        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.files_unchanged, 4);
        assert_eq!(second.embedding_calls, 0);
        assert_eq!(second.chunks_total, first.chunks_total);
    }

    #[tokio::test]
    async fn test_modified_file_is_the_only_one_rechunked() {
        let repo = tempdir().unwrap();
        sample_repo(repo.path());
        let indexer = indexer();
        indexer.build(repo.path(), &options()).await.unwrap();
        let loc = IndexLocation::for_repo(repo.path()).unwrap();
        let before = IndexStore::load(&loc, 64).unwrap();

        write(
            repo.path(),
            "src/lib.rs",
            "pub fn add(a: i32, b: i32) -> i32 {\n    a + b + 0\n}\n",
        );
        let stats = indexer.refresh(repo.path(), &options()).await.unwrap();
        assert_eq!(stats.files_changed, 1);
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(stats.chunks_added, 1);
        assert_eq!(stats.chunks_removed, 1);

        let after = IndexStore::load(&loc, 64).unwrap();
        assert_ne!(after.get_file("src/lib.rs"), before.get_file("src/lib.rs"));
        assert_eq!(after.get_file("src/main.rs"), before.get_file("src/main.rs"));
        assert_eq!(after.get_file("tools/gen.py"), before.get_file("tools/gen.py"));
    }

    #[tokio::test]
    async fn test_rewrite_with_same_bytes_is_unchanged() {
        let repo = tempdir().unwrap();
        sample_repo(repo.path());
        let indexer = indexer();
        indexer.build(repo.path(), &options()).await.unwrap();

        write(repo.path(), "src/main.rs", "fn main() {\n    println!(\"hi\");\n}\n");
        let stats = indexer.refresh(repo.path(), &options()).await.unwrap();
        assert_eq!(stats.files_indexed, 0);
        assert_eq!(stats.files_unchanged, 4);
    }

    #[tokio::test]
    async fn test_deleted_file_is_removed() {
        let repo = tempdir().unwrap();
        sample_repo(repo.path());
        let indexer = indexer();
        let first = indexer.build(repo.path(), &options()).await.unwrap();

        fs::remove_file(repo.path().join("tools/gen.py")).unwrap();
        let stats = indexer.refresh(repo.path(), &options()).await.unwrap();
        assert_eq!(stats.files_removed, 1);
        assert!(stats.chunks_removed >= 1);
        assert_eq!(stats.files_total, first.files_total - 1);
    }

    #[tokio::test]
    async fn test_force_rebuilds_everything() {
        let repo = tempdir().unwrap();
        sample_repo(repo.path());
        let indexer = indexer();
        indexer.build(repo.path(), &options()).await.unwrap();

        let forced = IndexOptions {
            force: true,
            ..options()
        };
        let stats = indexer.build(repo.path(), &forced).await.unwrap();
        assert_eq!(stats.files_indexed, 4);
        assert_eq!(stats.files_unchanged, 0);
    }

    #[tokio::test]
    async fn test_chunk_config_change_rechunks() {
        let repo = tempdir().unwrap();
        sample_repo(repo.path());
        let indexer = indexer();
        indexer.build(repo.path(), &options()).await.unwrap();

        let smaller = IndexOptions {
            chunk_size: 10,
            chunk_overlap: 2,
            ..options()
        };
        let stats = indexer.refresh(repo.path(), &smaller).await.unwrap();
        assert_eq!(stats.files_changed, 4);
        let status = indexer.status(repo.path()).unwrap();
        assert_eq!(status.chunk_cfg.chunk_lines, 10);
    }

    #[tokio::test]
    async fn test_non_utf8_file_is_skipped() {
        let repo = tempdir().unwrap();
        write(repo.path(), "ok.rs", "fn ok() {}\n");
        fs::write(repo.path().join("bad.rs"), b"fn bad() {}\n\xff\xfe\n").unwrap();

        let stats = indexer().build(repo.path(), &options()).await.unwrap();
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.errors[0].path, "bad.rs");
        assert_eq!(stats.errors[0].kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_all_embed_failures_commit_nothing() {
        let repo = tempdir().unwrap();
        sample_repo(repo.path());
        let indexer = Indexer::new(Arc::new(FailingEmbedder));

        let err = indexer.build(repo.path(), &options()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbedFailure);
        let loc = IndexLocation::for_repo(repo.path()).unwrap();
        assert!(!loc.exists());
    }

    #[tokio::test]
    async fn test_embed_outage_fails_despite_other_skips() {
        let repo = tempdir().unwrap();
        write(repo.path(), "a.rs", "fn a() {}\n");
        write(repo.path(), "b.rs", "fn b() {}\n");
        fs::write(repo.path().join("bad.rs"), b"fn bad() {}\n\xff\xfe\n").unwrap();
        let indexer = Indexer::new(Arc::new(FailingEmbedder));

        let err = indexer.build(repo.path(), &options()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbedFailure);
        assert!(!IndexLocation::for_repo(repo.path()).unwrap().exists());
    }

    /// Fails any batch containing the word `explode`.
    struct SelectiveEmbedder(HashEmbedder);

    impl Embedder for SelectiveEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedderError> {
            if text.contains("explode") {
                return Err(EmbedderError::InferenceFailed("rejected input".into()));
            }
            self.0.embed(text)
        }

        fn embed_batch(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, EmbedderError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimensions(&self) -> usize {
            self.0.dimensions()
        }
    }

    #[tokio::test]
    async fn test_partial_embed_failure_commits_the_rest() {
        let repo = tempdir().unwrap();
        write(repo.path(), "a.rs", "fn a() {}\n");
        write(repo.path(), "b.rs", "fn b() {}\n");
        write(repo.path(), "c.rs", "fn c() { explode() }\n");
        let indexer = Indexer::new(Arc::new(SelectiveEmbedder(HashEmbedder::new(64))));

        let stats = indexer.build(repo.path(), &options()).await.unwrap();
        assert_eq!(stats.files_indexed, 2);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].path, "c.rs");
        assert_eq!(stats.errors[0].kind, ErrorKind::EmbedFailure);

        let loc = IndexLocation::for_repo(repo.path()).unwrap();
        let store = IndexStore::load(&loc, 64).unwrap();
        assert!(store.get_file("a.rs").is_some());
        assert!(store.get_file("b.rs").is_some());
        assert!(store.get_file("c.rs").is_none());

        // a failed re-embed keeps the previously committed entry
        write(repo.path(), "a.rs", "fn a() { explode() }\n");
        write(repo.path(), "b.rs", "fn b() -> u8 { 1 }\n");
        let stats = indexer.refresh(repo.path(), &options()).await.unwrap();
        assert_eq!(stats.files_skipped, 2);
        assert_eq!(stats.files_changed, 1);
        let store = IndexStore::load(&loc, 64).unwrap();
        let kept = store.get_file("a.rs").unwrap();
        assert_eq!(kept.content_hash, content_hash(b"fn a() {}\n"));
        assert!(!kept.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_older_mtime_with_same_size_is_trusted() {
        let repo = tempdir().unwrap();
        sample_repo(repo.path());
        let indexer = indexer();
        indexer.build(repo.path(), &options()).await.unwrap();

        let path = repo.path().join("src/main.rs");
        fs::write(&path, "fn main() {\n    println!(\"yo\");\n}\n").unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();

        let stats = indexer.refresh(repo.path(), &options()).await.unwrap();
        assert_eq!(stats.files_indexed, 0);
        assert_eq!(stats.files_unchanged, 4);
    }

    #[tokio::test]
    async fn test_expired_deadline_returns_partial_stats() {
        let repo = tempdir().unwrap();
        sample_repo(repo.path());
        let opts = IndexOptions {
            deadline: Some(Duration::ZERO),
            ..options()
        };

        let err = indexer().build(repo.path(), &opts).await.unwrap_err();
        match err {
            Error::Timeout { stats: Some(stats) } => assert_eq!(stats.files_indexed, 0),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(IndexLocation::for_repo(repo.path()).unwrap().exists());
    }

    #[tokio::test]
    async fn test_busy_when_locked() {
        let repo = tempdir().unwrap();
        sample_repo(repo.path());
        let loc = IndexLocation::for_repo(repo.path()).unwrap();
        let _held = IndexLock::exclusive(&loc, LockRetry::NONE).unwrap();

        let err = indexer().build(repo.path(), &options()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexBusy);
    }

    #[tokio::test]
    async fn test_status_and_drop() {
        let repo = tempdir().unwrap();
        sample_repo(repo.path());
        let indexer = indexer();
        assert_eq!(indexer.status(repo.path()).unwrap_err().kind(), ErrorKind::NotFound);

        let stats = indexer.build(repo.path(), &options()).await.unwrap();
        let status = indexer.status(repo.path()).unwrap();
        assert_eq!(status.file_count, stats.files_total);
        assert_eq!(status.chunk_count, stats.chunks_total);
        assert_eq!(status.dim, 64);
        assert!(status.size_bytes > 0);

        assert!(indexer.drop_index(repo.path()).unwrap());
        assert!(!repo.path().join(".codesearch").exists());
        assert!(!indexer.drop_index(repo.path()).unwrap());
    }

    #[test]
    fn test_options_validation() {
        let bad = [
            IndexOptions {
                max_concurrency: 0,
                ..IndexOptions::default()
            },
            IndexOptions {
                embed_batch_size: 0,
                ..IndexOptions::default()
            },
            IndexOptions {
                chunk_overlap: 30,
                ..IndexOptions::default()
            },
            IndexOptions {
                extra_excludes: vec!["[".to_string()],
                ..IndexOptions::default()
            },
        ];
        for opts in bad {
            assert_eq!(opts.validate().unwrap_err().kind(), ErrorKind::BadRequest);
        }
        assert!(IndexOptions::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_missing_root_is_not_found() {
        let err = indexer()
            .build("/definitely/not/a/repo", &options())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

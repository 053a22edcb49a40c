//! Indexing orchestrator.
//!
//! Sequences discovery, incremental diff, parsing, chunking, summary
//! generation, embedding, symbol extraction, and persistence for one
//! repository. Files move through the per-file stages strictly in order;
//! across files, work is spread over a bounded worker pool with a separate
//! bound on concurrent embedding calls so backpressure lands on the
//! slowest stage. Per-file failures are recorded and skipped; only
//! discovery and schema failures abort the run.

pub mod diff;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::chunker::{self, ChunkerOptions};
use crate::config::Config;
use crate::discover::{DiscoverOptions, Discoverer};
use crate::embedder::{EmbedPurpose, Embedder};
use crate::error::{AtlasError, AtlasResult};
use crate::parser::ParserFacade;
use crate::store::Store;
use crate::summary::SummaryGenerator;
use crate::symbols;
use crate::types::{
    CodeFile, CrossRepoDependency, FileError, FileStage, IndexingStats, ProjectRefs, RepoType,
    Repository, SummaryMethod,
};
use crate::workspace::{self, ProjectLayout};

/// Options for one indexing request.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Stable repository id. Defaults to the root directory name.
    pub repo_id: Option<String>,
    /// Human-readable name. Defaults to the repo id.
    pub repo_name: Option<String>,
    /// Repository classification. Defaults to `monolithic`.
    pub repo_type: Option<RepoType>,
    /// Operator-provided metadata stored on the repository header.
    pub metadata: serde_json::Value,
    /// Skip files whose hash is unchanged.
    pub incremental: bool,
    /// Process every file even when hashes match.
    pub force_reindex: bool,
    /// Detect monorepo workspaces from manifests.
    pub detect_workspaces: bool,
    /// Detect services from conventional directories.
    pub detect_services: bool,
    /// Record cross-repo dependency edges to these repo ids.
    pub link_to_repos: Vec<String>,
    /// Per-request language allowlist; empty keeps the configured one.
    pub languages: Vec<String>,
    /// Override: index documentation formats.
    pub include_docs: Option<bool>,
    /// Override: honor repository ignore files.
    pub respect_ignore_file: Option<bool>,
    /// Override: skip files over this many lines.
    pub max_file_lines: Option<u32>,
    /// Force rule-based summaries for this run.
    pub rule_based_summaries: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            repo_id: None,
            repo_name: None,
            repo_type: None,
            metadata: serde_json::Value::Null,
            incremental: true,
            force_reindex: false,
            detect_workspaces: true,
            detect_services: true,
            link_to_repos: Vec::new(),
            languages: Vec::new(),
            include_docs: None,
            respect_ignore_file: None,
            max_file_lines: None,
            rule_based_summaries: false,
        }
    }
}

/// The indexing pipeline. Owns shared handles to every subsystem; cheap to
/// clone per request.
#[derive(Clone)]
pub struct Indexer {
    store: Arc<dyn Store>,
    embedder: Arc<Embedder>,
    summaries: Arc<SummaryGenerator>,
    parser: Arc<ParserFacade>,
    config: Arc<Config>,
}

/// Outcome of one successfully pipelined file.
struct FileOutcome {
    is_new: bool,
    chunks: usize,
    chunks_embedded: usize,
    symbols: usize,
    summary_method: SummaryMethod,
    timings: Vec<(FileStage, u64)>,
}

/// Everything a per-file task needs, shared across the pool.
struct FileContext {
    store: Arc<dyn Store>,
    embedder: Arc<Embedder>,
    summaries: Arc<SummaryGenerator>,
    parser: Arc<ParserFacade>,
    chunker_opts: ChunkerOptions,
    layout: ProjectLayout,
    repo_path: String,
    repo_id: String,
    max_symbol_def_bytes: usize,
    rule_based_summaries: bool,
    embed_sem: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Indexer {
    /// Create an indexer over the given subsystems.
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<Embedder>,
        summaries: Arc<SummaryGenerator>,
        parser: Arc<ParserFacade>,
        config: Arc<Config>,
    ) -> Self {
        Self { store, embedder, summaries, parser, config }
    }

    /// Index one repository.
    ///
    /// Fatal errors (`DiscoveryFailed`, `SchemaMismatch`, cancellation)
    /// propagate; per-file failures are recorded in the returned stats.
    pub async fn index(
        &self,
        repo_root: &Path,
        opts: &IndexOptions,
        cancel: &CancellationToken,
    ) -> AtlasResult<IndexingStats> {
        let started = Instant::now();

        self.store
            .healthcheck(self.embedder.dimension())
            .map_err(|e| match e {
                AtlasError::SchemaMismatch { .. } | AtlasError::StoreUnavailable { .. } => e,
                other => AtlasError::IndexingAborted { reason: other.to_string() },
            })?;

        let repo_path = repo_root.to_string_lossy().to_string();
        let repo_id = opts.repo_id.clone().unwrap_or_else(|| {
            repo_root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| repo_path.clone())
        });

        // Repository header plus workspace/service tables, each under its
        // own short transaction, before file processing begins.
        self.persist_repo_header(&repo_path, &repo_id, opts)?;
        let layout = workspace::detect(
            repo_root,
            &repo_id,
            opts.detect_workspaces,
            opts.detect_services,
        );
        self.store.upsert_workspaces(&layout.workspaces)?;
        self.store.upsert_workspace_aliases(&layout.aliases)?;
        self.store.upsert_services(&layout.services)?;

        // Discovery, with per-request overrides applied over the config.
        let mut discover_opts = DiscoverOptions::from(&self.config.indexing);
        if !opts.languages.is_empty() {
            discover_opts.languages_allowlist = opts.languages.clone();
        }
        if let Some(include_docs) = opts.include_docs {
            discover_opts.include_docs = include_docs;
        }
        if let Some(respect) = opts.respect_ignore_file {
            discover_opts.respect_ignore_file = respect;
        }
        if let Some(max_lines) = opts.max_file_lines {
            discover_opts.max_file_lines = max_lines;
        }
        let discoverer = Discoverer::new(discover_opts)?;
        let (discovered, discovery_stats) = discoverer.discover(repo_root)?;

        let mut stats = IndexingStats {
            files_total: discovered.len(),
            ..IndexingStats::default()
        };

        // Incremental classification; deletions of vanished files always
        // apply so re-indexing never leaves stale rows behind.
        let (plan, diff_stats) = diff::classify(self.store.as_ref(), &repo_path, discovered)?;
        stats.files_deleted = diff::apply_deletions(self.store.as_ref(), &repo_path, &plan)?;

        let (to_process, new_paths) = if opts.incremental && !opts.force_reindex {
            stats.files_skipped = plan.unchanged;
            stats.skip_rate = diff_stats.skip_rate;
            (plan.to_process, plan.new_paths)
        } else {
            // Full reindex: everything runs, nothing is skipped. Unchanged
            // files were filtered out of the plan, so re-discover for the
            // full pass.
            let mut all = plan.to_process;
            if plan.unchanged > 0 {
                let (rediscovered, _) = discoverer.discover(repo_root)?;
                all = rediscovered;
            }
            (all, plan.new_paths)
        };

        tracing::info!(
            repo = %repo_path,
            total = stats.files_total,
            to_process = to_process.len(),
            skipped = stats.files_skipped,
            deleted = stats.files_deleted,
            io_errors = discovery_stats.io_errors,
            "indexing plan ready"
        );

        // Per-file pipeline over the bounded worker pools.
        let ctx = Arc::new(FileContext {
            store: self.store.clone(),
            embedder: self.embedder.clone(),
            summaries: self.summaries.clone(),
            parser: self.parser.clone(),
            chunker_opts: ChunkerOptions::from(&self.config.indexing),
            layout,
            repo_path: repo_path.clone(),
            repo_id,
            max_symbol_def_bytes: self.config.indexing.max_symbol_def_bytes,
            rule_based_summaries: opts.rule_based_summaries,
            embed_sem: Arc::new(Semaphore::new(self.config.indexing.embed_workers.max(1))),
            cancel: cancel.clone(),
        });
        let file_sem = Arc::new(Semaphore::new(self.config.indexing.effective_file_workers()));

        let mut join_set = JoinSet::new();
        for file in to_process {
            if cancel.is_cancelled() {
                break;
            }
            let ctx = ctx.clone();
            let sem = file_sem.clone();
            let is_new = new_paths.contains(&file.relative_path);
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                process_file(ctx, file, is_new).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    stats.files_processed += 1;
                    if outcome.is_new {
                        stats.files_indexed_new += 1;
                    }
                    stats.chunks_total += outcome.chunks;
                    stats.chunks_embedded += outcome.chunks_embedded;
                    stats.symbols_extracted += outcome.symbols;
                    match outcome.summary_method {
                        SummaryMethod::Llm => stats.summaries_llm += 1,
                        SummaryMethod::RuleBased => stats.summaries_fallback += 1,
                    }
                    for (stage, ms) in outcome.timings {
                        *stats.per_stage_timings.entry(stage.as_str().to_string()).or_default() +=
                            ms;
                    }
                }
                Ok(Err(error)) => {
                    tracing::warn!(
                        path = %error.file_path,
                        stage = error.stage.as_str(),
                        error = %error.message,
                        "file failed, continuing"
                    );
                    stats.files_failed += 1;
                    stats.errors.push(error);
                }
                Err(join_error) => {
                    stats.files_failed += 1;
                    stats.errors.push(FileError {
                        file_path: String::new(),
                        stage: FileStage::Failed,
                        message: format!("worker panicked: {join_error}"),
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(AtlasError::Canceled);
        }

        stats.total_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        stats.errors.sort_by(|a, b| a.file_path.cmp(&b.file_path));

        tracing::info!(
            repo = %repo_path,
            processed = stats.files_processed,
            failed = stats.files_failed,
            chunks = stats.chunks_total,
            symbols = stats.symbols_extracted,
            elapsed_ms = stats.total_time_ms,
            "indexing complete"
        );

        Ok(stats)
    }

    /// Repository header upsert, preserving the original `indexed_at`.
    fn persist_repo_header(
        &self,
        repo_path: &str,
        repo_id: &str,
        opts: &IndexOptions,
    ) -> AtlasResult<()> {
        let now = now_millis();
        let indexed_at = self
            .store
            .get_repository(repo_id)?
            .map_or(now, |existing| existing.indexed_at);

        self.store.upsert_repository(&Repository {
            repo_id: repo_id.to_string(),
            repo_name: opts.repo_name.clone().unwrap_or_else(|| repo_id.to_string()),
            repo_path: repo_path.to_string(),
            repo_type: opts.repo_type.unwrap_or(RepoType::Monolithic),
            metadata: opts.metadata.clone(),
            indexed_at,
            last_updated: now,
        })?;

        for target in &opts.link_to_repos {
            self.store.insert_cross_repo_dependency(&CrossRepoDependency {
                source_repo_id: repo_id.to_string(),
                target_repo_id: target.clone(),
                dependency_type: "shared".into(),
                api_contracts: None,
            })?;
        }
        Ok(())
    }
}

/// Run one file through parse, chunk, summarize, embed, symbols, persist.
async fn process_file(
    ctx: Arc<FileContext>,
    file: crate::types::DiscoveredFile,
    is_new: bool,
) -> Result<FileOutcome, FileError> {
    let mut timings: Vec<(FileStage, u64)> = Vec::new();
    let fail = |stage: FileStage, message: String| FileError {
        file_path: file.relative_path.clone(),
        stage,
        message,
    };

    if ctx.cancel.is_cancelled() {
        return Err(fail(FileStage::Discovered, "canceled".into()));
    }

    let content = std::fs::read_to_string(&file.absolute_path)
        .map_err(|e| fail(FileStage::Discovered, e.to_string()))?;

    // Parse.
    let stage_start = Instant::now();
    let parse = ctx.parser.parse(&content, &file.relative_path);
    timings.push((FileStage::Parsed, elapsed_ms(stage_start)));
    if !parse.success && !parse.used_fallback {
        return Err(fail(
            FileStage::Parsed,
            parse.error.unwrap_or_else(|| "parser produced no output".into()),
        ));
    }

    let refs: ProjectRefs = ctx.layout.resolve_refs(&ctx.repo_id, &file.relative_path);

    // Chunk.
    let stage_start = Instant::now();
    let chunking = chunker::chunk(
        &file,
        &parse,
        &content,
        &ctx.repo_path,
        &refs,
        &ctx.chunker_opts,
    );
    timings.push((FileStage::Chunked, elapsed_ms(stage_start)));

    // Summarize.
    let stage_start = Instant::now();
    let summary = if ctx.rule_based_summaries {
        crate::types::FileSummary {
            text: crate::summary::rule_based_summary(&file, &parse),
            method: SummaryMethod::RuleBased,
            model: None,
            generation_time_ms: 0,
        }
    } else {
        ctx.summaries.summarize(&file, &parse, &content).await
    };
    timings.push((FileStage::Summarized, elapsed_ms(stage_start)));

    if ctx.cancel.is_cancelled() {
        return Err(fail(FileStage::Summarized, "canceled".into()));
    }

    // Embed chunks and the summary under the embedding pool bound.
    let stage_start = Instant::now();
    let mut chunks = chunking.chunks;
    let (chunks_embedded, summary_embedding) = {
        let _permit = ctx.embed_sem.acquire().await;
        let texts: Vec<String> = chunks
            .iter()
            .map(|c| Embedder::chunk_embedding_text(c, &summary.text))
            .collect();
        let vectors = ctx.embedder.embed_batch(&texts, EmbedPurpose::Chunk).await;
        let mut embedded = 0usize;
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            if !vector.is_empty() {
                embedded += 1;
            }
            chunk.embedding = vector;
        }
        let summary_embedding = ctx
            .embedder
            .embed_text(&summary.text, EmbedPurpose::Summary)
            .await;
        (embedded, summary_embedding)
    };
    timings.push((FileStage::Embedded, elapsed_ms(stage_start)));

    // Symbols: skipped on the structure-only path and for documentation
    // formats, which have no symbol table.
    let stage_start = Instant::now();
    let mut file_symbols = if chunking.structure_only || !file.language.is_code() {
        Vec::new()
    } else {
        symbols::extract(&parse, &file, &ctx.repo_path, &refs, ctx.max_symbol_def_bytes)
    };
    if !file_symbols.is_empty() {
        let _permit = ctx.embed_sem.acquire().await;
        symbols::embed_all(&mut file_symbols, &ctx.embedder).await;
    }
    timings.push((FileStage::Symbols, elapsed_ms(stage_start)));

    if ctx.cancel.is_cancelled() {
        return Err(fail(FileStage::Symbols, "canceled".into()));
    }

    // Persist. One retry on store failure, then the file is marked failed.
    let stage_start = Instant::now();
    let file_row = CodeFile {
        repo_path: ctx.repo_path.clone(),
        file_path: file.relative_path.clone(),
        summary: summary.text.clone(),
        summary_embedding,
        language: file.language,
        total_lines: file.line_count,
        imports: parse.imports.clone(),
        exports: parse.exports.clone(),
        file_hash: file.file_hash.clone(),
        last_modified: system_time_millis(file.modified_time),
        refs,
    };

    let mut persist_result = ctx.store.persist_file(&file_row, &chunks, &file_symbols);
    if let Err(first) = &persist_result {
        tracing::warn!(path = %file.relative_path, error = %first, "persist failed, retrying once");
        persist_result = ctx.store.persist_file(&file_row, &chunks, &file_symbols);
    }
    persist_result.map_err(|e| fail(FileStage::Persisted, e.to_string()))?;
    timings.push((FileStage::Persisted, elapsed_ms(stage_start)));

    tracing::debug!(
        path = %file.relative_path,
        chunks = chunks.len(),
        embedded = chunks_embedded,
        symbols = file_symbols.len(),
        "file indexed"
    );

    Ok(FileOutcome {
        is_new,
        chunks: chunks.len(),
        chunks_embedded,
        symbols: file_symbols.len(),
        summary_method: summary.method,
        timings,
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn now_millis() -> i64 {
    i64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(i64::MAX)
}

fn system_time_millis(time: std::time::SystemTime) -> i64 {
    i64::try_from(
        time.duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbeddingBackend;
    use crate::store::sqlite::SqliteStore;

    fn test_indexer(dimension: usize) -> (Indexer, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().expect("open store"));
        let mut config = Config::default();
        config.embedding.dimension = dimension;
        let embedder = Arc::new(Embedder::new(
            Arc::new(HashEmbeddingBackend::new(dimension)),
            &config.embedding,
        ));
        let summaries = Arc::new(SummaryGenerator::new(None, 100));
        let parser = Arc::new(ParserFacade::new());
        let indexer = Indexer::new(
            store.clone(),
            embedder,
            summaries,
            parser,
            Arc::new(config),
        );
        (indexer, store)
    }

    #[tokio::test]
    async fn indexes_a_small_repository() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(
            dir.path().join("a.ts"),
            "import { b } from './b';\nexport function alpha() { return b(); }\n",
        )
        .expect("write");
        std::fs::write(dir.path().join("b.ts"), "export function b() { return 1; }\n")
            .expect("write");

        let (indexer, store) = test_indexer(16);
        let cancel = CancellationToken::new();
        let stats = indexer
            .index(dir.path(), &IndexOptions::default(), &cancel)
            .await
            .expect("index");

        assert_eq!(stats.files_total, 2);
        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.files_indexed_new, 2);
        assert_eq!(stats.files_failed, 0);
        assert!(stats.chunks_total >= 2);
        assert_eq!(stats.chunks_embedded, stats.chunks_total);
        assert!(stats.symbols_extracted >= 2);
        assert_eq!(stats.summaries_fallback, 2);
        assert!(stats.per_stage_timings.contains_key("persisted"));

        let counts = store.counts().expect("counts");
        assert_eq!(counts.files, 2);
        assert!(counts.symbols >= 2);
    }

    #[tokio::test]
    async fn reindex_of_unchanged_repo_is_a_noop() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("a.ts"), "export const a = 1;\n").expect("write");

        let (indexer, store) = test_indexer(16);
        let cancel = CancellationToken::new();
        let opts = IndexOptions::default();

        indexer.index(dir.path(), &opts, &cancel).await.expect("first index");
        let repo_path = dir.path().to_string_lossy().to_string();
        let before = store.file_indexed_at(&repo_path, "a.ts").expect("ts").expect("row");
        let hashes_before = store.lookup_hashes(&repo_path).expect("hashes");

        let stats = indexer.index(dir.path(), &opts, &cancel).await.expect("second index");
        assert_eq!(stats.files_total, 1);
        assert_eq!(stats.files_processed, 0);
        assert_eq!(stats.files_indexed_new, 0);
        assert_eq!(stats.files_skipped, 1);
        assert!((stats.skip_rate - 100.0).abs() < f64::EPSILON);

        let after = store.file_indexed_at(&repo_path, "a.ts").expect("ts").expect("row");
        assert_eq!(before, after, "unchanged file must not be rewritten");
        assert_eq!(hashes_before, store.lookup_hashes(&repo_path).expect("hashes"));
    }

    #[tokio::test]
    async fn deleting_a_file_removes_its_rows() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("keep.ts"), "export const k = 1;\n").expect("write");
        std::fs::write(dir.path().join("drop.ts"), "export const d = 2;\n").expect("write");

        let (indexer, store) = test_indexer(16);
        let cancel = CancellationToken::new();
        let opts = IndexOptions::default();
        indexer.index(dir.path(), &opts, &cancel).await.expect("first index");

        std::fs::remove_file(dir.path().join("drop.ts")).expect("remove");
        let stats = indexer.index(dir.path(), &opts, &cancel).await.expect("second index");
        assert_eq!(stats.files_deleted, 1);

        let repo_path = dir.path().to_string_lossy().to_string();
        let hashes = store.lookup_hashes(&repo_path).expect("hashes");
        assert!(hashes.contains_key("keep.ts"));
        assert!(!hashes.contains_key("drop.ts"));
        assert!(store
            .chunks_for_file(&repo_path, "drop.ts")
            .expect("chunks")
            .is_empty());
    }

    #[tokio::test]
    async fn canceled_run_returns_canceled() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("a.ts"), "export const a = 1;\n").expect("write");

        let (indexer, _) = test_indexer(16);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = indexer.index(dir.path(), &IndexOptions::default(), &cancel).await;
        assert!(matches!(result, Err(AtlasError::Canceled)));
    }

    #[tokio::test]
    async fn repo_header_defaults_to_monolithic() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("a.ts"), "export const a = 1;\n").expect("write");

        let (indexer, store) = test_indexer(16);
        let cancel = CancellationToken::new();
        let opts = IndexOptions {
            repo_id: Some("fixture".into()),
            ..IndexOptions::default()
        };
        indexer.index(dir.path(), &opts, &cancel).await.expect("index");

        let repo = store.get_repository("fixture").expect("get").expect("present");
        assert_eq!(repo.repo_type, RepoType::Monolithic);
    }
}

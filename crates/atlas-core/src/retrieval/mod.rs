//! The seven-stage retrieval pipeline.
//!
//! 1. Query processing (type detection + dual embeddings, concurrent)
//! 2. File-level ANN search
//! 3. Chunk-level ANN search
//! 4. Symbol resolution
//! 5. Import graph expansion
//! 6. API enrichment
//! 7. Deduplication and context assembly
//!
//! Stages 2 and 3 abort the request on failure. Stages 4-6 degrade: their
//! failure is recorded as a `partial_results` warning and the pipeline
//! carries on with what it has.

pub mod api;
pub mod assembler;
pub mod dedup;
pub mod imports;
pub mod query;
pub mod search;
pub mod symbols;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::embedder::Embedder;
use crate::error::{AtlasError, AtlasResult};
use crate::store::{SearchFilter, Store};
use crate::types::{ImportChain, ResolvedSymbol, ResultWarning, SearchResult, SymbolScope,
    WarningKind, WarningSeverity};

pub use imports::ScopeMode;

/// Per-request retrieval options, seeded from configuration and narrowed
/// by the tool layer.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum file-level hits.
    pub max_files: usize,
    /// Maximum chunk-level hits.
    pub max_snippets: usize,
    /// File similarity floor.
    pub similarity_threshold: f32,
    /// Chunk similarity floor.
    pub chunk_similarity_threshold: f32,
    /// Near-duplicate cosine threshold.
    pub dedup_threshold: f32,
    /// Expand the import graph at all.
    pub include_imports: bool,
    /// Import expansion depth cap.
    pub import_depth: u32,
    /// Workspace boundary policy.
    pub workspace_scope: ScopeMode,
    /// Service boundary policy.
    pub service_scope: ScopeMode,
    /// Row filter, conjunctive.
    pub filter: SearchFilter,
    /// Symbol scope narrowing.
    pub symbol_scope: Option<SymbolScope>,
    /// Symbol result cap.
    pub max_usages: usize,
}

impl SearchOptions {
    /// Defaults from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_files: config.retrieval.max_files,
            max_snippets: config.retrieval.max_snippets,
            similarity_threshold: config.retrieval.similarity_threshold,
            chunk_similarity_threshold: config.retrieval.chunk_similarity_threshold,
            dedup_threshold: config.retrieval.dedup_threshold,
            include_imports: true,
            import_depth: config.retrieval.import_depth,
            workspace_scope: ScopeMode::Unrestricted,
            service_scope: ScopeMode::Unrestricted,
            filter: SearchFilter::default(),
            symbol_scope: None,
            max_usages: config.retrieval.max_usages,
        }
    }
}

/// The retrieval pipeline. Cheap to clone per request.
#[derive(Clone)]
pub struct RetrievalPipeline {
    store: Arc<dyn Store>,
    embedder: Arc<Embedder>,
    config: Arc<Config>,
}

impl RetrievalPipeline {
    /// Create a pipeline over the shared store and embedder.
    pub fn new(store: Arc<dyn Store>, embedder: Arc<Embedder>, config: Arc<Config>) -> Self {
        Self { store, embedder, config }
    }

    /// Run one query through all seven stages.
    pub async fn search(
        &self,
        query_text: &str,
        opts: &SearchOptions,
        cancel: &CancellationToken,
    ) -> AtlasResult<SearchResult> {
        let started = Instant::now();
        let mut stage_timings: serde_json::Map<String, serde_json::Value> = serde_json::Map::new();
        let mut degraded: Vec<ResultWarning> = Vec::new();

        // Stage 1: query processing. Validation errors surface before any
        // store work.
        let stage_start = Instant::now();
        let processor = query::QueryProcessor::new(&self.embedder);
        let processed = processor.process(query_text).await?;
        stage_timings.insert("query_ms".into(), elapsed(stage_start).into());

        if cancel.is_cancelled() {
            return Err(AtlasError::Canceled);
        }

        // Stages 2 + 3: vector searches. Failures abort the request.
        let retriever_opts = search::RetrieverOptions {
            max_files: opts.max_files,
            max_snippets: opts.max_snippets,
            similarity_threshold: opts.similarity_threshold,
            chunk_similarity_threshold: opts.chunk_similarity_threshold,
        };
        let stage_start = Instant::now();
        let files = search::retrieve_files(
            self.store.as_ref(),
            &processed,
            &opts.filter,
            &retriever_opts,
        )?;
        stage_timings.insert("file_search_ms".into(), elapsed(stage_start).into());

        let stage_start = Instant::now();
        let chunk_hits = search::retrieve_chunks(
            self.store.as_ref(),
            &processed,
            &opts.filter,
            &retriever_opts,
        )?;
        stage_timings.insert("chunk_search_ms".into(), elapsed(stage_start).into());

        if cancel.is_cancelled() {
            return Err(AtlasError::Canceled);
        }

        // Stage 4: symbol resolution. Degrades on failure.
        let stage_start = Instant::now();
        let resolved_symbols: Vec<ResolvedSymbol> = match symbols::resolve(
            self.store.as_ref(),
            &processed.query_text,
            opts.symbol_scope,
            opts.max_usages,
            &opts.filter,
        ) {
            Ok(symbols) => symbols,
            Err(e) => {
                degraded.push(stage_warning("symbol_resolution", &e));
                Vec::new()
            }
        };
        stage_timings.insert("symbols_ms".into(), elapsed(stage_start).into());

        // Stage 5: import expansion. Degrades on failure.
        let stage_start = Instant::now();
        let import_chains: Vec<ImportChain> = if opts.include_imports {
            match self.expand_imports(&files, &chunk_hits, opts) {
                Ok(chains) => chains,
                Err(e) => {
                    degraded.push(stage_warning("import_expansion", &e));
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        stage_timings.insert("imports_ms".into(), elapsed(stage_start).into());

        if cancel.is_cancelled() {
            return Err(AtlasError::Canceled);
        }

        // Stage 6: API enrichment. Degrades on failure.
        let stage_start = Instant::now();
        let api_context = match api::enrich(self.store.as_ref(), &files, &chunk_hits) {
            Ok(context) => context,
            Err(e) => {
                degraded.push(stage_warning("api_enrichment", &e));
                crate::types::ApiContext::default()
            }
        };
        stage_timings.insert("api_ms".into(), elapsed(stage_start).into());

        // Stage 7: deduplication + assembly.
        let stage_start = Instant::now();
        let repo_aware = {
            let mut repo_keys: BTreeSet<&str> = BTreeSet::new();
            for hit in &chunk_hits {
                repo_keys.insert(hit.chunk.refs.repo_id.as_deref().unwrap_or(""));
            }
            repo_keys.len() > 1
        };
        let deduped = dedup::dedup(chunk_hits, opts.dedup_threshold, repo_aware);
        stage_timings.insert("dedup_ms".into(), elapsed(stage_start).into());
        stage_timings.insert(
            "duplicates_removed".into(),
            deduped.duplicates_removed.into(),
        );

        let repositories = self.store.list_repositories().unwrap_or_default();
        let assembler_opts = assembler::AssemblerOptions {
            warn_context_tokens: self.config.retrieval.warn_context_tokens,
            reference_stale_days: self.config.retrieval.reference_stale_days,
        };

        stage_timings.insert("total_ms".into(), elapsed(started).into());
        let metadata = serde_json::json!({
            "stage_timings": serde_json::Value::Object(stage_timings),
            "query_type": processed.query_type,
            "enhanced_embedding": processed.enhanced_embedding.is_some(),
        });

        let mut result = assembler::assemble(
            query_text,
            &processed,
            files,
            deduped.kept,
            resolved_symbols,
            import_chains,
            api_context,
            &repositories,
            &assembler_opts,
            metadata,
        );
        for warning in degraded {
            result.warnings.push(warning);
        }

        Ok(result)
    }

    /// Expand imports per repository of the hits, seeded with every hit
    /// file at depth 0.
    fn expand_imports(
        &self,
        files: &[crate::types::FileHit],
        chunks: &[crate::types::ChunkHit],
        opts: &SearchOptions,
    ) -> AtlasResult<Vec<ImportChain>> {
        // repo_path -> (repo_id for alias lookup, seed set)
        let mut per_repo: std::collections::BTreeMap<String, (Option<String>, BTreeSet<String>)> =
            std::collections::BTreeMap::new();
        for file in files {
            let entry = per_repo
                .entry(file.repo_path.clone())
                .or_insert_with(|| (file.refs.repo_id.clone(), BTreeSet::new()));
            entry.1.insert(file.file_path.clone());
        }
        for hit in chunks {
            let entry = per_repo
                .entry(hit.chunk.repo_path.clone())
                .or_insert_with(|| (hit.chunk.refs.repo_id.clone(), BTreeSet::new()));
            entry.1.insert(hit.chunk.file_path.clone());
        }

        let expand_opts = imports::ExpandOptions {
            depth: opts.import_depth,
            workspace_scope: opts.workspace_scope,
            service_scope: opts.service_scope,
        };

        let mut chains = Vec::new();
        for (repo_path, (repo_id, seeds)) in per_repo {
            let aliases = match &repo_id {
                Some(id) => self.store.workspace_aliases(id)?,
                None => Vec::new(),
            };
            let seed_list: Vec<String> = seeds.into_iter().collect();
            chains.extend(imports::expand(
                self.store.as_ref(),
                &repo_path,
                &seed_list,
                &aliases,
                &expand_opts,
            )?);
        }
        Ok(chains)
    }
}

fn stage_warning(stage: &str, error: &AtlasError) -> ResultWarning {
    ResultWarning {
        kind: WarningKind::PartialResults,
        severity: WarningSeverity::Warning,
        message: format!("stage {stage} degraded: {error}"),
    }
}

fn elapsed(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{EmbedPurpose, HashEmbeddingBackend};
    use crate::store::sqlite::SqliteStore;
    use crate::types::{
        ChunkKind, CodeChunk, CodeFile, Language, ProjectRefs, QueryType,
    };

    async fn seeded_pipeline() -> (RetrievalPipeline, Arc<Embedder>) {
        let mut config = Config::default();
        config.embedding.dimension = 32;
        let embedder = Arc::new(Embedder::new(
            Arc::new(HashEmbeddingBackend::new(32)),
            &config.embedding,
        ));
        let store = Arc::new(SqliteStore::open_in_memory().expect("open"));

        // Index two files whose embeddings are derived from the same hash
        // backend the queries use, so similarity is meaningful.
        let summary_a = "caching layer for database results";
        let file_a = CodeFile {
            repo_path: "/repo".into(),
            file_path: "src/cache.ts".into(),
            summary: summary_a.into(),
            summary_embedding: embedder.embed_text(summary_a, EmbedPurpose::Summary).await,
            language: Language::TypeScript,
            total_lines: 30,
            imports: Vec::new(),
            exports: Vec::new(),
            file_hash: "ha".into(),
            last_modified: 0,
            refs: ProjectRefs::default(),
        };
        let chunk_content = "export function cacheResult(key, value) { return store.set(key, value); }";
        let chunk = CodeChunk {
            chunk_id: uuid::Uuid::new_v4().to_string(),
            repo_path: "/repo".into(),
            file_path: "src/cache.ts".into(),
            kind: ChunkKind::Function,
            start_line: 3,
            end_line: 8,
            content: chunk_content.into(),
            language: Language::TypeScript,
            token_count: 20,
            embedding: embedder.embed_text(chunk_content, EmbedPurpose::Chunk).await,
            metadata: serde_json::json!({ "function_name": "cacheResult" }),
            refs: ProjectRefs::default(),
        };
        store.persist_file(&file_a, &[chunk], &[]).expect("persist");

        (
            RetrievalPipeline::new(store, embedder.clone(), Arc::new(config)),
            embedder,
        )
    }

    #[tokio::test]
    async fn short_queries_fail_validation_before_work() {
        let (pipeline, _) = seeded_pipeline().await;
        let mut opts = SearchOptions::from_config(&Config::default());
        opts.filter = SearchFilter::permissive();
        let result = pipeline.search("x", &opts, &CancellationToken::new()).await;
        assert!(matches!(result, Err(AtlasError::QueryValidation { .. })));
    }

    #[tokio::test]
    async fn end_to_end_search_returns_a_result() {
        let (pipeline, _) = seeded_pipeline().await;
        let mut opts = SearchOptions::from_config(&Config::default());
        opts.filter = SearchFilter::permissive();
        // Hash-derived vectors are near-orthogonal for different texts, so
        // open the floors wide for this smoke check.
        opts.similarity_threshold = -1.0;
        opts.chunk_similarity_threshold = -1.0;

        let result = pipeline
            .search("how to cache database results", &opts, &CancellationToken::new())
            .await
            .expect("search");

        assert_eq!(result.query_type, QueryType::NaturalLanguage);
        assert_eq!(result.context.files.len(), 1);
        assert_eq!(result.context.chunks.len(), 1);
        assert!(result.context.total_tokens >= 20);
        assert_eq!(result.metadata["enhanced_embedding"], true);
    }

    #[tokio::test]
    async fn result_respects_caps() {
        let (pipeline, _) = seeded_pipeline().await;
        let mut opts = SearchOptions::from_config(&Config::default());
        opts.filter = SearchFilter::permissive();
        opts.similarity_threshold = -1.0;
        opts.chunk_similarity_threshold = -1.0;
        opts.max_files = 1;
        opts.max_snippets = 1;

        let result = pipeline
            .search("anything at all", &opts, &CancellationToken::new())
            .await
            .expect("search");
        assert!(result.context.files.len() <= 1);
        assert!(result.context.chunks.len() <= 1);
    }

    #[tokio::test]
    async fn cancellation_stops_the_pipeline() {
        let (pipeline, _) = seeded_pipeline().await;
        let opts = SearchOptions::from_config(&Config::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = pipeline.search("how to cache database results", &opts, &cancel).await;
        assert!(matches!(result, Err(AtlasError::Canceled)));
    }
}

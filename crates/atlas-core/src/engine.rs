//! Engine composition root.
//!
//! Wires the store, embedding backend, summary backend, and parser facade
//! into the indexing and retrieval pipelines according to configuration.
//! Implementations are chosen here, at composition time, and nowhere else.

use std::sync::Arc;

use crate::config::Config;
use crate::embedder::Embedder;
use crate::error::AtlasResult;
use crate::index::Indexer;
use crate::parser::ParserFacade;
use crate::retrieval::RetrievalPipeline;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;
use crate::summary::SummaryGenerator;

/// Fully wired engine: one store, one embedder, both pipelines.
#[derive(Clone)]
pub struct Engine {
    /// The indexing pipeline.
    pub indexer: Indexer,
    /// The retrieval pipeline.
    pub pipeline: RetrievalPipeline,
    /// Shared store handle.
    pub store: Arc<dyn Store>,
    /// Shared embedding facade.
    pub embedder: Arc<Embedder>,
    /// Effective configuration.
    pub config: Arc<Config>,
}

impl Engine {
    /// Build an engine from configuration: SQLite store at the configured
    /// path, HTTP embedding backend, HTTP (or rule-based) summaries.
    ///
    /// Fails fast on an unreachable store or a schema/dimension mismatch,
    /// so binaries can exit 1 before accepting work.
    pub fn from_config(config: Config) -> AtlasResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.store.db_path)?);
        store.healthcheck(config.embedding.dimension)?;

        let embedder = Arc::new(Embedder::from_config(&config.embedding)?);
        let summaries = Arc::new(SummaryGenerator::from_config(&config.summary)?);
        let parser = Arc::new(ParserFacade::new());

        let indexer = Indexer::new(
            store.clone(),
            embedder.clone(),
            summaries,
            parser,
            config.clone(),
        );
        let pipeline = RetrievalPipeline::new(store.clone(), embedder.clone(), config.clone());

        tracing::info!(
            db = %config.store.db_path.display(),
            embedder = %config.embedding.host,
            dimension = config.embedding.dimension,
            "engine initialized"
        );

        Ok(Self { indexer, pipeline, store, embedder, config })
    }

    /// Build an engine over explicit parts (tests, embedded use).
    pub fn from_parts(
        store: Arc<dyn Store>,
        embedder: Arc<Embedder>,
        summaries: Arc<SummaryGenerator>,
        parser: Arc<ParserFacade>,
        config: Arc<Config>,
    ) -> Self {
        let indexer = Indexer::new(
            store.clone(),
            embedder.clone(),
            summaries,
            parser,
            config.clone(),
        );
        let pipeline = RetrievalPipeline::new(store.clone(), embedder.clone(), config.clone());
        Self { indexer, pipeline, store, embedder, config }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbeddingBackend;

    #[test]
    fn from_config_fails_on_dimension_mismatch() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("atlas.db");
        {
            let store = SqliteStore::open(&db_path).expect("open");
            store.healthcheck(768).expect("record");
        }

        let mut config = Config::default();
        config.store.db_path = db_path;
        config.embedding.dimension = 1024;
        let result = Engine::from_config(config);
        assert!(matches!(result, Err(crate::error::AtlasError::SchemaMismatch { .. })));
    }

    #[test]
    fn from_parts_wires_the_pipelines() {
        let store: Arc<dyn Store> =
            Arc::new(SqliteStore::open_in_memory().expect("open"));
        let mut config = Config::default();
        config.embedding.dimension = 8;
        let config = Arc::new(config);
        let embedder = Arc::new(Embedder::new(
            Arc::new(HashEmbeddingBackend::new(8)),
            &config.embedding,
        ));
        let engine = Engine::from_parts(
            store,
            embedder,
            Arc::new(SummaryGenerator::new(None, 100)),
            Arc::new(ParserFacade::new()),
            config,
        );
        assert_eq!(engine.config.embedding.dimension, 8);
    }
}

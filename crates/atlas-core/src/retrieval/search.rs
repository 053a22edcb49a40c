//! File- and chunk-level vector retrieval.
//!
//! Both retrievers issue a cosine ANN query against the store. File search
//! uses the raw query vector against summary embeddings; chunk search
//! prefers the enhanced vector when the query processor produced one.
//! Filters combine as a conjunction and are applied by the store adapter.

use crate::error::{AtlasError, AtlasResult};
use crate::store::{SearchFilter, Store};
use crate::types::{ChunkHit, FileHit, QueryEmbedding};

/// Options shared by both retrievers.
#[derive(Debug, Clone)]
pub struct RetrieverOptions {
    /// Maximum file hits.
    pub max_files: usize,
    /// Maximum chunk hits.
    pub max_snippets: usize,
    /// File similarity floor.
    pub similarity_threshold: f32,
    /// Chunk similarity floor.
    pub chunk_similarity_threshold: f32,
}

/// ANN search over file summary vectors. A store failure here aborts the
/// request.
pub fn retrieve_files(
    store: &dyn Store,
    query: &QueryEmbedding,
    filter: &SearchFilter,
    opts: &RetrieverOptions,
) -> AtlasResult<Vec<FileHit>> {
    store
        .ann_files(&query.embedding, opts.max_files, opts.similarity_threshold, filter)
        .map_err(|e| AtlasError::QueryExecution {
            stage: "file_search",
            message: e.to_string(),
        })
}

/// ANN search over chunk vectors, using the enhanced embedding when
/// present. A store failure here aborts the request.
pub fn retrieve_chunks(
    store: &dyn Store,
    query: &QueryEmbedding,
    filter: &SearchFilter,
    opts: &RetrieverOptions,
) -> AtlasResult<Vec<ChunkHit>> {
    let vector = query
        .enhanced_embedding
        .as_deref()
        .unwrap_or(&query.embedding);
    store
        .ann_chunks(vector, opts.max_snippets, opts.chunk_similarity_threshold, filter)
        .map_err(|e| AtlasError::QueryExecution {
            stage: "chunk_search",
            message: e.to_string(),
        })
}

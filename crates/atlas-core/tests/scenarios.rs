//! End-to-end scenarios exercising the indexing pipeline and the
//! retrieval stages together over a real (temporary) repository and an
//! in-memory store, with the deterministic hash embedding backend.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use atlas_core::config::Config;
use atlas_core::embedder::{Embedder, HashEmbeddingBackend};
use atlas_core::error::AtlasError;
use atlas_core::index::{IndexOptions, Indexer};
use atlas_core::parser::ParserFacade;
use atlas_core::retrieval::{RetrievalPipeline, SearchOptions};
use atlas_core::store::sqlite::SqliteStore;
use atlas_core::store::{SearchFilter, Store};
use atlas_core::summary::SummaryGenerator;
use atlas_core::types::{ChunkKind, WarningKind, WarningSeverity};

const DIM: usize = 32;

fn build_engine(db_path: &Path) -> (Indexer, RetrievalPipeline, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open(db_path).expect("open store"));
    let mut config = Config::default();
    config.embedding.dimension = DIM;
    let config = Arc::new(config);
    let embedder = Arc::new(Embedder::new(
        Arc::new(HashEmbeddingBackend::new(DIM)),
        &config.embedding,
    ));
    let indexer = Indexer::new(
        store.clone(),
        embedder.clone(),
        Arc::new(SummaryGenerator::new(None, 100)),
        Arc::new(ParserFacade::new()),
        config.clone(),
    );
    let pipeline = RetrievalPipeline::new(store.clone(), embedder, config);
    (indexer, pipeline, store)
}

#[tokio::test]
async fn incremental_skip_processes_only_the_modified_file() {
    let repo = tempfile::tempdir().expect("repo dir");
    let db = tempfile::tempdir().expect("db dir");
    std::fs::write(repo.path().join("a.ts"), "export const a = 1;\n").expect("write a");
    std::fs::write(repo.path().join("b.ts"), "export const b = 2;\n").expect("write b");
    std::fs::write(repo.path().join("c.ts"), "export const c = 3;\n").expect("write c");

    let (indexer, _, store) = build_engine(&db.path().join("atlas.db"));
    let cancel = CancellationToken::new();
    let opts = IndexOptions { incremental: true, ..IndexOptions::default() };

    let first = indexer.index(repo.path(), &opts, &cancel).await.expect("first index");
    assert_eq!(first.files_total, 3);
    assert_eq!(first.files_processed, 3);

    let repo_path = repo.path().to_string_lossy().to_string();
    let a_before = store.file_indexed_at(&repo_path, "a.ts").expect("a").expect("row");
    let c_before = store.file_indexed_at(&repo_path, "c.ts").expect("c").expect("row");

    // Make the clock move so a rewrite is observable.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    std::fs::write(repo.path().join("b.ts"), "export const b = 20;\n").expect("modify b");

    let second = indexer.index(repo.path(), &opts, &cancel).await.expect("second index");
    assert_eq!(second.files_total, 3);
    assert_eq!(second.files_processed, 1);
    assert_eq!(second.files_skipped, 2);
    assert!((second.skip_rate - 200.0 / 3.0).abs() < 0.1, "skip rate {}", second.skip_rate);

    // Only b.ts was rewritten.
    assert_eq!(store.file_indexed_at(&repo_path, "a.ts").expect("a").expect("row"), a_before);
    assert_eq!(store.file_indexed_at(&repo_path, "c.ts").expect("c").expect("row"), c_before);
    let b_after = store.file_indexed_at(&repo_path, "b.ts").expect("b").expect("row");
    assert!(b_after > a_before);
}

#[tokio::test]
async fn large_file_takes_the_structure_only_path() {
    let repo = tempfile::tempdir().expect("repo dir");
    let db = tempfile::tempdir().expect("db dir");

    let mut content = String::new();
    for i in 1..=5 {
        content.push_str(&format!("import {{ m{i} }} from './m{i}';\n"));
    }
    content.push_str("export const A = 1;\n");
    content.push_str("export const B = 2;\n");
    for i in 0..5_993 {
        content.push_str(&format!("const filler{i} = {i};\n"));
    }
    assert_eq!(content.lines().count(), 6_000);
    std::fs::write(repo.path().join("big.ts"), &content).expect("write");

    let (indexer, _, store) = build_engine(&db.path().join("atlas.db"));
    let stats = indexer
        .index(repo.path(), &IndexOptions::default(), &CancellationToken::new())
        .await
        .expect("index");

    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.chunks_total, 1);
    assert_eq!(stats.symbols_extracted, 0);

    let repo_path = repo.path().to_string_lossy().to_string();
    let chunks = store.chunks_for_file(&repo_path, "big.ts").expect("chunks");
    assert_eq!(chunks.len(), 1);
    let only = &chunks[0];
    assert_eq!(only.kind, ChunkKind::StructureOnly);
    assert_eq!(only.start_line, 1);
    assert_eq!(only.end_line, 6_000);
    assert!(only.metadata["total_declarations"].as_u64().unwrap_or(0) >= 2);
    assert_eq!(only.metadata["total_imports"], 5);
    assert_eq!(only.metadata["total_exports"], 2);

    let file = store.get_file(&repo_path, "big.ts").expect("get").expect("row");
    assert_eq!(file.summary_embedding.len(), DIM);
}

#[tokio::test]
async fn cross_workspace_import_draws_an_info_warning() {
    let repo = tempfile::tempdir().expect("repo dir");
    let db = tempfile::tempdir().expect("db dir");
    let root = repo.path();

    std::fs::write(
        root.join("package.json"),
        r#"{ "name": "mono", "workspaces": ["packages/*"] }"#,
    )
    .expect("write root pkg");
    std::fs::create_dir_all(root.join("packages/a/src")).expect("mkdir a");
    std::fs::create_dir_all(root.join("packages/b/src")).expect("mkdir b");
    std::fs::write(
        root.join("packages/a/package.json"),
        r#"{ "name": "@acme/a", "dependencies": { "@acme/b": "1.0.0" } }"#,
    )
    .expect("write a pkg");
    std::fs::write(root.join("packages/b/package.json"), r#"{ "name": "@acme/b" }"#)
        .expect("write b pkg");
    std::fs::write(
        root.join("packages/a/src/index.ts"),
        "import { helper } from '@acme/b';\nexport function run() { return helper(); }\n",
    )
    .expect("write a src");
    std::fs::write(
        root.join("packages/b/src/index.ts"),
        "export function helper() { return 1; }\n",
    )
    .expect("write b src");

    let (indexer, pipeline, _) = build_engine(&db.path().join("atlas.db"));
    let opts = IndexOptions {
        repo_id: Some("mono".into()),
        detect_workspaces: true,
        ..IndexOptions::default()
    };
    indexer.index(root, &opts, &CancellationToken::new()).await.expect("index");

    let mut search_opts = SearchOptions::from_config(&Config::default());
    search_opts.filter = SearchFilter::permissive();
    search_opts.similarity_threshold = -1.0;
    search_opts.chunk_similarity_threshold = -1.0;

    let result = pipeline
        .search("run helper", &search_opts, &CancellationToken::new())
        .await
        .expect("search");

    let crossing: Vec<_> = result
        .context
        .imports
        .iter()
        .filter(|c| c.cross_workspace)
        .collect();
    assert_eq!(crossing.len(), 1, "imports: {:?}", result.context.imports);
    assert_eq!(crossing[0].file_path, "packages/b/src/index.ts");

    let warning = result
        .warnings
        .iter()
        .find(|w| w.kind == WarningKind::BoundaryCrossed)
        .expect("boundary warning");
    assert_eq!(warning.severity, WarningSeverity::Info);
}

#[tokio::test]
async fn dimension_mismatch_aborts_indexing() {
    let repo = tempfile::tempdir().expect("repo dir");
    let db = tempfile::tempdir().expect("db dir");
    std::fs::write(repo.path().join("a.ts"), "export const a = 1;\n").expect("write");

    // A previous deployment recorded 768-dimension vectors.
    let db_path = db.path().join("atlas.db");
    {
        let store = SqliteStore::open(&db_path).expect("open");
        store.healthcheck(768).expect("record dimension");
    }

    // The configuration now requests the default engine dimension.
    let (indexer, _, _) = build_engine(&db_path);
    let result = indexer
        .index(repo.path(), &IndexOptions::default(), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(AtlasError::SchemaMismatch { .. })));
}

#[tokio::test]
async fn retrieval_caps_hold_for_any_query() {
    let repo = tempfile::tempdir().expect("repo dir");
    let db = tempfile::tempdir().expect("db dir");
    for i in 0..12 {
        std::fs::write(
            repo.path().join(format!("f{i}.ts")),
            format!("export function handler{i}() {{ return {i}; }}\n"),
        )
        .expect("write");
    }

    let (indexer, pipeline, _) = build_engine(&db.path().join("atlas.db"));
    indexer
        .index(repo.path(), &IndexOptions::default(), &CancellationToken::new())
        .await
        .expect("index");

    let mut opts = SearchOptions::from_config(&Config::default());
    opts.filter = SearchFilter::permissive();
    opts.similarity_threshold = -1.0;
    opts.chunk_similarity_threshold = -1.0;
    opts.max_files = 3;
    opts.max_snippets = 5;

    let result = pipeline
        .search("handler functions", &opts, &CancellationToken::new())
        .await
        .expect("search");
    assert!(result.context.files.len() <= 3);
    assert!(result.context.chunks.len() <= 5);
}

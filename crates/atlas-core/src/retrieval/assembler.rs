//! Context assembly.
//!
//! Aggregates the stage outputs into the final result: counts tokens,
//! emits structured warnings, groups hits by workspace/service/repo, and
//! attaches stage metadata.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{
    ApiContext, ChunkHit, ContextGroup, FileHit, ImportChain, ProjectRefs, QueryEmbedding,
    Repository, ResolvedSymbol, ResultWarning, SearchContext, SearchResult, WarningKind,
    WarningSeverity,
};

/// Token surcharge per resolved symbol.
const SYMBOL_TOKENS: u64 = 50;

/// Token surcharge per import chain entry.
const IMPORT_TOKENS: u64 = 30;

/// Tunables for assembly.
#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    /// Token total above which a `context_size` warning fires.
    pub warn_context_tokens: u64,
    /// Reference repos older than this many days draw a warning.
    pub reference_stale_days: u32,
}

/// Assemble the final search result.
#[expect(clippy::too_many_arguments)]
pub fn assemble(
    query: &str,
    processed: &QueryEmbedding,
    files: Vec<FileHit>,
    chunks: Vec<ChunkHit>,
    symbols: Vec<ResolvedSymbol>,
    imports: Vec<ImportChain>,
    api: ApiContext,
    repositories: &[Repository],
    opts: &AssemblerOptions,
    metadata: serde_json::Value,
) -> SearchResult {
    let total_tokens = total_tokens(&chunks, symbols.len(), imports.len());
    let mut warnings = Vec::new();

    if total_tokens > opts.warn_context_tokens {
        warnings.push(ResultWarning {
            kind: WarningKind::ContextSize,
            severity: WarningSeverity::Warning,
            message: format!(
                "context is {total_tokens} tokens, above the {} token ceiling",
                opts.warn_context_tokens
            ),
        });
    }

    if files.is_empty() {
        warnings.push(ResultWarning {
            kind: WarningKind::PartialResults,
            severity: WarningSeverity::Warning,
            message: "no files matched the query".into(),
        });
    } else if chunks.is_empty() {
        warnings.push(ResultWarning {
            kind: WarningKind::PartialResults,
            severity: WarningSeverity::Warning,
            message: "files matched but no chunks cleared the similarity floor".into(),
        });
    }

    let crossings = imports
        .iter()
        .filter(|c| c.cross_workspace || c.cross_service)
        .count();
    if crossings > 0 {
        warnings.push(ResultWarning {
            kind: WarningKind::BoundaryCrossed,
            severity: WarningSeverity::Info,
            message: format!("{crossings} import(s) cross workspace or service boundaries"),
        });
    }

    for warning in stale_reference_warnings(&files, &chunks, repositories, opts) {
        warnings.push(warning);
    }

    let context = SearchContext {
        total_tokens,
        by_workspace: group_by(&files, &chunks, &symbols, &imports, |refs| {
            refs.workspace_id.clone()
        }),
        by_service: group_by(&files, &chunks, &symbols, &imports, |refs| {
            refs.service_id.clone()
        }),
        by_repo: group_by(&files, &chunks, &symbols, &imports, |refs| refs.repo_id.clone()),
        files,
        chunks,
        symbols,
        imports,
        api,
    };

    SearchResult {
        query: query.to_string(),
        query_type: processed.query_type,
        warnings,
        metadata,
        context,
    }
}

/// `sum(chunk tokens) + 50 per symbol + 30 per import`, exactly.
pub fn total_tokens(chunks: &[ChunkHit], symbol_count: usize, import_count: usize) -> u64 {
    let chunk_tokens: u64 = chunks.iter().map(|c| u64::from(c.chunk.token_count)).sum();
    chunk_tokens + SYMBOL_TOKENS * symbol_count as u64 + IMPORT_TOKENS * import_count as u64
}

fn stale_reference_warnings(
    files: &[FileHit],
    chunks: &[ChunkHit],
    repositories: &[Repository],
    opts: &AssemblerOptions,
) -> Vec<ResultWarning> {
    let now = i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(i64::MAX);
    let stale_before = now - i64::from(opts.reference_stale_days) * 86_400_000;

    let mut touched_repo_ids: Vec<&String> = files
        .iter()
        .filter_map(|f| f.refs.repo_id.as_ref())
        .chain(chunks.iter().filter_map(|c| c.chunk.refs.repo_id.as_ref()))
        .collect();
    touched_repo_ids.sort();
    touched_repo_ids.dedup();

    repositories
        .iter()
        .filter(|repo| touched_repo_ids.iter().any(|id| *id == &repo.repo_id))
        .filter(|repo| repo.repo_type.is_reference_material())
        .filter(|repo| repo.last_updated < stale_before)
        .map(|repo| ResultWarning {
            kind: WarningKind::OutdatedReference,
            severity: WarningSeverity::Warning,
            message: format!(
                "reference repo `{}` was last indexed more than {} days ago",
                repo.repo_id, opts.reference_stale_days
            ),
        })
        .collect()
}

/// Group files/chunks/symbols/imports under a key extracted from their
/// back-references. Imports are attributed through the group of their
/// `imported_from` file.
fn group_by<F>(
    files: &[FileHit],
    chunks: &[ChunkHit],
    symbols: &[ResolvedSymbol],
    imports: &[ImportChain],
    key_of: F,
) -> BTreeMap<String, ContextGroup>
where
    F: Fn(&ProjectRefs) -> Option<String>,
{
    let mut groups: BTreeMap<String, ContextGroup> = BTreeMap::new();
    let mut file_keys: BTreeMap<&str, String> = BTreeMap::new();

    for file in files {
        if let Some(key) = key_of(&file.refs) {
            file_keys.insert(file.file_path.as_str(), key.clone());
            groups.entry(key).or_default().files.push(file.file_path.clone());
        }
    }
    for hit in chunks {
        if let Some(key) = key_of(&hit.chunk.refs) {
            file_keys
                .entry(hit.chunk.file_path.as_str())
                .or_insert_with(|| key.clone());
            groups.entry(key).or_default().chunks.push(hit.chunk.chunk_id.clone());
        }
    }
    for resolved in symbols {
        if let Some(key) = key_of(&resolved.symbol.refs) {
            groups
                .entry(key)
                .or_default()
                .symbols
                .push(resolved.symbol.symbol_name.clone());
        }
    }
    for chain in imports {
        if let Some(key) = file_keys.get(chain.imported_from.as_str()) {
            groups
                .entry(key.clone())
                .or_default()
                .imports
                .push(chain.file_path.clone());
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ChunkKind, CodeChunk, CodeSymbol, Language, QueryType, RepoType, SymbolScope,
    };

    fn processed() -> QueryEmbedding {
        QueryEmbedding {
            query_text: "q".into(),
            query_type: QueryType::NaturalLanguage,
            embedding: vec![1.0],
            enhanced_embedding: None,
            generation_time_ms: 1,
        }
    }

    fn opts() -> AssemblerOptions {
        AssemblerOptions { warn_context_tokens: 100_000, reference_stale_days: 90 }
    }

    fn chunk_hit(tokens: u32, workspace: Option<&str>) -> ChunkHit {
        ChunkHit {
            chunk: CodeChunk {
                chunk_id: uuid::Uuid::new_v4().to_string(),
                repo_path: "/repo".into(),
                file_path: "src/a.ts".into(),
                kind: ChunkKind::Function,
                start_line: 1,
                end_line: 5,
                content: "x".into(),
                language: Language::TypeScript,
                token_count: tokens,
                embedding: Vec::new(),
                metadata: serde_json::json!({}),
                refs: ProjectRefs {
                    repo_id: Some("r1".into()),
                    workspace_id: workspace.map(String::from),
                    package_name: None,
                    service_id: None,
                },
            },
            similarity: 0.8,
            repo_type: None,
        }
    }

    fn symbol() -> ResolvedSymbol {
        ResolvedSymbol {
            symbol: CodeSymbol {
                repo_path: "/repo".into(),
                file_path: "src/a.ts".into(),
                symbol_name: "f".into(),
                symbol_type: "function".into(),
                line_number: 1,
                definition: String::new(),
                embedding: Vec::new(),
                scope: SymbolScope::Exported,
                refs: ProjectRefs::default(),
            },
            matched_token: "f".into(),
        }
    }

    fn import_chain(cross_workspace: bool) -> ImportChain {
        ImportChain {
            file_path: "src/b.ts".into(),
            imported_from: "src/a.ts".into(),
            depth: 1,
            exports: None,
            circular: false,
            truncated: false,
            truncation_reason: None,
            cross_workspace,
            cross_service: false,
        }
    }

    #[test]
    fn token_count_is_exact() {
        let chunks = vec![chunk_hit(100, None), chunk_hit(250, None)];
        assert_eq!(total_tokens(&chunks, 3, 2), 100 + 250 + 150 + 60);
    }

    #[test]
    fn boundary_crossing_emits_info_warning() {
        let result = assemble(
            "q",
            &processed(),
            vec![FileHit {
                repo_path: "/repo".into(),
                file_path: "src/a.ts".into(),
                summary: String::new(),
                language: Language::TypeScript,
                similarity: 0.9,
                repo_type: None,
                refs: ProjectRefs::default(),
            }],
            vec![chunk_hit(10, None)],
            Vec::new(),
            vec![import_chain(true)],
            ApiContext::default(),
            &[],
            &opts(),
            serde_json::json!({}),
        );

        let boundary: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::BoundaryCrossed)
            .collect();
        assert_eq!(boundary.len(), 1);
        assert_eq!(boundary[0].severity, WarningSeverity::Info);
    }

    #[test]
    fn empty_results_emit_partial_warning() {
        let result = assemble(
            "q",
            &processed(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            ApiContext::default(),
            &[],
            &opts(),
            serde_json::json!({}),
        );
        assert!(result
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::PartialResults));
    }

    #[test]
    fn oversized_context_warns() {
        let mut small = opts();
        small.warn_context_tokens = 100;
        let result = assemble(
            "q",
            &processed(),
            Vec::new(),
            vec![chunk_hit(200, None)],
            Vec::new(),
            Vec::new(),
            ApiContext::default(),
            &[],
            &small,
            serde_json::json!({}),
        );
        assert!(result.warnings.iter().any(|w| w.kind == WarningKind::ContextSize));
    }

    #[test]
    fn stale_reference_repo_warns() {
        let repo = Repository {
            repo_id: "r1".into(),
            repo_name: "ref".into(),
            repo_path: "/repo".into(),
            repo_type: RepoType::Reference,
            metadata: serde_json::Value::Null,
            indexed_at: 0,
            last_updated: 0, // 1970: definitely stale
        };
        let result = assemble(
            "q",
            &processed(),
            Vec::new(),
            vec![chunk_hit(10, None)],
            Vec::new(),
            Vec::new(),
            ApiContext::default(),
            &[repo],
            &opts(),
            serde_json::json!({}),
        );
        assert!(result
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::OutdatedReference));
    }

    #[test]
    fn groups_by_workspace() {
        let result = assemble(
            "q",
            &processed(),
            Vec::new(),
            vec![chunk_hit(10, Some("ws-a")), chunk_hit(10, Some("ws-b"))],
            vec![symbol()],
            vec![import_chain(false)],
            ApiContext::default(),
            &[],
            &opts(),
            serde_json::json!({}),
        );
        assert_eq!(result.context.by_workspace.len(), 2);
        assert!(result.context.by_workspace.contains_key("ws-a"));
        assert_eq!(result.context.by_repo.len(), 1);
        let repo_group = &result.context.by_repo["r1"];
        assert_eq!(repo_group.chunks.len(), 2);
        // The import is attributed through its importing file's group.
        assert_eq!(repo_group.imports, vec!["src/b.ts"]);
    }
}

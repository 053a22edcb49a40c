//! MCP tool definitions for CodeAtlas.
//!
//! Each tool is annotated with `#[tool]` and exposes one retrieval or
//! indexing capability to AI agents via the Model Context Protocol. Every
//! tool validates its arguments in full before touching the engine, so an
//! out-of-range field never has side effects, and returns a formatted
//! markdown result plus the raw JSON payload.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use rmcp::{
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
    ErrorData as McpError,
    ServerHandler,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use atlas_core::engine::Engine;
use atlas_core::index::IndexOptions;
use atlas_core::retrieval::{imports, ScopeMode, SearchOptions};
use atlas_core::store::{SearchFilter, Store};
use atlas_core::types::{ApiType, ChunkHit, RepoType, SymbolScope};

// -----------------------------------------------------------------------
// Shared parameter fragments
// -----------------------------------------------------------------------

/// Boundary scope settings for one dimension (workspace or service).
#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScopeParams {
    /// `strict`, `inclusive`, or `unrestricted`.
    pub mode: String,
    /// Additional cap on the expansion depth (1-5). Never raises the
    /// request's own `import_depth`.
    pub max_depth: Option<u32>,
}

impl ScopeParams {
    fn parse(&self, field: &str) -> Result<(ScopeMode, Option<u32>), McpError> {
        let mode = match self.mode.as_str() {
            "strict" => ScopeMode::Strict,
            "inclusive" => ScopeMode::Inclusive,
            "unrestricted" => ScopeMode::Unrestricted,
            other => {
                return Err(invalid(field, format!("unknown mode `{other}`")));
            }
        };
        if let Some(depth) = self.max_depth {
            if !(1..=5).contains(&depth) {
                return Err(invalid(field, "max_depth must be within 1..=5"));
            }
        }
        Ok((mode, self.max_depth))
    }
}

/// Include/exclude filter sets shared by the search tools.
#[derive(Debug, Clone, Default)]
pub struct FilterParams {
    /// Keep only these workspace ids.
    pub workspace_filter: Option<Vec<String>>,
    /// Keep only these service ids.
    pub service_filter: Option<Vec<String>>,
    /// Keep only these repo ids.
    pub repo_filter: Option<Vec<String>>,
    /// Keep only these package names.
    pub package_filter: Option<Vec<String>>,
    /// Keep only these service types.
    pub service_type_filter: Option<Vec<String>>,
    /// Drop these workspace ids.
    pub exclude_workspaces: Option<Vec<String>>,
    /// Drop these service ids.
    pub exclude_services: Option<Vec<String>>,
    /// Drop these repo ids.
    pub exclude_repos: Option<Vec<String>>,
    /// Drop these repo types.
    pub exclude_repo_types: Option<Vec<String>>,
}

impl FilterParams {
    fn build(&self, include_references: bool) -> Result<SearchFilter, McpError> {
        let mut exclude_repo_types = Vec::new();
        if let Some(types) = &self.exclude_repo_types {
            for raw in types {
                exclude_repo_types.push(parse_repo_type(raw)?);
            }
        }
        Ok(SearchFilter {
            workspace_filter: self.workspace_filter.clone().unwrap_or_default(),
            service_filter: self.service_filter.clone().unwrap_or_default(),
            repo_filter: self.repo_filter.clone().unwrap_or_default(),
            package_filter: self.package_filter.clone().unwrap_or_default(),
            service_type_filter: self.service_type_filter.clone().unwrap_or_default(),
            exclude_workspaces: self.exclude_workspaces.clone().unwrap_or_default(),
            exclude_services: self.exclude_services.clone().unwrap_or_default(),
            exclude_repos: self.exclude_repos.clone().unwrap_or_default(),
            exclude_repo_types,
            include_references,
        })
    }
}

// -----------------------------------------------------------------------
// Parameter structs for each tool
// -----------------------------------------------------------------------

/// Parameters for search_codebase.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchCodebaseParams {
    /// Natural-language or code-snippet query (at least 2 characters).
    pub query: String,
    /// Maximum file results (1-50).
    pub max_files: Option<usize>,
    /// Maximum chunk results (1-100).
    pub max_snippets: Option<usize>,
    /// Expand the import graph.
    pub include_imports: Option<bool>,
    /// Import expansion depth (1-3).
    pub import_depth: Option<u32>,
    /// Near-duplicate cosine threshold (0-1).
    pub dedup_threshold: Option<f32>,
    /// File similarity floor (0-1).
    pub similarity_threshold: Option<f32>,
    /// Chunk similarity floor (0-1).
    pub chunk_similarity_threshold: Option<f32>,
    /// Workspace boundary scope.
    pub workspace_scope: Option<ScopeParams>,
    /// Service boundary scope.
    pub service_scope: Option<ScopeParams>,
    /// Include reference and documentation repos.
    pub include_references: Option<bool>,
    /// Include documentation repos even when references are excluded.
    pub include_documentation: Option<bool>,
    /// Keep only these workspace ids.
    pub workspace_filter: Option<Vec<String>>,
    /// Keep only these service ids.
    pub service_filter: Option<Vec<String>>,
    /// Keep only these repo ids.
    pub repo_filter: Option<Vec<String>>,
    /// Keep only these package names.
    pub package_filter: Option<Vec<String>>,
    /// Keep only these service types.
    pub service_type_filter: Option<Vec<String>>,
    /// Drop these workspace ids.
    pub exclude_workspaces: Option<Vec<String>>,
    /// Drop these service ids.
    pub exclude_services: Option<Vec<String>>,
    /// Drop these repo ids.
    pub exclude_repos: Option<Vec<String>>,
    /// Drop these repo types.
    pub exclude_repo_types: Option<Vec<String>>,
}

impl SearchCodebaseParams {
    fn filter_params(&self) -> FilterParams {
        FilterParams {
            workspace_filter: self.workspace_filter.clone(),
            service_filter: self.service_filter.clone(),
            repo_filter: self.repo_filter.clone(),
            package_filter: self.package_filter.clone(),
            service_type_filter: self.service_type_filter.clone(),
            exclude_workspaces: self.exclude_workspaces.clone(),
            exclude_services: self.exclude_services.clone(),
            exclude_repos: self.exclude_repos.clone(),
            exclude_repo_types: self.exclude_repo_types.clone(),
        }
    }
}

/// Parameters for get_file_context.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetFileContextParams {
    /// File path relative to its repository root.
    pub file_path: String,
    /// Include files importing this one.
    pub include_callers: Option<bool>,
    /// Include files this one imports.
    pub include_callees: Option<bool>,
    /// Import expansion depth (1-3).
    pub import_depth: Option<u32>,
    /// Restrict to one repo id.
    pub repo_id: Option<String>,
}

/// Parameters for find_symbol_definition.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FindSymbolParams {
    /// Symbol name to resolve.
    pub symbol_name: String,
    /// Also list further definitions/usages.
    pub include_usages: Option<bool>,
    /// `all`, `exported`, or `internal`.
    pub scope_filter: Option<String>,
    /// Usage cap (1-100).
    pub max_usages: Option<usize>,
    /// Keep only these workspace ids.
    pub workspace_filter: Option<Vec<String>>,
    /// Keep only these service ids.
    pub service_filter: Option<Vec<String>>,
    /// Keep only these repo ids.
    pub repo_filter: Option<Vec<String>>,
}

/// Parameters for index_repository.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct IndexRepositoryParams {
    /// Path to the repository root on disk.
    pub repo_path: String,
    /// Skip unchanged files.
    pub incremental: Option<bool>,
    /// Language allowlist.
    pub languages: Option<Vec<String>>,
    /// Index markdown/documentation files.
    pub include_markdown: Option<bool>,
    /// Honor .gitignore files.
    pub respect_gitignore: Option<bool>,
    /// Skip files over this many lines (100-10000).
    pub max_file_size: Option<u32>,
    /// `llm` or `rule-based`.
    pub summary_method: Option<String>,
    /// Stable repository id.
    pub repo_id: Option<String>,
    /// Human-readable name.
    pub repo_name: Option<String>,
    /// Repository classification.
    pub repo_type: Option<String>,
    /// Detect monorepo workspaces.
    pub detect_workspaces: Option<bool>,
    /// Detect services.
    pub detect_services: Option<bool>,
    /// Link to other indexed repos.
    pub link_to_repos: Option<Vec<String>>,
    /// Version tag stored in metadata.
    pub version: Option<String>,
    /// Reprocess every file.
    pub force_reindex: Option<bool>,
    /// Arbitrary metadata stored on the repository header.
    pub metadata: Option<serde_json::Value>,
}

/// Parameters for delete_repository.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DeleteRepositoryParams {
    /// Repository ids to delete (at least one).
    pub repo_ids: Vec<String>,
}

/// Parameters for list_workspaces / list_services.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListScopedParams {
    /// Restrict to one repo id.
    pub repo_id: Option<String>,
}

/// Parameters for get_workspace_context / get_service_context.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetScopedContextParams {
    /// Entity id.
    pub id: Option<String>,
    /// Entity name (package or service name).
    pub name: Option<String>,
    /// Include direct dependencies.
    pub include_dependencies: Option<bool>,
    /// Include dependents.
    pub include_dependents: Option<bool>,
    /// Dependency traversal depth (1-5).
    pub dependency_depth: Option<u32>,
}

/// Parameters for find_cross_workspace_usages.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CrossWorkspaceParams {
    /// Source workspace id.
    pub workspace_id: String,
    /// Owning repo id.
    pub repo_id: Option<String>,
    /// Expansion depth (1-3).
    pub depth: Option<u32>,
}

/// Parameters for find_cross_service_calls.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CrossServiceParams {
    /// Source service id.
    pub service_id: String,
    /// Owning repo id.
    pub repo_id: Option<String>,
    /// Maximum chunks scanned (1-500).
    pub max_chunks: Option<usize>,
}

/// Parameters for search_api_contracts.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchApiContractsParams {
    /// Query matched against endpoint contracts.
    pub query: String,
    /// Keep only these api types (rest/graphql/grpc/websocket).
    pub api_types: Option<Vec<String>>,
    /// Similarity floor (0-1).
    pub similarity_threshold: Option<f32>,
    /// Restrict to one repo id.
    pub repo_id: Option<String>,
}

// -----------------------------------------------------------------------
// Validation helpers
// -----------------------------------------------------------------------

fn invalid(field: &str, message: impl Into<String>) -> McpError {
    McpError::invalid_params(format!("invalid argument `{field}`: {}", message.into()), None)
}

fn check_usize(field: &str, value: Option<usize>, min: usize, max: usize) -> Result<(), McpError> {
    if let Some(v) = value {
        if v < min || v > max {
            return Err(invalid(field, format!("must be within {min}..={max}")));
        }
    }
    Ok(())
}

fn check_u32(field: &str, value: Option<u32>, min: u32, max: u32) -> Result<(), McpError> {
    if let Some(v) = value {
        if v < min || v > max {
            return Err(invalid(field, format!("must be within {min}..={max}")));
        }
    }
    Ok(())
}

fn check_unit(field: &str, value: Option<f32>) -> Result<(), McpError> {
    if let Some(v) = value {
        if !(0.0..=1.0).contains(&v) {
            return Err(invalid(field, "must be within 0..=1"));
        }
    }
    Ok(())
}

fn parse_repo_type(raw: &str) -> Result<RepoType, McpError> {
    match raw {
        "monolithic" | "microservice" | "monorepo" | "library" | "reference" | "documentation" => {
            Ok(RepoType::from_str_lossy(raw))
        }
        other => Err(invalid("repo_type", format!("unknown repo type `{other}`"))),
    }
}

fn parse_api_type(raw: &str) -> Result<ApiType, McpError> {
    match raw {
        "rest" | "graphql" | "grpc" | "websocket" => Ok(ApiType::from_str_lossy(raw)),
        other => Err(invalid("api_types", format!("unknown api type `{other}`"))),
    }
}

/// Apply scope settings to the search options. A scope's `max_depth` is an
/// additional cap on the expansion depth: it can tighten the caller's
/// `import_depth` but never raises or replaces it.
fn apply_scopes(
    opts: &mut SearchOptions,
    workspace: Option<&ScopeParams>,
    service: Option<&ScopeParams>,
) -> Result<(), McpError> {
    if let Some(scope) = workspace {
        let (mode, depth) = scope.parse("workspace_scope")?;
        opts.workspace_scope = mode;
        if let Some(depth) = depth {
            opts.import_depth = opts.import_depth.min(depth);
        }
    }
    if let Some(scope) = service {
        let (mode, depth) = scope.parse("service_scope")?;
        opts.service_scope = mode;
        if let Some(depth) = depth {
            opts.import_depth = opts.import_depth.min(depth);
        }
    }
    Ok(())
}

fn engine_error(error: &atlas_core::AtlasError) -> McpError {
    let (headline, hint) = error.headline_and_hint();
    match hint {
        Some(hint) => McpError::internal_error(format!("{headline} ({hint})"), None),
        None => McpError::internal_error(headline, None),
    }
}

fn text_result(formatted: String, raw: &impl serde::Serialize) -> CallToolResult {
    let raw_json = serde_json::to_string(raw).unwrap_or_else(|_| "{}".into());
    CallToolResult::success(vec![Content::text(formatted), Content::text(raw_json)])
}

// -----------------------------------------------------------------------
// MCP server
// -----------------------------------------------------------------------

/// CodeAtlas MCP server: code-aware retrieval tools for AI agents.
#[derive(Clone)]
pub struct AtlasServer {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl AtlasServer {
    /// Create a server backed by the given engine.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "search_codebase",
        description = "Search indexed repositories with vector retrieval. Returns ranked files, code chunks, symbols, import chains, and API context sized for LLM consumption. Accepts natural language ('how is auth handled') or pasted code."
    )]
    async fn search_codebase(
        &self,
        params: Parameters<SearchCodebaseParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.trim().chars().count() < 2 {
            return Err(invalid("query", "must be at least 2 characters"));
        }
        check_usize("max_files", p.max_files, 1, 50)?;
        check_usize("max_snippets", p.max_snippets, 1, 100)?;
        check_u32("import_depth", p.import_depth, 1, 3)?;
        check_unit("dedup_threshold", p.dedup_threshold)?;
        check_unit("similarity_threshold", p.similarity_threshold)?;
        check_unit("chunk_similarity_threshold", p.chunk_similarity_threshold)?;

        let include_references = p.include_references.unwrap_or(false);
        let include_documentation = p.include_documentation.unwrap_or(false);
        let mut filter = p.filter_params().build(include_references || include_documentation)?;
        if include_documentation && !include_references {
            // Documentation repos are in, plain reference repos stay out.
            filter.exclude_repo_types.push(RepoType::Reference);
        }

        let mut opts = SearchOptions::from_config(&self.engine.config);
        opts.filter = filter;
        if let Some(v) = p.max_files {
            opts.max_files = v;
        }
        if let Some(v) = p.max_snippets {
            opts.max_snippets = v;
        }
        if let Some(v) = p.include_imports {
            opts.include_imports = v;
        }
        if let Some(v) = p.import_depth {
            opts.import_depth = v;
        }
        if let Some(v) = p.dedup_threshold {
            opts.dedup_threshold = v;
        }
        if let Some(v) = p.similarity_threshold {
            opts.similarity_threshold = v;
        }
        if let Some(v) = p.chunk_similarity_threshold {
            opts.chunk_similarity_threshold = v;
        }
        apply_scopes(&mut opts, p.workspace_scope.as_ref(), p.service_scope.as_ref())?;

        let result = self
            .engine
            .pipeline
            .search(&p.query, &opts, &CancellationToken::new())
            .await
            .map_err(|e| match e {
                atlas_core::AtlasError::QueryValidation { field, message } => {
                    invalid(&field, message)
                }
                other => engine_error(&other),
            })?;

        let mut out = format!(
            "## Search: {}\n\n**Query type**: {:?} -- {} file(s), {} chunk(s), {} symbol(s), {} import edge(s), {} tokens\n\n",
            result.query,
            result.query_type,
            result.context.files.len(),
            result.context.chunks.len(),
            result.context.symbols.len(),
            result.context.imports.len(),
            result.context.total_tokens,
        );
        for warning in &result.warnings {
            out.push_str(&format!("> **{:?}** ({:?}): {}\n", warning.kind, warning.severity, warning.message));
        }
        if !result.warnings.is_empty() {
            out.push('\n');
        }
        for file in &result.context.files {
            out.push_str(&format!(
                "### {} (similarity {:.3})\n{}\n\n",
                file.file_path, file.similarity, file.summary
            ));
        }
        for hit in &result.context.chunks {
            out.push_str(&format!(
                "#### {} L{}-L{} ({}, similarity {:.3})\n```{}\n{}\n```\n\n",
                hit.chunk.file_path,
                hit.chunk.start_line,
                hit.chunk.end_line,
                hit.chunk.kind.as_str(),
                hit.similarity,
                hit.chunk.language,
                hit.chunk.content,
            ));
        }
        if !result.context.imports.is_empty() {
            out.push_str("### Import chains\n");
            for chain in &result.context.imports {
                out.push_str(&format!(
                    "- {} -> {} (depth {}{}{})\n",
                    chain.imported_from,
                    chain.file_path,
                    chain.depth,
                    if chain.circular { ", circular" } else { "" },
                    if chain.cross_workspace || chain.cross_service {
                        ", crosses boundary"
                    } else {
                        ""
                    },
                ));
            }
        }

        Ok(text_result(out, &result))
    }

    #[tool(
        name = "get_file_context",
        description = "Get everything indexed about one file: summary, chunks, imports/exports, plus optional caller and callee files."
    )]
    async fn get_file_context(
        &self,
        params: Parameters<GetFileContextParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        check_u32("import_depth", p.import_depth, 1, 3)?;

        let store = &self.engine.store;
        let repositories = store.list_repositories().map_err(|e| engine_error(&e))?;

        // Locate the file across repositories (or the requested one).
        let mut located = None;
        for repo in &repositories {
            if let Some(filter_id) = &p.repo_id {
                if &repo.repo_id != filter_id {
                    continue;
                }
            }
            if let Some(file) =
                store.get_file(&repo.repo_path, &p.file_path).map_err(|e| engine_error(&e))?
            {
                located = Some((repo.clone(), file));
                break;
            }
        }
        let Some((repo, file)) = located else {
            return Ok(CallToolResult::success(vec![Content::text(format!(
                "File not found in the index: `{}`",
                p.file_path
            ))]));
        };

        let chunks =
            store.chunks_for_file(&repo.repo_path, &p.file_path).map_err(|e| engine_error(&e))?;
        let aliases = store.workspace_aliases(&repo.repo_id).map_err(|e| engine_error(&e))?;

        let depth = p.import_depth.unwrap_or(self.engine.config.retrieval.import_depth);
        let callees = if p.include_callees.unwrap_or(true) {
            imports::expand(
                store.as_ref(),
                &repo.repo_path,
                &[p.file_path.clone()],
                &aliases,
                &imports::ExpandOptions {
                    depth,
                    workspace_scope: ScopeMode::Unrestricted,
                    service_scope: ScopeMode::Unrestricted,
                },
            )
            .map_err(|e| engine_error(&e))?
        } else {
            Vec::new()
        };

        let callers = if p.include_callers.unwrap_or(false) {
            let known: HashSet<String> = store
                .list_file_paths(&repo.repo_path)
                .map_err(|e| engine_error(&e))?
                .into_iter()
                .collect();
            let mut callers = Vec::new();
            for candidate in &known {
                if candidate == &p.file_path {
                    continue;
                }
                let Some(row) =
                    store.get_file(&repo.repo_path, candidate).map_err(|e| engine_error(&e))?
                else {
                    continue;
                };
                let imports_target = row.imports.iter().any(|import| {
                    imports::resolve_import(&import.source, candidate, &aliases, &known)
                        .is_some_and(|resolved| resolved == p.file_path)
                });
                if imports_target {
                    callers.push(candidate.clone());
                }
            }
            callers.sort();
            callers
        } else {
            Vec::new()
        };

        let mut out = format!(
            "## {} ({}, {} lines)\n\n{}\n\n### Chunks ({})\n",
            file.file_path,
            file.language,
            file.total_lines,
            file.summary,
            chunks.len(),
        );
        for chunk in &chunks {
            out.push_str(&format!(
                "- {} L{}-L{} ({} tokens)\n",
                chunk.kind.as_str(),
                chunk.start_line,
                chunk.end_line,
                chunk.token_count
            ));
        }
        if !callees.is_empty() {
            out.push_str("\n### Imports (callees)\n");
            for chain in &callees {
                out.push_str(&format!("- {} (depth {})\n", chain.file_path, chain.depth));
            }
        }
        if !callers.is_empty() {
            out.push_str("\n### Imported by (callers)\n");
            for caller in &callers {
                out.push_str(&format!("- {caller}\n"));
            }
        }

        let raw = serde_json::json!({
            "file": file,
            "chunks": chunks.iter().map(|c| &c.chunk_id).collect::<Vec<_>>(),
            "callees": callees,
            "callers": callers,
        });
        Ok(text_result(out, &raw))
    }

    #[tool(
        name = "find_symbol_definition",
        description = "Resolve a symbol name (function, class, type, constant) to its definition(s), with scope filtering."
    )]
    async fn find_symbol_definition(
        &self,
        params: Parameters<FindSymbolParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.symbol_name.trim().is_empty() {
            return Err(invalid("symbol_name", "must not be empty"));
        }
        check_usize("max_usages", p.max_usages, 1, 100)?;
        let scope = match p.scope_filter.as_deref() {
            None | Some("all") => None,
            Some("exported") => Some(SymbolScope::Exported),
            Some("internal") => Some(SymbolScope::Internal),
            Some(other) => {
                return Err(invalid("scope_filter", format!("unknown scope `{other}`")));
            }
        };
        let filter = FilterParams {
            workspace_filter: p.workspace_filter.clone(),
            service_filter: p.service_filter.clone(),
            repo_filter: p.repo_filter.clone(),
            ..FilterParams::default()
        }
        .build(true)?;
        let cap = if p.include_usages.unwrap_or(true) {
            p.max_usages.unwrap_or(self.engine.config.retrieval.max_usages)
        } else {
            1
        };

        let symbols = self
            .engine
            .store
            .find_symbols(&p.symbol_name, scope, cap, &filter)
            .map_err(|e| engine_error(&e))?;

        if symbols.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(format!(
                "No symbol named `{}` in the index.",
                p.symbol_name
            ))]));
        }

        let mut out = format!("## `{}` -- {} definition(s)\n\n", p.symbol_name, symbols.len());
        for symbol in &symbols {
            out.push_str(&format!(
                "### {}:{} ({}, {})\n```\n{}\n```\n\n",
                symbol.file_path,
                symbol.line_number,
                symbol.symbol_type,
                symbol.scope.as_str(),
                symbol.definition,
            ));
        }
        Ok(text_result(out, &symbols))
    }

    #[tool(
        name = "index_repository",
        description = "Index (or incrementally re-index) a repository from disk: discovery, parsing, chunking, summaries, embeddings, symbols."
    )]
    async fn index_repository(
        &self,
        params: Parameters<IndexRepositoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        check_u32("max_file_size", p.max_file_size, 100, 10_000)?;
        if let Some(method) = &p.summary_method {
            if method != "llm" && method != "rule-based" {
                return Err(invalid("summary_method", "must be `llm` or `rule-based`"));
            }
        }
        let repo_type = p.repo_type.as_deref().map(parse_repo_type).transpose()?;
        let repo_root = std::path::PathBuf::from(&p.repo_path);
        if !repo_root.is_dir() {
            return Err(invalid("repo_path", "not a directory"));
        }

        let mut metadata = p.metadata.unwrap_or(serde_json::Value::Null);
        if let Some(version) = &p.version {
            if metadata.is_null() {
                metadata = serde_json::json!({});
            }
            if let Some(object) = metadata.as_object_mut() {
                object.insert("version".into(), serde_json::Value::String(version.clone()));
            }
        }

        let opts = IndexOptions {
            repo_id: p.repo_id,
            repo_name: p.repo_name,
            repo_type,
            metadata,
            incremental: p.incremental.unwrap_or(true),
            force_reindex: p.force_reindex.unwrap_or(false),
            detect_workspaces: p.detect_workspaces.unwrap_or(true),
            detect_services: p.detect_services.unwrap_or(true),
            link_to_repos: p.link_to_repos.unwrap_or_default(),
            languages: p.languages.unwrap_or_default(),
            include_docs: p.include_markdown,
            respect_ignore_file: p.respect_gitignore,
            max_file_lines: p.max_file_size,
            rule_based_summaries: p.summary_method.as_deref() == Some("rule-based"),
        };

        let stats = self
            .engine
            .indexer
            .index(&repo_root, &opts, &CancellationToken::new())
            .await
            .map_err(|e| engine_error(&e))?;

        let out = format!(
            "## Indexed {}\n\n\
             - Files: {} discovered, {} processed, {} new, {} skipped, {} failed, {} deleted\n\
             - Chunks: {} ({} embedded)\n\
             - Symbols: {}\n\
             - Summaries: {} llm, {} rule-based\n\
             - Skip rate: {:.1}%\n\
             - Elapsed: {} ms\n",
            p.repo_path,
            stats.files_total,
            stats.files_processed,
            stats.files_indexed_new,
            stats.files_skipped,
            stats.files_failed,
            stats.files_deleted,
            stats.chunks_total,
            stats.chunks_embedded,
            stats.symbols_extracted,
            stats.summaries_llm,
            stats.summaries_fallback,
            stats.skip_rate,
            stats.total_time_ms,
        );
        Ok(text_result(out, &stats))
    }

    #[tool(
        name = "delete_repository",
        description = "Delete one or more indexed repositories and every file, chunk, and symbol row belonging to them."
    )]
    async fn delete_repository(
        &self,
        params: Parameters<DeleteRepositoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.repo_ids.is_empty() {
            return Err(invalid("repo_ids", "must contain at least one repo id"));
        }

        let mut out = String::from("## Deleted repositories\n\n");
        let mut deleted = Vec::new();
        for repo_id in &p.repo_ids {
            let files = self
                .engine
                .store
                .delete_repository_cascade(repo_id)
                .map_err(|e| engine_error(&e))?;
            out.push_str(&format!("- `{repo_id}`: {files} file(s) removed\n"));
            deleted.push(serde_json::json!({ "repo_id": repo_id, "files_removed": files }));
        }
        Ok(text_result(out, &deleted))
    }

    #[tool(
        name = "list_indexed_repos",
        description = "List all indexed repositories with their type and last update time."
    )]
    async fn list_indexed_repos(&self) -> Result<CallToolResult, McpError> {
        let repositories = self.engine.store.list_repositories().map_err(|e| engine_error(&e))?;
        if repositories.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(
                "No repositories indexed yet. Use `index_repository` first.",
            )]));
        }
        let mut out = String::from("## Indexed repositories\n\n");
        for repo in &repositories {
            out.push_str(&format!(
                "- `{}` ({}) at {}\n",
                repo.repo_id, repo.repo_type, repo.repo_path
            ));
        }
        Ok(text_result(out, &repositories))
    }

    #[tool(name = "list_workspaces", description = "List detected monorepo workspaces.")]
    async fn list_workspaces(
        &self,
        params: Parameters<ListScopedParams>,
    ) -> Result<CallToolResult, McpError> {
        let workspaces = self
            .engine
            .store
            .list_workspaces(params.0.repo_id.as_deref())
            .map_err(|e| engine_error(&e))?;
        let mut out = String::from("## Workspaces\n\n");
        for ws in &workspaces {
            out.push_str(&format!(
                "- `{}` ({}) at {} -> depends on [{}]\n",
                ws.workspace_id,
                ws.package_name,
                ws.workspace_path,
                ws.dependencies.join(", "),
            ));
        }
        Ok(text_result(out, &workspaces))
    }

    #[tool(name = "list_services", description = "List detected services and their endpoints.")]
    async fn list_services(
        &self,
        params: Parameters<ListScopedParams>,
    ) -> Result<CallToolResult, McpError> {
        let services = self
            .engine
            .store
            .list_services(params.0.repo_id.as_deref())
            .map_err(|e| engine_error(&e))?;
        let mut out = String::from("## Services\n\n");
        for service in &services {
            out.push_str(&format!(
                "- `{}` ({}) at {} -- {} endpoint(s)\n",
                service.service_id,
                service.service_type,
                service.service_path,
                service.endpoints.len(),
            ));
        }
        Ok(text_result(out, &services))
    }

    #[tool(
        name = "get_workspace_context",
        description = "Get one workspace with its dependency neighborhood (direct dependencies and dependents, up to a depth)."
    )]
    async fn get_workspace_context(
        &self,
        params: Parameters<GetScopedContextParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        check_u32("dependency_depth", p.dependency_depth, 1, 5)?;
        if p.id.is_none() && p.name.is_none() {
            return Err(invalid("id", "one of `id` or `name` is required"));
        }

        let workspaces = self.engine.store.list_workspaces(None).map_err(|e| engine_error(&e))?;
        let target = workspaces.iter().find(|ws| {
            p.id.as_deref().is_some_and(|id| id == ws.workspace_id)
                || p.name.as_deref().is_some_and(|name| name == ws.package_name)
        });
        let Some(target) = target else {
            return Ok(CallToolResult::success(vec![Content::text(
                "Workspace not found.".to_string(),
            )]));
        };

        let depth = p.dependency_depth.unwrap_or(1);
        let dependencies = if p.include_dependencies.unwrap_or(true) {
            workspace_closure(&workspaces, &target.workspace_id, depth, false)
        } else {
            Vec::new()
        };
        let dependents = if p.include_dependents.unwrap_or(false) {
            workspace_closure(&workspaces, &target.workspace_id, depth, true)
        } else {
            Vec::new()
        };

        let out = format!(
            "## Workspace `{}` ({})\n\nPath: {}\n\nDependencies: [{}]\nDependents: [{}]\n",
            target.workspace_id,
            target.package_name,
            target.workspace_path,
            dependencies.join(", "),
            dependents.join(", "),
        );
        let raw = serde_json::json!({
            "workspace": target,
            "dependencies": dependencies,
            "dependents": dependents,
        });
        Ok(text_result(out, &raw))
    }

    #[tool(
        name = "get_service_context",
        description = "Get one service with its endpoints and cross-repo contract links."
    )]
    async fn get_service_context(
        &self,
        params: Parameters<GetScopedContextParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        check_u32("dependency_depth", p.dependency_depth, 1, 5)?;
        if p.id.is_none() && p.name.is_none() {
            return Err(invalid("id", "one of `id` or `name` is required"));
        }

        let services = self.engine.store.list_services(None).map_err(|e| engine_error(&e))?;
        let target = services.iter().find(|s| {
            p.id.as_deref().is_some_and(|id| id == s.service_id)
                || p.name.as_deref().is_some_and(|name| name == s.service_name)
        });
        let Some(target) = target else {
            return Ok(CallToolResult::success(vec![Content::text(
                "Service not found.".to_string(),
            )]));
        };

        let contracts = self
            .engine
            .store
            .cross_repo_dependencies(&target.repo_id)
            .map_err(|e| engine_error(&e))?;

        let mut out = format!(
            "## Service `{}` ({}) at {}\n\n### Endpoints ({})\n",
            target.service_id,
            target.service_type,
            target.service_path,
            target.endpoints.len(),
        );
        for endpoint in &target.endpoints {
            out.push_str(&format!(
                "- {} {} ({}){}\n",
                endpoint.method,
                endpoint.path,
                endpoint.api_type.as_str(),
                if endpoint.deprecated { " [deprecated]" } else { "" },
            ));
        }
        let raw = serde_json::json!({ "service": target, "contract_links": contracts });
        Ok(text_result(out, &raw))
    }

    #[tool(
        name = "find_cross_workspace_usages",
        description = "Find imports that cross from one workspace into others."
    )]
    async fn find_cross_workspace_usages(
        &self,
        params: Parameters<CrossWorkspaceParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        check_u32("depth", p.depth, 1, 3)?;

        let store = &self.engine.store;
        let repo_id = match p.repo_id {
            Some(id) => id,
            None => {
                let workspaces = store.list_workspaces(None).map_err(|e| engine_error(&e))?;
                match workspaces.iter().find(|ws| ws.workspace_id == p.workspace_id) {
                    Some(ws) => ws.repo_id.clone(),
                    None => {
                        return Ok(CallToolResult::success(vec![Content::text(
                            "Workspace not found.".to_string(),
                        )]))
                    }
                }
            }
        };
        let Some(repo) = store.get_repository(&repo_id).map_err(|e| engine_error(&e))? else {
            return Ok(CallToolResult::success(vec![Content::text("Repository not found.".to_string())]));
        };

        let seeds: Vec<String> = store
            .files_for_workspace(&repo_id, &p.workspace_id)
            .map_err(|e| engine_error(&e))?
            .into_iter()
            .map(|(_, file_path)| file_path)
            .collect();
        let aliases = store.workspace_aliases(&repo_id).map_err(|e| engine_error(&e))?;

        let chains = imports::expand(
            store.as_ref(),
            &repo.repo_path,
            &seeds,
            &aliases,
            &imports::ExpandOptions {
                depth: p.depth.unwrap_or(1),
                workspace_scope: ScopeMode::Unrestricted,
                service_scope: ScopeMode::Unrestricted,
            },
        )
        .map_err(|e| engine_error(&e))?;

        let crossings: Vec<_> = chains.into_iter().filter(|c| c.cross_workspace).collect();
        let mut out = format!(
            "## Cross-workspace usages from `{}` -- {} crossing(s)\n\n",
            p.workspace_id,
            crossings.len()
        );
        for chain in &crossings {
            out.push_str(&format!("- {} -> {}\n", chain.imported_from, chain.file_path));
        }
        Ok(text_result(out, &crossings))
    }

    #[tool(
        name = "find_cross_service_calls",
        description = "Scan one service's indexed chunks for calls into other services' endpoints."
    )]
    async fn find_cross_service_calls(
        &self,
        params: Parameters<CrossServiceParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        check_usize("max_chunks", p.max_chunks, 1, 500)?;

        let store = &self.engine.store;
        let repo_id = match p.repo_id {
            Some(id) => id,
            None => {
                let services = store.list_services(None).map_err(|e| engine_error(&e))?;
                match services.iter().find(|s| s.service_id == p.service_id) {
                    Some(s) => s.repo_id.clone(),
                    None => {
                        return Ok(CallToolResult::success(vec![Content::text(
                            "Service not found.".to_string(),
                        )]))
                    }
                }
            }
        };

        let chunks = store
            .chunks_for_service(&repo_id, &p.service_id, p.max_chunks.unwrap_or(200))
            .map_err(|e| engine_error(&e))?;
        let hits: Vec<ChunkHit> = chunks
            .into_iter()
            .map(|chunk| ChunkHit { chunk, similarity: 0.0, repo_type: None })
            .collect();

        let context = atlas_core::retrieval::api::enrich(store.as_ref(), &[], &hits)
            .map_err(|e| engine_error(&e))?;

        let mut out = format!(
            "## Cross-service calls from `{}` -- {} call(s)\n\n",
            p.service_id,
            context.cross_service_calls.len()
        );
        for call in &context.cross_service_calls {
            out.push_str(&format!(
                "- -> `{}`: `{}`{}\n",
                call.to_service,
                call.matched_text,
                if call.endpoint_found { "" } else { " (no registered endpoint)" },
            ));
        }
        Ok(text_result(out, &context.cross_service_calls))
    }

    #[tool(
        name = "search_api_contracts",
        description = "Search registered API endpoints by semantic similarity to a query, optionally filtered by api type."
    )]
    async fn search_api_contracts(
        &self,
        params: Parameters<SearchApiContractsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.trim().chars().count() < 2 {
            return Err(invalid("query", "must be at least 2 characters"));
        }
        check_unit("similarity_threshold", p.similarity_threshold)?;
        let api_types: Option<Vec<ApiType>> = p
            .api_types
            .as_deref()
            .map(|types| types.iter().map(|raw| parse_api_type(raw)).collect())
            .transpose()?;

        let services = self
            .engine
            .store
            .list_services(p.repo_id.as_deref())
            .map_err(|e| engine_error(&e))?;

        let query_vec = self
            .engine
            .embedder
            .embed_text(&p.query, atlas_core::embedder::EmbedPurpose::Query)
            .await;
        let threshold = p.similarity_threshold.unwrap_or(0.0);

        let mut scored = Vec::new();
        for service in &services {
            for endpoint in &service.endpoints {
                if let Some(allowed) = &api_types {
                    if !allowed.contains(&endpoint.api_type) {
                        continue;
                    }
                }
                let descriptor = format!(
                    "{} {} {} {}",
                    service.service_id,
                    endpoint.method,
                    endpoint.path,
                    endpoint.api_type.as_str()
                );
                let endpoint_vec = self
                    .engine
                    .embedder
                    .embed_text(&descriptor, atlas_core::embedder::EmbedPurpose::Query)
                    .await;
                let similarity =
                    atlas_core::embedder::cosine_similarity(&query_vec, &endpoint_vec);
                if similarity >= threshold {
                    scored.push((similarity, service.service_id.clone(), endpoint.clone()));
                }
            }
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(25);

        let mut out = format!("## API contracts matching `{}`\n\n", p.query);
        for (similarity, service_id, endpoint) in &scored {
            out.push_str(&format!(
                "- `{}` {} {} (similarity {:.3})\n",
                service_id, endpoint.method, endpoint.path, similarity
            ));
        }
        let raw: Vec<_> = scored
            .iter()
            .map(|(similarity, service_id, endpoint)| {
                serde_json::json!({
                    "service_id": service_id,
                    "endpoint": endpoint,
                    "similarity": similarity,
                })
            })
            .collect();
        Ok(text_result(out, &raw))
    }
}

/// BFS over the workspace dependency relation. `reverse` walks dependents
/// instead of dependencies.
fn workspace_closure(
    workspaces: &[atlas_core::types::Workspace],
    start: &str,
    depth: u32,
    reverse: bool,
) -> Vec<String> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<(String, u32)> = VecDeque::new();
    queue.push_back((start.to_string(), 0));
    let mut out = Vec::new();

    while let Some((current, d)) = queue.pop_front() {
        if d >= depth {
            continue;
        }
        let neighbors: Vec<String> = if reverse {
            workspaces
                .iter()
                .filter(|ws| ws.dependencies.iter().any(|dep| dep == &current))
                .map(|ws| ws.workspace_id.clone())
                .collect()
        } else {
            workspaces
                .iter()
                .find(|ws| ws.workspace_id == current)
                .map(|ws| ws.dependencies.clone())
                .unwrap_or_default()
        };
        for neighbor in neighbors {
            if neighbor != start && seen.insert(neighbor.clone()) {
                out.push(neighbor.clone());
                queue.push_back((neighbor, d + 1));
            }
        }
    }
    out
}

#[tool_handler]
impl ServerHandler for AtlasServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "CodeAtlas indexes source repositories into a vector store and answers \
                 queries with ranked code context. Use search_codebase for general queries, \
                 find_symbol_definition for exact lookups, get_file_context for one file, \
                 and index_repository to (re-)index a repo."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_validators_reject_out_of_range() {
        assert!(check_usize("max_files", Some(51), 1, 50).is_err());
        assert!(check_usize("max_files", Some(50), 1, 50).is_ok());
        assert!(check_usize("max_files", None, 1, 50).is_ok());
        assert!(check_unit("threshold", Some(1.5)).is_err());
        assert!(check_unit("threshold", Some(0.92)).is_ok());
        assert!(check_u32("import_depth", Some(4), 1, 3).is_err());
    }

    #[test]
    fn repo_type_parsing() {
        assert!(parse_repo_type("monorepo").is_ok());
        assert!(parse_repo_type("reference").is_ok());
        assert!(parse_repo_type("banana").is_err());
    }

    #[test]
    fn api_type_parsing_rejects_unknown_and_miscased_values() {
        assert_eq!(parse_api_type("rest").expect("rest"), ApiType::Rest);
        assert_eq!(parse_api_type("grpc").expect("grpc"), ApiType::Grpc);
        assert!(parse_api_type("REST").is_err());
        assert!(parse_api_type("soap").is_err());
    }

    #[test]
    fn scope_max_depth_only_tightens_import_depth() {
        let config = atlas_core::Config::default();

        // A scope depth above the caller's import_depth leaves it alone.
        let mut opts = SearchOptions::from_config(&config);
        opts.import_depth = 2;
        apply_scopes(
            &mut opts,
            Some(&ScopeParams { mode: "strict".into(), max_depth: Some(5) }),
            None,
        )
        .expect("apply");
        assert_eq!(opts.workspace_scope, ScopeMode::Strict);
        assert_eq!(opts.import_depth, 2);

        // A tighter scope depth caps it.
        let mut opts = SearchOptions::from_config(&config);
        opts.import_depth = 3;
        apply_scopes(
            &mut opts,
            Some(&ScopeParams { mode: "inclusive".into(), max_depth: Some(1) }),
            Some(&ScopeParams { mode: "unrestricted".into(), max_depth: Some(2) }),
        )
        .expect("apply");
        assert_eq!(opts.import_depth, 1);

        // No max_depth: modes apply, depth untouched.
        let mut opts = SearchOptions::from_config(&config);
        opts.import_depth = 2;
        apply_scopes(
            &mut opts,
            None,
            Some(&ScopeParams { mode: "strict".into(), max_depth: None }),
        )
        .expect("apply");
        assert_eq!(opts.service_scope, ScopeMode::Strict);
        assert_eq!(opts.import_depth, 2);

        // Invalid mode still fails before anything is applied.
        let mut opts = SearchOptions::from_config(&config);
        assert!(apply_scopes(
            &mut opts,
            Some(&ScopeParams { mode: "sideways".into(), max_depth: None }),
            None,
        )
        .is_err());
    }

    #[test]
    fn scope_params_parse_modes() {
        let scope = ScopeParams { mode: "strict".into(), max_depth: Some(2) };
        let (mode, depth) = scope.parse("workspace_scope").expect("parse");
        assert_eq!(mode, ScopeMode::Strict);
        assert_eq!(depth, Some(2));

        let bad = ScopeParams { mode: "sideways".into(), max_depth: None };
        assert!(bad.parse("workspace_scope").is_err());

        let deep = ScopeParams { mode: "strict".into(), max_depth: Some(9) };
        assert!(deep.parse("workspace_scope").is_err());
    }

    #[test]
    fn workspace_closure_walks_both_directions() {
        let ws = |id: &str, deps: &[&str]| atlas_core::types::Workspace {
            repo_id: "mono".into(),
            workspace_id: id.into(),
            package_name: format!("@acme/{id}"),
            workspace_path: format!("packages/{id}"),
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
        };
        let workspaces = vec![ws("a", &["b"]), ws("b", &["c"]), ws("c", &[])];

        assert_eq!(workspace_closure(&workspaces, "a", 1, false), vec!["b"]);
        assert_eq!(workspace_closure(&workspaces, "a", 2, false), vec!["b", "c"]);
        assert_eq!(workspace_closure(&workspaces, "c", 2, true), vec!["b", "a"]);
    }
}

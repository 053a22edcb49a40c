//! Persistent store.
//!
//! The engine consumes storage through the [`Store`] trait: typed
//! operations over the tabular schema plus approximate-nearest-neighbor
//! distance queries on the embedding columns. The shipped implementation
//! is [`SqliteStore`]; implementations are chosen at composition time.

pub mod sqlite;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::AtlasResult;
use crate::types::{
    ChunkHit, CodeChunk, CodeFile, CodeSymbol, CrossRepoDependency, FileHit, Repository,
    RepoType, Service, SymbolScope, Workspace, WorkspaceAlias,
};

/// Conjunctive row filter applied to ANN and symbol queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Keep only rows whose workspace id is in this set (when non-empty).
    pub workspace_filter: Vec<String>,
    /// Keep only rows whose service id is in this set (when non-empty).
    pub service_filter: Vec<String>,
    /// Keep only rows whose repo id is in this set (when non-empty).
    pub repo_filter: Vec<String>,
    /// Keep only rows whose package name is in this set (when non-empty).
    pub package_filter: Vec<String>,
    /// Keep only rows whose service type is in this set (when non-empty).
    pub service_type_filter: Vec<String>,
    /// Drop rows whose workspace id is in this set.
    pub exclude_workspaces: Vec<String>,
    /// Drop rows whose service id is in this set.
    pub exclude_services: Vec<String>,
    /// Drop rows whose repo id is in this set.
    pub exclude_repos: Vec<String>,
    /// Drop rows whose repo type is in this set.
    pub exclude_repo_types: Vec<RepoType>,
    /// When false, rows from `reference` and `documentation` repos are
    /// dropped.
    pub include_references: bool,
}

impl SearchFilter {
    /// A filter that keeps everything, including reference repos.
    pub fn permissive() -> Self {
        Self { include_references: true, ..Self::default() }
    }

    /// Evaluate the conjunction against one row's attributes.
    pub fn matches(
        &self,
        refs: &crate::types::ProjectRefs,
        repo_type: Option<RepoType>,
        service_type: Option<&str>,
    ) -> bool {
        fn in_set(set: &[String], value: Option<&String>) -> bool {
            match value {
                Some(v) => set.iter().any(|s| s == v),
                None => false,
            }
        }

        if !self.workspace_filter.is_empty() && !in_set(&self.workspace_filter, refs.workspace_id.as_ref()) {
            return false;
        }
        if !self.service_filter.is_empty() && !in_set(&self.service_filter, refs.service_id.as_ref()) {
            return false;
        }
        if !self.repo_filter.is_empty() && !in_set(&self.repo_filter, refs.repo_id.as_ref()) {
            return false;
        }
        if !self.package_filter.is_empty() && !in_set(&self.package_filter, refs.package_name.as_ref()) {
            return false;
        }
        if !self.service_type_filter.is_empty() {
            match service_type {
                Some(t) if self.service_type_filter.iter().any(|s| s == t) => {}
                _ => return false,
            }
        }
        if in_set(&self.exclude_workspaces, refs.workspace_id.as_ref()) {
            return false;
        }
        if in_set(&self.exclude_services, refs.service_id.as_ref()) {
            return false;
        }
        if in_set(&self.exclude_repos, refs.repo_id.as_ref()) {
            return false;
        }
        if let Some(rt) = repo_type {
            if self.exclude_repo_types.contains(&rt) {
                return false;
            }
            if !self.include_references && rt.is_reference_material() {
                return false;
            }
        }
        true
    }
}

/// Row counts for status reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreCounts {
    /// Indexed repositories.
    pub repositories: usize,
    /// Indexed files.
    pub files: usize,
    /// Indexed chunks.
    pub chunks: usize,
    /// Indexed symbols.
    pub symbols: usize,
}

/// Capability set the engine requires from persistent storage.
///
/// All methods are synchronous; callers hold the adapter's internal
/// connection lock only for the duration of one call.
pub trait Store: Send + Sync {
    /// Verify required tables exist and the stored embedding dimension
    /// matches `expected_dimension`. Fatal on mismatch.
    fn healthcheck(&self, expected_dimension: usize) -> AtlasResult<()>;

    // ---- repositories ----

    /// Insert or update a repository header.
    fn upsert_repository(&self, repo: &Repository) -> AtlasResult<()>;

    /// Load one repository header.
    fn get_repository(&self, repo_id: &str) -> AtlasResult<Option<Repository>>;

    /// List all repository headers.
    fn list_repositories(&self) -> AtlasResult<Vec<Repository>>;

    /// Delete a repository and every child row. Returns deleted file rows.
    fn delete_repository_cascade(&self, repo_id: &str) -> AtlasResult<usize>;

    // ---- workspaces / services ----

    /// Insert or update workspaces and their dependency edges.
    fn upsert_workspaces(&self, workspaces: &[Workspace]) -> AtlasResult<()>;

    /// List workspaces, optionally scoped to one repo.
    fn list_workspaces(&self, repo_id: Option<&str>) -> AtlasResult<Vec<Workspace>>;

    /// Insert or update workspace aliases.
    fn upsert_workspace_aliases(&self, aliases: &[WorkspaceAlias]) -> AtlasResult<()>;

    /// Aliases of one repo.
    fn workspace_aliases(&self, repo_id: &str) -> AtlasResult<Vec<WorkspaceAlias>>;

    /// Insert or update services.
    fn upsert_services(&self, services: &[Service]) -> AtlasResult<()>;

    /// List services, optionally scoped to one repo.
    fn list_services(&self, repo_id: Option<&str>) -> AtlasResult<Vec<Service>>;

    /// Record a cross-repo dependency edge.
    fn insert_cross_repo_dependency(&self, dep: &CrossRepoDependency) -> AtlasResult<()>;

    /// Edges touching `repo_id` in either direction.
    fn cross_repo_dependencies(&self, repo_id: &str) -> AtlasResult<Vec<CrossRepoDependency>>;

    // ---- files / chunks / symbols ----

    /// `file_path -> file_hash` for every file of a repo.
    fn lookup_hashes(&self, repo_path: &str) -> AtlasResult<HashMap<String, String>>;

    /// Atomically replace one file's rows: delete stale file/chunk/symbol
    /// rows, insert the new ones, commit.
    fn persist_file(
        &self,
        file: &CodeFile,
        chunks: &[CodeChunk],
        symbols: &[CodeSymbol],
    ) -> AtlasResult<()>;

    /// Delete one file's rows across all three tables. Returns rows removed.
    fn delete_file_cascade(&self, repo_path: &str, file_path: &str) -> AtlasResult<usize>;

    /// Load one file row.
    fn get_file(&self, repo_path: &str, file_path: &str) -> AtlasResult<Option<CodeFile>>;

    /// All file paths of a repo, sorted.
    fn list_file_paths(&self, repo_path: &str) -> AtlasResult<Vec<String>>;

    /// `indexed_at` of one file, for incremental verification.
    fn file_indexed_at(&self, repo_path: &str, file_path: &str) -> AtlasResult<Option<i64>>;

    /// Chunks of one file, in line order.
    fn chunks_for_file(&self, repo_path: &str, file_path: &str) -> AtlasResult<Vec<CodeChunk>>;

    /// `(repo_path, file_path)` of every file in a workspace.
    fn files_for_workspace(
        &self,
        repo_id: &str,
        workspace_id: &str,
    ) -> AtlasResult<Vec<(String, String)>>;

    /// Chunks belonging to one service, capped.
    fn chunks_for_service(
        &self,
        repo_id: &str,
        service_id: &str,
        limit: usize,
    ) -> AtlasResult<Vec<CodeChunk>>;

    // ---- vector + symbol queries ----

    /// ANN over file summary vectors, cosine metric. Results are sorted by
    /// similarity descending with `file_path` ascending as the tie-break,
    /// capped at `limit`, floored at `min_similarity`.
    fn ann_files(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
        filter: &SearchFilter,
    ) -> AtlasResult<Vec<FileHit>>;

    /// ANN over chunk vectors, cosine metric. Tie-break: `file_path`, then
    /// `start_line` ascending.
    fn ann_chunks(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
        filter: &SearchFilter,
    ) -> AtlasResult<Vec<ChunkHit>>;

    /// Exact-name symbol lookup with optional scope filter.
    fn find_symbols(
        &self,
        name: &str,
        scope: Option<SymbolScope>,
        limit: usize,
        filter: &SearchFilter,
    ) -> AtlasResult<Vec<CodeSymbol>>;

    // ---- status ----

    /// Row counts for status output.
    fn counts(&self) -> AtlasResult<StoreCounts>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProjectRefs;

    fn refs(workspace: Option<&str>, service: Option<&str>, repo: Option<&str>) -> ProjectRefs {
        ProjectRefs {
            repo_id: repo.map(String::from),
            workspace_id: workspace.map(String::from),
            package_name: None,
            service_id: service.map(String::from),
        }
    }

    #[test]
    fn include_sets_are_conjunctive() {
        let filter = SearchFilter {
            workspace_filter: vec!["ws-a".into()],
            repo_filter: vec!["r1".into()],
            include_references: true,
            ..Default::default()
        };
        assert!(filter.matches(&refs(Some("ws-a"), None, Some("r1")), None, None));
        assert!(!filter.matches(&refs(Some("ws-b"), None, Some("r1")), None, None));
        assert!(!filter.matches(&refs(Some("ws-a"), None, Some("r2")), None, None));
        assert!(!filter.matches(&refs(None, None, Some("r1")), None, None));
    }

    #[test]
    fn reference_repos_excluded_by_default() {
        let filter = SearchFilter::default();
        assert!(!filter.matches(&refs(None, None, None), Some(RepoType::Reference), None));
        assert!(!filter.matches(&refs(None, None, None), Some(RepoType::Documentation), None));
        assert!(filter.matches(&refs(None, None, None), Some(RepoType::Monolithic), None));
        assert!(filter.matches(&refs(None, None, None), None, None));

        let permissive = SearchFilter::permissive();
        assert!(permissive.matches(&refs(None, None, None), Some(RepoType::Reference), None));
    }

    #[test]
    fn exclude_sets_drop_rows() {
        let filter = SearchFilter {
            exclude_repos: vec!["bad".into()],
            exclude_repo_types: vec![RepoType::Library],
            include_references: true,
            ..Default::default()
        };
        assert!(!filter.matches(&refs(None, None, Some("bad")), None, None));
        assert!(!filter.matches(&refs(None, None, Some("ok")), Some(RepoType::Library), None));
        assert!(filter.matches(&refs(None, None, Some("ok")), Some(RepoType::Monorepo), None));
    }
}

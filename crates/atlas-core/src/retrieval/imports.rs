//! Import graph expansion.
//!
//! BFS over the file-imports-file relation starting from the retrieved
//! files. Nodes live in a petgraph arena keyed by integer index; a visited
//! set plus an explicit work queue drive the traversal, so cycles are
//! detected as re-visits and marked rather than re-expanded. Edges stop at
//! the depth cap, at external dependencies, and at workspace/service
//! boundaries when the scope is strict.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::AtlasResult;
use crate::store::Store;
use crate::types::{CodeFile, ImportChain, TruncationReason, WorkspaceAlias};

/// How boundary crossings are treated during expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    /// Crossing edges are truncated with `boundary_crossed`.
    Strict,
    /// Crossing edges are included and flagged, but not expanded further.
    Inclusive,
    /// Boundaries are ignored; crossings are flagged and expanded.
    #[default]
    Unrestricted,
}

/// Options for one expansion.
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    /// BFS depth cap.
    pub depth: u32,
    /// Workspace boundary policy.
    pub workspace_scope: ScopeMode,
    /// Service boundary policy.
    pub service_scope: ScopeMode,
}

/// Extensions tried when resolving an extensionless specifier.
const RESOLUTION_SUFFIXES: &[&str] = &[
    "", ".ts", ".tsx", ".js", ".jsx", ".mjs", ".py", ".rs", ".go", "/index.ts", "/index.js",
    "/src/index.ts", "/src/index.js",
];

/// Expand the import graph from `seeds` (depth 0). Emits one
/// [`ImportChain`] per traversed edge.
pub fn expand(
    store: &dyn Store,
    repo_path: &str,
    seeds: &[String],
    aliases: &[WorkspaceAlias],
    opts: &ExpandOptions,
) -> AtlasResult<Vec<ImportChain>> {
    let known_files: HashSet<String> = store.list_file_paths(repo_path)?.into_iter().collect();

    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut node_of: HashMap<String, NodeIndex> = HashMap::new();
    let mut file_cache: HashMap<NodeIndex, Option<CodeFile>> = HashMap::new();
    let mut visited: HashMap<NodeIndex, u32> = HashMap::new();
    let mut queue: VecDeque<(NodeIndex, u32)> = VecDeque::new();
    let mut chains: Vec<ImportChain> = Vec::new();

    let mut intern = |graph: &mut DiGraph<String, ()>, path: &str| -> NodeIndex {
        *node_of
            .entry(path.to_string())
            .or_insert_with(|| graph.add_node(path.to_string()))
    };

    for seed in seeds {
        let idx = intern(&mut graph, seed);
        if visited.insert(idx, 0).is_none() {
            queue.push_back((idx, 0));
        }
    }

    while let Some((source_idx, depth)) = queue.pop_front() {
        if depth >= opts.depth {
            continue;
        }
        let source_path = graph[source_idx].clone();
        let source_file = load_file(store, repo_path, source_idx, &source_path, &mut file_cache);
        let Some(source_file) = source_file else { continue };
        let source_refs = source_file.refs.clone();
        let imports = source_file.imports.clone();

        for import in &imports {
            let next_depth = depth + 1;
            match resolve_specifier(&import.source, &source_path, aliases, &known_files) {
                Resolution::External => {
                    chains.push(ImportChain {
                        file_path: import.source.clone(),
                        imported_from: source_path.clone(),
                        depth: next_depth,
                        exports: None,
                        circular: false,
                        truncated: true,
                        truncation_reason: Some(TruncationReason::ExternalDependency),
                        cross_workspace: false,
                        cross_service: false,
                    });
                }
                Resolution::Internal(target_path) => {
                    let target_idx = intern(&mut graph, &target_path);
                    graph.update_edge(source_idx, target_idx, ());

                    let target_file =
                        load_file(store, repo_path, target_idx, &target_path, &mut file_cache);
                    let target_refs = target_file
                        .as_ref()
                        .map(|f| f.refs.clone())
                        .unwrap_or_default();

                    let crosses_workspace = crosses(&source_refs.workspace_id, &target_refs.workspace_id);
                    let crosses_service = crosses(&source_refs.service_id, &target_refs.service_id);

                    let workspace_blocked =
                        crosses_workspace && opts.workspace_scope == ScopeMode::Strict;
                    let service_blocked =
                        crosses_service && opts.service_scope == ScopeMode::Strict;
                    if workspace_blocked || service_blocked {
                        // Strict scope: the edge is reported truncated and
                        // the crossing flags stay clear, so strict results
                        // never carry a crossing.
                        chains.push(ImportChain {
                            file_path: target_path,
                            imported_from: source_path.clone(),
                            depth: next_depth,
                            exports: None,
                            circular: false,
                            truncated: true,
                            truncation_reason: Some(TruncationReason::BoundaryCrossed),
                            cross_workspace: false,
                            cross_service: false,
                        });
                        continue;
                    }

                    if visited.contains_key(&target_idx) {
                        chains.push(ImportChain {
                            file_path: target_path,
                            imported_from: source_path.clone(),
                            depth: next_depth,
                            exports: None,
                            circular: true,
                            truncated: false,
                            truncation_reason: None,
                            cross_workspace: crosses_workspace,
                            cross_service: crosses_service,
                        });
                        continue;
                    }
                    visited.insert(target_idx, next_depth);

                    let at_depth_cap = next_depth >= opts.depth;
                    let hold_at_boundary = (crosses_workspace
                        && opts.workspace_scope == ScopeMode::Inclusive)
                        || (crosses_service && opts.service_scope == ScopeMode::Inclusive);

                    chains.push(ImportChain {
                        file_path: target_path,
                        imported_from: source_path.clone(),
                        depth: next_depth,
                        exports: target_file.as_ref().map(|f| f.exports.clone()),
                        circular: false,
                        truncated: at_depth_cap,
                        truncation_reason: at_depth_cap.then_some(TruncationReason::DepthLimit),
                        cross_workspace: crosses_workspace,
                        cross_service: crosses_service,
                    });

                    if !at_depth_cap && !hold_at_boundary {
                        queue.push_back((target_idx, next_depth));
                    }
                }
            }
        }
    }

    Ok(chains)
}

enum Resolution {
    Internal(String),
    External,
}

/// Resolve one import specifier the way the expander does. `None` for
/// external dependencies.
pub fn resolve_import(
    specifier: &str,
    from: &str,
    aliases: &[WorkspaceAlias],
    known_files: &HashSet<String>,
) -> Option<String> {
    match resolve_specifier(specifier, from, aliases, known_files) {
        Resolution::Internal(path) => Some(path),
        Resolution::External => None,
    }
}

/// Resolve a specifier to an indexed file: workspace aliases first, then
/// relative resolution, else external.
fn resolve_specifier(
    specifier: &str,
    from: &str,
    aliases: &[WorkspaceAlias],
    known_files: &HashSet<String>,
) -> Resolution {
    for alias in aliases {
        let pattern = alias.alias_pattern.trim_end_matches("/*");
        let base = if specifier == pattern {
            Some(alias.resolved_path.trim_end_matches('/').to_string())
        } else {
            specifier.strip_prefix(&format!("{pattern}/")).map(|rest| {
                format!("{}/{rest}", alias.resolved_path.trim_end_matches('/'))
            })
        };
        if let Some(base) = base {
            if let Some(found) = try_suffixes(&base, known_files) {
                return Resolution::Internal(found);
            }
        }
    }

    if specifier.starts_with("./") || specifier.starts_with("../") {
        let base = resolve_relative(from, specifier);
        if let Some(found) = try_suffixes(&base, known_files) {
            return Resolution::Internal(found);
        }
    }

    Resolution::External
}

fn try_suffixes(base: &str, known_files: &HashSet<String>) -> Option<String> {
    for suffix in RESOLUTION_SUFFIXES {
        let candidate = format!("{base}{suffix}");
        if known_files.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Join a relative specifier onto the directory of `from`, folding `.`
/// and `..` segments.
fn resolve_relative(from: &str, specifier: &str) -> String {
    let mut parts: Vec<&str> = from.split('/').collect();
    parts.pop(); // the importing file itself
    for segment in specifier.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn crosses(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x != y)
}

fn load_file<'a>(
    store: &dyn Store,
    repo_path: &str,
    idx: NodeIndex,
    path: &str,
    cache: &'a mut HashMap<NodeIndex, Option<CodeFile>>,
) -> Option<CodeFile> {
    if let Some(cached) = cache.get(&idx) {
        return cached.clone();
    }
    let loaded = store.get_file(repo_path, path).ok().flatten();
    cache.insert(idx, loaded.clone());
    loaded
}

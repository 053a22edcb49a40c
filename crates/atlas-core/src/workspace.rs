//! Monorepo workspace and microservice detection.
//!
//! Reads the repository's manifests at indexing time and produces the
//! workspace, alias, and service rows the store persists before file
//! processing begins. Per-file back-references are resolved by longest
//! path prefix.

use std::path::Path;

use serde_json::Value;

use crate::types::{ProjectRefs, Service, Workspace, WorkspaceAlias};

/// Everything detected about a repository's project layout.
#[derive(Debug, Clone, Default)]
pub struct ProjectLayout {
    /// Detected workspaces.
    pub workspaces: Vec<Workspace>,
    /// Detected path aliases.
    pub aliases: Vec<WorkspaceAlias>,
    /// Detected services.
    pub services: Vec<Service>,
}

impl ProjectLayout {
    /// Resolve the back-references for a file by longest matching
    /// workspace/service path prefix.
    pub fn resolve_refs(&self, repo_id: &str, relative_path: &str) -> ProjectRefs {
        let mut refs = ProjectRefs {
            repo_id: Some(repo_id.to_string()),
            ..ProjectRefs::default()
        };

        let mut best_ws_len = 0usize;
        for ws in &self.workspaces {
            let prefix = format!("{}/", ws.workspace_path.trim_end_matches('/'));
            if relative_path.starts_with(&prefix) && prefix.len() > best_ws_len {
                best_ws_len = prefix.len();
                refs.workspace_id = Some(ws.workspace_id.clone());
                refs.package_name = Some(ws.package_name.clone());
            }
        }

        let mut best_svc_len = 0usize;
        for svc in &self.services {
            let prefix = format!("{}/", svc.service_path.trim_end_matches('/'));
            if relative_path.starts_with(&prefix) && prefix.len() > best_svc_len {
                best_svc_len = prefix.len();
                refs.service_id = Some(svc.service_id.clone());
            }
        }

        refs
    }
}

/// Detect workspaces and services under `repo_root`.
pub fn detect(
    repo_root: &Path,
    repo_id: &str,
    detect_workspaces: bool,
    detect_services: bool,
) -> ProjectLayout {
    let mut layout = ProjectLayout::default();

    if detect_workspaces {
        detect_package_workspaces(repo_root, repo_id, &mut layout);
    }
    if detect_services {
        detect_service_dirs(repo_root, repo_id, &mut layout);
    }

    tracing::debug!(
        repo_id,
        workspaces = layout.workspaces.len(),
        services = layout.services.len(),
        "project layout detected"
    );
    layout
}

/// npm/yarn/pnpm-style workspaces declared in the root package.json.
fn detect_package_workspaces(repo_root: &Path, repo_id: &str, layout: &mut ProjectLayout) {
    let Some(root_pkg) = read_json(&repo_root.join("package.json")) else {
        return;
    };

    let patterns: Vec<String> = match root_pkg.get("workspaces") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        Some(Value::Object(obj)) => obj
            .get("packages")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    let mut package_names: Vec<(String, String)> = Vec::new();

    for pattern in &patterns {
        // `packages/*` style patterns: enumerate the parent directory.
        let parent = pattern.trim_end_matches("/*").trim_end_matches('*');
        let parent_dir = repo_root.join(parent);
        let entries = match std::fs::read_dir(&parent_dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(pkg) = read_json(&path.join("package.json")) else {
                continue;
            };
            let dir_name = entry.file_name().to_string_lossy().to_string();
            let package_name = pkg
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(&dir_name)
                .to_string();
            let workspace_path = format!("{}/{}", parent.trim_end_matches('/'), dir_name);

            let deps: Vec<String> = ["dependencies", "devDependencies"]
                .iter()
                .filter_map(|key| pkg.get(*key).and_then(Value::as_object))
                .flat_map(|map| map.keys().cloned())
                .collect();

            package_names.push((package_name.clone(), dir_name.clone()));
            layout.workspaces.push(Workspace {
                repo_id: repo_id.to_string(),
                workspace_id: dir_name,
                package_name: package_name.clone(),
                workspace_path: workspace_path.clone(),
                dependencies: deps, // narrowed to sibling workspaces below
            });
            layout.aliases.push(WorkspaceAlias {
                repo_id: repo_id.to_string(),
                workspace_id: layout.workspaces[layout.workspaces.len() - 1].workspace_id.clone(),
                alias_type: "package_name".into(),
                alias_pattern: package_name,
                resolved_path: workspace_path,
            });
        }
    }

    // Keep only dependencies that name sibling workspaces, mapped to their
    // workspace ids.
    for ws in &mut layout.workspaces {
        ws.dependencies = ws
            .dependencies
            .iter()
            .filter_map(|dep| {
                package_names
                    .iter()
                    .find(|(name, _)| name == dep)
                    .map(|(_, id)| id.clone())
            })
            .filter(|id| id != &ws.workspace_id)
            .collect();
    }

    // tsconfig path aliases at the repo root.
    if let Some(tsconfig) = read_json(&repo_root.join("tsconfig.json")) {
        if let Some(paths) = tsconfig
            .pointer("/compilerOptions/paths")
            .and_then(Value::as_object)
        {
            for (pattern, targets) in paths {
                let Some(target) = targets.as_array().and_then(|a| a.first()).and_then(Value::as_str)
                else {
                    continue;
                };
                let resolved = target.trim_start_matches("./").trim_end_matches("/*").to_string();
                let owner = layout
                    .workspaces
                    .iter()
                    .find(|ws| resolved.starts_with(&ws.workspace_path))
                    .map(|ws| ws.workspace_id.clone())
                    .unwrap_or_default();
                layout.aliases.push(WorkspaceAlias {
                    repo_id: repo_id.to_string(),
                    workspace_id: owner,
                    alias_type: "tsconfig_path".into(),
                    alias_pattern: pattern.clone(),
                    resolved_path: resolved,
                });
            }
        }
    }
}

/// Conventional service directories: children of `services/` or `apps/`
/// carrying a manifest.
fn detect_service_dirs(repo_root: &Path, repo_id: &str, layout: &mut ProjectLayout) {
    for parent in ["services", "apps"] {
        let parent_dir = repo_root.join(parent);
        let entries = match std::fs::read_dir(&parent_dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let has_manifest = ["package.json", "go.mod", "Cargo.toml", "Dockerfile", "pyproject.toml"]
                .iter()
                .any(|m| path.join(m).exists());
            if !has_manifest {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().to_string();
            layout.services.push(Service {
                repo_id: repo_id.to_string(),
                service_id: dir_name.clone(),
                service_name: dir_name.clone(),
                service_type: "api".into(),
                service_path: format!("{parent}/{dir_name}"),
                endpoints: Vec::new(),
            });
        }
    }
    layout.services.sort_by(|a, b| a.service_id.cmp(&b.service_id));
}

fn read_json(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_workspaces_and_dependencies() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path();
        std::fs::write(
            root.join("package.json"),
            r#"{ "name": "mono", "workspaces": ["packages/*"] }"#,
        )
        .expect("write");
        std::fs::create_dir_all(root.join("packages/ws-a")).expect("mkdir");
        std::fs::create_dir_all(root.join("packages/ws-b")).expect("mkdir");
        std::fs::write(
            root.join("packages/ws-a/package.json"),
            r#"{ "name": "@acme/a", "dependencies": { "@acme/b": "1.0.0", "lodash": "4.0.0" } }"#,
        )
        .expect("write");
        std::fs::write(
            root.join("packages/ws-b/package.json"),
            r#"{ "name": "@acme/b" }"#,
        )
        .expect("write");

        let layout = detect(root, "mono", true, false);
        assert_eq!(layout.workspaces.len(), 2);
        let a = layout
            .workspaces
            .iter()
            .find(|w| w.workspace_id == "ws-a")
            .expect("ws-a");
        assert_eq!(a.package_name, "@acme/a");
        assert_eq!(a.dependencies, vec!["ws-b"]);
        assert!(layout
            .aliases
            .iter()
            .any(|al| al.alias_pattern == "@acme/a" && al.resolved_path == "packages/ws-a"));
    }

    #[test]
    fn detects_services() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("services/billing")).expect("mkdir");
        std::fs::write(root.join("services/billing/package.json"), "{}").expect("write");
        std::fs::create_dir_all(root.join("services/notes")).expect("mkdir");
        // No manifest: not a service.

        let layout = detect(root, "r", false, true);
        assert_eq!(layout.services.len(), 1);
        assert_eq!(layout.services[0].service_id, "billing");
        assert_eq!(layout.services[0].service_path, "services/billing");
    }

    #[test]
    fn resolves_refs_by_prefix() {
        let layout = ProjectLayout {
            workspaces: vec![Workspace {
                repo_id: "mono".into(),
                workspace_id: "ws-a".into(),
                package_name: "@acme/a".into(),
                workspace_path: "packages/a".into(),
                dependencies: Vec::new(),
            }],
            aliases: Vec::new(),
            services: vec![Service {
                repo_id: "mono".into(),
                service_id: "billing".into(),
                service_name: "billing".into(),
                service_type: "api".into(),
                service_path: "services/billing".into(),
                endpoints: Vec::new(),
            }],
        };

        let refs = layout.resolve_refs("mono", "packages/a/src/index.ts");
        assert_eq!(refs.workspace_id.as_deref(), Some("ws-a"));
        assert_eq!(refs.package_name.as_deref(), Some("@acme/a"));
        assert!(refs.service_id.is_none());

        let refs = layout.resolve_refs("mono", "services/billing/src/main.ts");
        assert_eq!(refs.service_id.as_deref(), Some("billing"));
        assert!(refs.workspace_id.is_none());

        let refs = layout.resolve_refs("mono", "README.md");
        assert_eq!(refs.repo_id.as_deref(), Some("mono"));
        assert!(refs.workspace_id.is_none());
    }
}

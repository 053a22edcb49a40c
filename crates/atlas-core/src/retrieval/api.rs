//! API contract enrichment.
//!
//! Collects the services touched by the retrieved files and chunks, loads
//! their endpoint registries, and scans chunk contents for cross-service
//! call shapes (HTTP client idioms and URL literals). Calls that match a
//! registered endpoint carry it; unmatched calls are reported with
//! `endpoint_found = false`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::AtlasResult;
use crate::store::Store;
use crate::types::{ApiContext, ApiEndpoint, ChunkHit, CrossServiceCall, FileHit, Service};

/// Compile a pattern known valid at authoring time.
#[expect(clippy::expect_used)]
fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

static URL_CALL: LazyLock<Regex> =
    LazyLock::new(|| re(r#"https?://([\w.-]+)(?::\d+)?(/[\w/{}.:-]*)"#));

static HTTP_CLIENT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?:fetch|axios\.(?:get|post|put|patch|delete)|http\.(?:get|post))\(\s*['"`]([^'"`]+)['"`]"#)
});

static RPC_CALL: LazyLock<Regex> = LazyLock::new(|| re(r"(\w+)Client\.(\w+)\("));

/// Enrich a result set with API context for its touched services.
pub fn enrich(
    store: &dyn Store,
    files: &[FileHit],
    chunks: &[ChunkHit],
) -> AtlasResult<ApiContext> {
    let mut context = ApiContext::default();

    // Services referenced by the hits, keyed (repo_id, service_id).
    let mut touched: BTreeSet<(String, String)> = BTreeSet::new();
    for file in files {
        if let (Some(repo), Some(service)) = (&file.refs.repo_id, &file.refs.service_id) {
            touched.insert((repo.clone(), service.clone()));
        }
    }
    for hit in chunks {
        if let (Some(repo), Some(service)) = (&hit.chunk.refs.repo_id, &hit.chunk.refs.service_id)
        {
            touched.insert((repo.clone(), service.clone()));
        }
    }

    let mut repo_ids: BTreeSet<String> = BTreeSet::new();
    let mut all_services: Vec<Service> = Vec::new();
    for (repo_id, _) in &touched {
        if repo_ids.insert(repo_id.clone()) {
            all_services.extend(store.list_services(Some(repo_id))?);
        }
    }

    for service in &all_services {
        let key = (service.repo_id.clone(), service.service_id.clone());
        if touched.contains(&key) {
            if service.endpoints.is_empty() {
                context
                    .api_warnings
                    .push(format!("service `{}` has no registered endpoints", service.service_id));
            }
            context
                .apis_by_service
                .insert(service.service_id.clone(), service.endpoints.clone());
            context.endpoints.extend(service.endpoints.clone());
        }
    }

    // Scan chunk contents for cross-service call shapes against every
    // service of the touched repos, not only the touched ones: a call
    // into an untouched service is exactly the interesting case.
    for hit in chunks {
        let own_service = hit.chunk.refs.service_id.as_deref();
        let mut matched_paths: Vec<String> = Vec::new();

        for (path, matched_text) in detect_call_paths(&hit.chunk.content) {
            let target = all_services.iter().find_map(|service| {
                if Some(service.service_id.as_str()) == own_service {
                    return None;
                }
                service
                    .endpoints
                    .iter()
                    .find(|e| endpoint_matches(&e.path, &path))
                    .map(|e| (service.service_id.clone(), e.clone()))
            });

            match target {
                Some((service_id, endpoint)) => {
                    matched_paths.push(endpoint.path.clone());
                    context.cross_service_calls.push(CrossServiceCall {
                        chunk_id: hit.chunk.chunk_id.clone(),
                        from_service: own_service.map(String::from),
                        to_service: service_id,
                        matched_text,
                        endpoint_found: true,
                        endpoint: Some(endpoint),
                    });
                }
                None => {
                    // A call shape with no registry match is still worth
                    // surfacing; the target is the best guess from the
                    // path itself.
                    let to_service = path
                        .trim_start_matches('/')
                        .split('/')
                        .next()
                        .unwrap_or("unknown")
                        .to_string();
                    context.api_warnings.push(format!(
                        "call `{matched_text}` in chunk {} matches no registered endpoint",
                        hit.chunk.chunk_id
                    ));
                    context.cross_service_calls.push(CrossServiceCall {
                        chunk_id: hit.chunk.chunk_id.clone(),
                        from_service: own_service.map(String::from),
                        to_service,
                        matched_text,
                        endpoint_found: false,
                        endpoint: None,
                    });
                }
            }
        }

        if !matched_paths.is_empty() {
            context
                .endpoints_by_chunk
                .insert(hit.chunk.chunk_id.clone(), matched_paths);
        }
    }

    // Contract edges between the touched repositories.
    let mut seen_edges: BTreeSet<(String, String)> = BTreeSet::new();
    for repo_id in &repo_ids {
        for dep in store.cross_repo_dependencies(repo_id)? {
            let key = (dep.source_repo_id.clone(), dep.target_repo_id.clone());
            if dep.api_contracts.is_some() && seen_edges.insert(key) {
                context.contract_links.push(dep);
            }
        }
    }

    Ok(context)
}

/// Call-shaped paths found in chunk content, with the matched text.
fn detect_call_paths(content: &str) -> Vec<(String, String)> {
    let mut found: Vec<(String, String)> = Vec::new();
    let mut seen: BTreeMap<String, ()> = BTreeMap::new();

    for capture in URL_CALL.captures_iter(content) {
        let path = capture[2].to_string();
        let text = capture[0].to_string();
        if seen.insert(text.clone(), ()).is_none() {
            found.push((path, text));
        }
    }
    for capture in HTTP_CLIENT_CALL.captures_iter(content) {
        let raw = capture[1].to_string();
        // Skip full URLs here; the URL pattern above already saw them.
        if raw.starts_with("http://") || raw.starts_with("https://") {
            continue;
        }
        let path = if raw.starts_with('/') { raw.clone() } else { format!("/{raw}") };
        let text = capture[0].to_string();
        if seen.insert(text.clone(), ()).is_none() {
            found.push((path, text));
        }
    }
    for capture in RPC_CALL.captures_iter(content) {
        let path = format!("/{}/{}", capture[1].to_lowercase(), &capture[2]);
        let text = capture[0].to_string();
        if seen.insert(text.clone(), ()).is_none() {
            found.push((path, text));
        }
    }
    found
}

/// Route-template-aware path match: `{param}` and `:param` segments match
/// any concrete segment.
fn endpoint_matches(template: &str, path: &str) -> bool {
    let template_segments: Vec<&str> =
        template.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> =
        path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    if template_segments.len() != path_segments.len() {
        return false;
    }
    template_segments.iter().zip(&path_segments).all(|(t, p)| {
        t == p || t.starts_with('{') || t.starts_with(':')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;
    use crate::types::{ApiType, ChunkKind, CodeChunk, Language, ProjectRefs};

    fn chunk_with(content: &str, service: Option<&str>) -> ChunkHit {
        ChunkHit {
            chunk: CodeChunk {
                chunk_id: uuid::Uuid::new_v4().to_string(),
                repo_path: "/repo".into(),
                file_path: "src/call.ts".into(),
                kind: ChunkKind::Function,
                start_line: 1,
                end_line: 10,
                content: content.into(),
                language: Language::TypeScript,
                token_count: 10,
                embedding: Vec::new(),
                metadata: serde_json::json!({}),
                refs: ProjectRefs {
                    repo_id: Some("r1".into()),
                    workspace_id: None,
                    package_name: None,
                    service_id: service.map(String::from),
                },
            },
            similarity: 0.9,
            repo_type: None,
        }
    }

    fn seed_services(store: &SqliteStore) {
        store
            .upsert_services(&[
                Service {
                    repo_id: "r1".into(),
                    service_id: "billing".into(),
                    service_name: "billing".into(),
                    service_type: "api".into(),
                    service_path: "services/billing".into(),
                    endpoints: vec![ApiEndpoint {
                        method: "GET".into(),
                        path: "/invoices/{id}".into(),
                        api_type: ApiType::Rest,
                        request_schema: None,
                        response_schema: None,
                        implementation: None,
                        deprecated: false,
                    }],
                },
                Service {
                    repo_id: "r1".into(),
                    service_id: "web".into(),
                    service_name: "web".into(),
                    service_type: "gateway".into(),
                    service_path: "services/web".into(),
                    endpoints: Vec::new(),
                },
            ])
            .expect("services");
    }

    #[test]
    fn detects_registered_cross_service_call() {
        let store = SqliteStore::open_in_memory().expect("open");
        seed_services(&store);

        let hit = chunk_with(
            "const invoice = await fetch('/invoices/42').then(r => r.json());",
            Some("web"),
        );
        let context = enrich(&store, &[], &[hit]).expect("enrich");

        assert_eq!(context.cross_service_calls.len(), 1);
        let call = &context.cross_service_calls[0];
        assert!(call.endpoint_found);
        assert_eq!(call.to_service, "billing");
        assert_eq!(call.from_service.as_deref(), Some("web"));
        assert_eq!(call.endpoint.as_ref().map(|e| e.path.as_str()), Some("/invoices/{id}"));
        assert_eq!(context.endpoints_by_chunk.len(), 1);
    }

    #[test]
    fn unmatched_call_is_reported_without_endpoint() {
        let store = SqliteStore::open_in_memory().expect("open");
        seed_services(&store);

        let hit = chunk_with("await fetch('/ledger/close');", Some("web"));
        let context = enrich(&store, &[], &[hit]).expect("enrich");

        assert_eq!(context.cross_service_calls.len(), 1);
        assert!(!context.cross_service_calls[0].endpoint_found);
        assert_eq!(context.cross_service_calls[0].to_service, "ledger");
        assert!(!context.api_warnings.is_empty());
    }

    #[test]
    fn loads_endpoints_for_touched_services() {
        let store = SqliteStore::open_in_memory().expect("open");
        seed_services(&store);

        let hit = chunk_with("export function render() {}", Some("billing"));
        let context = enrich(&store, &[], &[hit]).expect("enrich");
        assert_eq!(context.endpoints.len(), 1);
        assert!(context.apis_by_service.contains_key("billing"));
    }

    #[test]
    fn endpoint_template_matching() {
        assert!(endpoint_matches("/invoices/{id}", "/invoices/42"));
        assert!(endpoint_matches("/users/:id/orders", "/users/7/orders"));
        assert!(!endpoint_matches("/invoices/{id}", "/invoices"));
        assert!(!endpoint_matches("/invoices", "/orders"));
    }

    #[test]
    fn detect_call_paths_finds_urls_and_client_idioms() {
        let content = r#"
            await fetch('/invoices/1');
            axios.get("https://billing.internal:8443/invoices/2");
            const r = billingClient.getInvoice(id);
        "#;
        let paths = detect_call_paths(content);
        assert!(paths.iter().any(|(p, _)| p == "/invoices/1"));
        assert!(paths.iter().any(|(p, _)| p == "/invoices/2"));
        assert!(paths.iter().any(|(p, _)| p == "/billing/getInvoice"));
    }
}

//! Symbol resolution against the symbol table.
//!
//! Tokenizes the query into identifier-like words and resolves each
//! against the store's symbol table, deduplicating and capping the
//! result.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::AtlasResult;
use crate::store::{SearchFilter, Store};
use crate::types::{ResolvedSymbol, SymbolScope};

/// Compile a pattern known valid at authoring time.
#[expect(clippy::expect_used)]
fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| re(r"[A-Za-z_][A-Za-z0-9_]{2,}"));

/// Words that look like identifiers but never name symbols worth looking
/// up.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "where", "what", "how", "when", "why", "are", "does", "defined",
    "find", "show", "all", "from", "into", "this", "that", "function", "class", "method", "const",
    "return", "import", "export", "async", "await",
];

/// Resolve identifier-like query tokens against the symbol table.
pub fn resolve(
    store: &dyn Store,
    query: &str,
    scope: Option<SymbolScope>,
    max_usages: usize,
    filter: &SearchFilter,
) -> AtlasResult<Vec<ResolvedSymbol>> {
    let mut resolved = Vec::new();
    let mut seen: HashSet<(String, String, u32)> = HashSet::new();

    for token in tokenize(query) {
        if resolved.len() >= max_usages {
            break;
        }
        let remaining = max_usages - resolved.len();
        let symbols = store.find_symbols(&token, scope, remaining, filter)?;
        for symbol in symbols {
            let key = (
                symbol.file_path.clone(),
                symbol.symbol_name.clone(),
                symbol.line_number,
            );
            if seen.insert(key) {
                resolved.push(ResolvedSymbol { symbol, matched_token: token.clone() });
            }
        }
    }

    Ok(resolved)
}

/// Identifier-like tokens of the query, stopwords removed, order kept,
/// duplicates dropped.
pub fn tokenize(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    IDENTIFIER
        .find_iter(query)
        .map(|m| m.as_str().to_string())
        .filter(|t| !STOPWORDS.contains(&t.to_lowercase().as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;
    use crate::types::{CodeFile, CodeSymbol, Language, ProjectRefs};

    fn seed_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("open");
        let file = CodeFile {
            repo_path: "/repo".into(),
            file_path: "src/auth.ts".into(),
            summary: String::new(),
            summary_embedding: Vec::new(),
            language: Language::TypeScript,
            total_lines: 20,
            imports: Vec::new(),
            exports: Vec::new(),
            file_hash: "h".into(),
            last_modified: 0,
            refs: ProjectRefs::default(),
        };
        let symbol = |name: &str, line: u32, scope: SymbolScope| CodeSymbol {
            repo_path: "/repo".into(),
            file_path: "src/auth.ts".into(),
            symbol_name: name.into(),
            symbol_type: "function".into(),
            line_number: line,
            definition: format!("function {name}() {{}}"),
            embedding: Vec::new(),
            scope,
            refs: ProjectRefs::default(),
        };
        store
            .persist_file(
                &file,
                &[],
                &[
                    symbol("validateToken", 3, SymbolScope::Exported),
                    symbol("hashPassword", 9, SymbolScope::Internal),
                ],
            )
            .expect("persist");
        store
    }

    #[test]
    fn tokenize_drops_stopwords_and_short_words() {
        let tokens = tokenize("where is validateToken defined in the auth module?");
        assert!(tokens.contains(&"validateToken".to_string()));
        assert!(tokens.contains(&"auth".to_string()));
        assert!(!tokens.iter().any(|t| t == "where" || t == "the" || t == "is"));
    }

    #[test]
    fn resolves_identifiers_against_the_table() {
        let store = seed_store();
        let resolved = resolve(
            &store,
            "where is validateToken defined?",
            None,
            50,
            &SearchFilter::permissive(),
        )
        .expect("resolve");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].symbol.symbol_name, "validateToken");
        assert_eq!(resolved[0].matched_token, "validateToken");
    }

    #[test]
    fn scope_filter_is_applied() {
        let store = seed_store();
        let resolved = resolve(
            &store,
            "hashPassword",
            Some(SymbolScope::Exported),
            50,
            &SearchFilter::permissive(),
        )
        .expect("resolve");
        assert!(resolved.is_empty());
    }

    #[test]
    fn results_are_capped() {
        let store = SqliteStore::open_in_memory().expect("open");
        let file = CodeFile {
            repo_path: "/repo".into(),
            file_path: "src/many.ts".into(),
            summary: String::new(),
            summary_embedding: Vec::new(),
            language: Language::TypeScript,
            total_lines: 500,
            imports: Vec::new(),
            exports: Vec::new(),
            file_hash: "h".into(),
            last_modified: 0,
            refs: ProjectRefs::default(),
        };
        let symbols: Vec<CodeSymbol> = (0..20)
            .map(|i| CodeSymbol {
                repo_path: "/repo".into(),
                file_path: "src/many.ts".into(),
                symbol_name: "handler".into(),
                symbol_type: "function".into(),
                line_number: i + 1,
                definition: "function handler() {}".into(),
                embedding: Vec::new(),
                scope: SymbolScope::Internal,
                refs: ProjectRefs::default(),
            })
            .collect();
        store.persist_file(&file, &[], &symbols).expect("persist");

        let resolved =
            resolve(&store, "handler", None, 5, &SearchFilter::permissive()).expect("resolve");
        assert_eq!(resolved.len(), 5);
    }
}

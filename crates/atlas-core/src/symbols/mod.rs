//! Symbol definition extraction.
//!
//! Walks the structural nodes of a parsed file and emits one named symbol
//! per function, method, class, interface, type, variable, and constant.
//! A symbol is `exported` when its name appears in any export record or
//! its node is flagged public. Each symbol carries its own embedding,
//! generated through the embedding facade under the `symbol` purpose.

use crate::embedder::{EmbedPurpose, Embedder};
use crate::types::{
    CodeSymbol, DiscoveredFile, NodeKind, ParseResult, ParsedNode, ProjectRefs, SymbolScope,
};

/// Extract symbols from one parsed file. Embeddings are filled in by
/// [`embed_all`].
pub fn extract(
    parse: &ParseResult,
    file: &DiscoveredFile,
    repo_path: &str,
    refs: &ProjectRefs,
    max_def_bytes: usize,
) -> Vec<CodeSymbol> {
    let mut symbols = Vec::new();
    for node in &parse.nodes {
        collect(node, parse, file, repo_path, refs, max_def_bytes, &mut symbols);
    }
    symbols
}

fn collect(
    node: &ParsedNode,
    parse: &ParseResult,
    file: &DiscoveredFile,
    repo_path: &str,
    refs: &ProjectRefs,
    max_def_bytes: usize,
    out: &mut Vec<CodeSymbol>,
) {
    if !node.name.is_empty() && is_symbol_kind(node.kind) {
        let scope = if node.is_public || is_exported(&node.name, parse) {
            SymbolScope::Exported
        } else {
            SymbolScope::Internal
        };
        out.push(CodeSymbol {
            repo_path: repo_path.to_string(),
            file_path: file.relative_path.clone(),
            symbol_name: node.name.clone(),
            symbol_type: node.kind.as_str().to_string(),
            line_number: node.start_line.clamp(1, file.line_count.max(1)),
            definition: truncate_bytes(&node.text, max_def_bytes),
            embedding: Vec::new(),
            scope,
            refs: refs.clone(),
        });
    }
    for child in &node.children {
        collect(child, parse, file, repo_path, refs, max_def_bytes, out);
    }
}

/// Generate embeddings for a batch of symbols in place. Failed embeddings
/// stay empty and are skipped by symbol search.
pub async fn embed_all(symbols: &mut [CodeSymbol], embedder: &Embedder) -> usize {
    if symbols.is_empty() {
        return 0;
    }
    let texts: Vec<String> = symbols
        .iter()
        .map(|s| format!("{} {}\n{}", s.symbol_type, s.symbol_name, s.definition))
        .collect();
    let vectors = embedder.embed_batch(&texts, EmbedPurpose::Symbol).await;

    let mut embedded = 0;
    for (symbol, vector) in symbols.iter_mut().zip(vectors) {
        if !vector.is_empty() {
            embedded += 1;
        }
        symbol.embedding = vector;
    }
    embedded
}

fn is_symbol_kind(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Function
            | NodeKind::Method
            | NodeKind::Class
            | NodeKind::Interface
            | NodeKind::TypeAlias
            | NodeKind::Enum
            | NodeKind::Variable
            | NodeKind::Constant
    )
}

fn is_exported(name: &str, parse: &ParseResult) -> bool {
    parse.exports.iter().any(|e| e.symbols.iter().any(|s| s == name))
}

/// Truncate at a char boundary at or below `max_bytes`.
fn truncate_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::fallback;
    use crate::types::Language;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn discovered(path: &str, content: &str, language: Language) -> DiscoveredFile {
        DiscoveredFile {
            absolute_path: path.into(),
            relative_path: path.to_string(),
            file_hash: "0".repeat(64),
            language,
            line_count: crate::discover::count_lines(content),
            size_bytes: content.len() as u64,
            modified_time: SystemTime::UNIX_EPOCH,
            encoding: "utf-8",
        }
    }

    #[test]
    fn extracts_symbols_with_scopes() {
        let content = "export function visible() { return 1; }\n\
                       function hidden() { return 2; }\n\
                       export const LIMIT = 10;\n";
        let file = discovered("src/lib.ts", content, Language::TypeScript);
        let parse = fallback::extract(content, Language::TypeScript);
        let symbols = extract(&parse, &file, "/repo", &ProjectRefs::default(), 1_200);

        let visible = symbols.iter().find(|s| s.symbol_name == "visible").expect("visible");
        assert_eq!(visible.scope, SymbolScope::Exported);
        assert_eq!(visible.symbol_type, "function");
        assert_eq!(visible.line_number, 1);

        let hidden = symbols.iter().find(|s| s.symbol_name == "hidden").expect("hidden");
        assert_eq!(hidden.scope, SymbolScope::Internal);

        let limit = symbols.iter().find(|s| s.symbol_name == "LIMIT").expect("LIMIT");
        assert_eq!(limit.scope, SymbolScope::Exported);
    }

    #[test]
    fn definitions_are_truncated() {
        let body: String = "x".repeat(5_000);
        let content = format!("export function big() {{ {body} }}\n");
        let file = discovered("src/big.ts", &content, Language::TypeScript);
        let parse = fallback::extract(&content, Language::TypeScript);
        let symbols = extract(&parse, &file, "/repo", &ProjectRefs::default(), 100);
        assert!(symbols[0].definition.len() <= 100);
    }

    #[tokio::test]
    async fn symbols_receive_embeddings() {
        let content = "export function f() {}\nexport function g() {}\n";
        let file = discovered("src/fg.ts", content, Language::TypeScript);
        let parse = fallback::extract(content, Language::TypeScript);
        let mut symbols = extract(&parse, &file, "/repo", &ProjectRefs::default(), 1_200);

        let config = crate::config::EmbeddingConfig { dimension: 16, ..Default::default() };
        let embedder = Embedder::new(
            Arc::new(crate::embedder::HashEmbeddingBackend::new(16)),
            &config,
        );
        let embedded = embed_all(&mut symbols, &embedder).await;
        assert_eq!(embedded, symbols.len());
        assert!(symbols.iter().all(|s| s.embedding.len() == 16));
    }
}

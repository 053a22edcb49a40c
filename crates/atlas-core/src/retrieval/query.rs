//! Query processing: type detection, preprocessing, and dual embeddings.
//!
//! Classifies a query as pasted code or natural language using keyword,
//! operator, and structural-character signals, then produces a raw
//! embedding and, when the concept map yields an appendix, a second
//! code-enhanced embedding. Both are cached under distinct purposes, and
//! when both are needed they are computed concurrently.

use std::time::Instant;

use crate::embedder::{EmbedPurpose, Embedder};
use crate::error::{AtlasError, AtlasResult};
use crate::types::{QueryEmbedding, QueryType};

/// Closed keyword set for code detection.
const CODE_KEYWORDS: &[&str] = &[
    "function", "const", "class", "import", "export", "return", "async", "await", "def", "fn",
    "let", "var", "pub", "struct", "interface", "impl", "enum", "void", "static", "public",
    "private",
];

/// Closed operator set for code detection.
const CODE_OPERATORS: &[&str] = &["=>", "===", "!==", "++", "--", "&&", "||", "::"];

/// Structural characters whose density marks code.
const STRUCTURAL_CHARS: &[char] = &['{', '}', '(', ')', '[', ']', '=', '<', '>'];

/// Concept-to-keywords map for query enhancement. Deterministic: the
/// appendix for a given query never changes.
const CONCEPT_KEYWORDS: &[(&str, &[&str])] = &[
    ("cache", &["cache", "memoize", "TTL", "invalidation"]),
    ("caching", &["cache", "memoize", "TTL", "invalidation"]),
    ("auth", &["authentication", "login", "token", "session"]),
    ("login", &["authentication", "login", "token", "session"]),
    ("database", &["database", "query", "SQL", "connection"]),
    ("db", &["database", "query", "SQL", "connection"]),
    ("api", &["endpoint", "route", "handler", "REST"]),
    ("endpoint", &["endpoint", "route", "handler", "REST"]),
    ("error", &["error", "exception", "retry", "handling"]),
    ("retry", &["error", "exception", "retry", "backoff"]),
    ("test", &["test", "assertion", "mock", "fixture"]),
    ("config", &["configuration", "settings", "environment"]),
    ("queue", &["queue", "worker", "job", "scheduler"]),
    ("search", &["search", "index", "ranking", "query"]),
    ("upload", &["upload", "multipart", "stream", "file"]),
    ("websocket", &["websocket", "socket", "realtime", "connection"]),
    ("migration", &["migration", "schema", "database", "version"]),
    ("validation", &["validation", "schema", "sanitize", "input"]),
];

/// Produces classified, embedded queries.
pub struct QueryProcessor<'a> {
    embedder: &'a Embedder,
}

impl<'a> QueryProcessor<'a> {
    /// Create a processor over the shared embedder.
    pub fn new(embedder: &'a Embedder) -> Self {
        Self { embedder }
    }

    /// Process one query into its embeddings.
    ///
    /// Returns `QueryValidation` for queries under two characters, before
    /// any embedding work.
    pub async fn process(&self, query: &str) -> AtlasResult<QueryEmbedding> {
        let started = Instant::now();

        let collapsed = collapse_whitespace(query.trim());
        if collapsed.chars().count() < 2 {
            return Err(AtlasError::QueryValidation {
                field: "query".into(),
                message: "must be at least 2 characters".into(),
            });
        }

        let query_type = classify(&collapsed);
        let preprocessed = match query_type {
            QueryType::NaturalLanguage => {
                collapsed.trim_end_matches(['.', '!', '?']).trim_end().to_string()
            }
            QueryType::CodeSnippet => collapsed,
        };

        let appendix = enhancement_appendix(&preprocessed);
        let enhanced_text = appendix
            .as_ref()
            .map(|a| format!("{preprocessed}\n{a}"));

        let (embedding, enhanced_embedding) = match &enhanced_text {
            Some(enhanced) => {
                let (raw, enhanced) = tokio::join!(
                    self.embedder.embed_text(&preprocessed, EmbedPurpose::Query),
                    self.embedder.embed_text(enhanced, EmbedPurpose::QueryEnhanced),
                );
                (raw, Some(enhanced).filter(|v| !v.is_empty()))
            }
            None => {
                let raw = self.embedder.embed_text(&preprocessed, EmbedPurpose::Query).await;
                (raw, None)
            }
        };

        if embedding.is_empty() {
            return Err(AtlasError::QueryExecution {
                stage: "query_embedding",
                message: "embedding backend returned no vector".into(),
            });
        }

        Ok(QueryEmbedding {
            query_text: preprocessed,
            query_type,
            embedding,
            enhanced_embedding,
            generation_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

/// Classify a preprocessed query.
pub fn classify(query: &str) -> QueryType {
    let lower = query.to_lowercase();

    let keyword_count = lower
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| CODE_KEYWORDS.contains(token))
        .count();

    let operator_count: usize = CODE_OPERATORS
        .iter()
        .map(|op| lower.matches(op).count())
        .sum();

    let structural = query.chars().filter(|c| STRUCTURAL_CHARS.contains(c)).count();
    #[expect(clippy::cast_precision_loss)]
    let density = if query.is_empty() {
        0.0
    } else {
        structural as f64 / query.chars().count() as f64
    };

    // Everything that doesn't read as code is treated as natural
    // language, question mark or not.
    if keyword_count >= 2 || operator_count >= 1 || density > 0.1 {
        QueryType::CodeSnippet
    } else {
        QueryType::NaturalLanguage
    }
}

/// Deterministic "Code context" appendix derived from the concept map.
/// `None` when no concept matches.
pub fn enhancement_appendix(query: &str) -> Option<String> {
    let lower = query.to_lowercase();
    let mut keywords: Vec<&str> = Vec::new();
    for (concept, expansion) in CONCEPT_KEYWORDS {
        if lower.contains(concept) {
            for kw in *expansion {
                if !keywords.contains(kw) {
                    keywords.push(kw);
                }
            }
        }
    }
    if keywords.is_empty() {
        None
    } else {
        Some(format!("Code context: {}", keywords.join(", ")))
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbeddingBackend;
    use std::sync::Arc;

    fn test_embedder() -> Embedder {
        let config = crate::config::EmbeddingConfig { dimension: 16, ..Default::default() };
        Embedder::new(Arc::new(HashEmbeddingBackend::new(16)), &config)
    }

    #[test]
    fn classifies_code_snippets() {
        assert_eq!(classify("function foo() { return 1; }"), QueryType::CodeSnippet);
        assert_eq!(classify("a && b"), QueryType::CodeSnippet);
        assert_eq!(classify("items.map(x => x.id)"), QueryType::CodeSnippet);
        assert_eq!(classify("const x = 1; const y = 2"), QueryType::CodeSnippet);
    }

    #[test]
    fn classifies_natural_language() {
        assert_eq!(
            classify("where is user authentication defined?"),
            QueryType::NaturalLanguage
        );
        assert_eq!(classify("how to cache database results"), QueryType::NaturalLanguage);
        assert_eq!(classify("payment processing"), QueryType::NaturalLanguage);
    }

    #[test]
    fn appendix_is_deterministic_and_concept_driven() {
        let a = enhancement_appendix("how to cache database results").expect("appendix");
        let b = enhancement_appendix("how to cache database results").expect("appendix");
        assert_eq!(a, b);
        assert!(a.starts_with("Code context:"));
        assert!(a.contains("cache") || a.contains("memoize") || a.contains("TTL"));
        assert!(a.contains("SQL"));

        assert!(enhancement_appendix("completely unrelated words").is_none());
    }

    #[tokio::test]
    async fn process_produces_both_embeddings_for_concept_queries() {
        let embedder = test_embedder();
        let processor = QueryProcessor::new(&embedder);
        let result = processor.process("how to cache database results").await.expect("process");

        assert_eq!(result.query_type, QueryType::NaturalLanguage);
        assert_eq!(result.embedding.len(), 16);
        let enhanced = result.enhanced_embedding.expect("enhanced");
        assert_eq!(enhanced.len(), 16);
        assert_ne!(enhanced, result.embedding);
    }

    #[tokio::test]
    async fn process_strips_trailing_punctuation_for_nl() {
        let embedder = test_embedder();
        let processor = QueryProcessor::new(&embedder);
        let result = processor.process("  where is   auth defined?  ").await.expect("process");
        assert_eq!(result.query_text, "where is auth defined");
    }

    #[tokio::test]
    async fn process_rejects_short_queries() {
        let embedder = test_embedder();
        let processor = QueryProcessor::new(&embedder);
        let result = processor.process(" x ").await;
        assert!(matches!(result, Err(AtlasError::QueryValidation { .. })));
    }

    #[tokio::test]
    async fn repeated_queries_hit_the_cache_bit_identically() {
        let embedder = test_embedder();
        let processor = QueryProcessor::new(&embedder);
        let first = processor.process("how to cache database results").await.expect("first");
        let second = processor.process("how to cache database results").await.expect("second");
        assert_eq!(first.embedding, second.embedding);
        assert_eq!(first.enhanced_embedding, second.enhanced_embedding);
    }
}

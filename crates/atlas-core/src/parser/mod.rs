//! Language parser facade.
//!
//! Per-language structural parsers are external collaborators implementing
//! the [`FileParser`] trait; they are registered at composition time and
//! never selected per request. When no parser is registered for a language,
//! or a registered parser refuses a file, the regex fallback extractor
//! recovers function signatures, class headers, and import/export lines
//! from common languages.

pub mod fallback;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::types::{Language, ParseResult};

/// A per-language structural parser.
///
/// Implementations must be cheap to call repeatedly and must not retain
/// references to the content.
pub trait FileParser: Send + Sync {
    /// The language this parser handles.
    fn language(&self) -> Language;

    /// Parse `content`, returning structural nodes, imports, and exports.
    ///
    /// A parser signals refusal by returning a result with
    /// `success == false`; the facade then runs the fallback.
    fn parse(&self, content: &str, path: &Path) -> ParseResult;
}

/// Dispatches to registered parsers with a regex fallback.
#[derive(Default)]
pub struct ParserFacade {
    parsers: HashMap<Language, Arc<dyn FileParser>>,
}

impl ParserFacade {
    /// Create a facade with no registered structural parsers. Everything
    /// goes through the fallback extractor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a structural parser. Replaces any previous parser for the
    /// same language.
    pub fn register(&mut self, parser: Arc<dyn FileParser>) {
        self.parsers.insert(parser.language(), parser);
    }

    /// Parse a file's content, dispatching by the path's extension.
    ///
    /// `used_fallback` is set whenever the structural parser refused or
    /// none was registered; `success` is set whenever either path produced
    /// usable output.
    pub fn parse(&self, content: &str, relative_path: &str) -> ParseResult {
        let path = Path::new(relative_path);
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let language = Language::from_extension(ext);

        if let Some(parser) = self.parsers.get(&language) {
            let result = parser.parse(content, path);
            if result.success {
                return result;
            }
            tracing::debug!(
                path = relative_path,
                error = result.error.as_deref().unwrap_or("refused"),
                "structural parser refused, using fallback"
            );
        }

        let mut result = fallback::extract(content, language);
        result.used_fallback = true;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeKind;

    struct RefusingParser;

    impl FileParser for RefusingParser {
        fn language(&self) -> Language {
            Language::TypeScript
        }

        fn parse(&self, _content: &str, _path: &Path) -> ParseResult {
            ParseResult { success: false, error: Some("boom".into()), ..Default::default() }
        }
    }

    #[test]
    fn unregistered_language_uses_fallback() {
        let facade = ParserFacade::new();
        let result = facade.parse("def greet(name):\n    return name\n", "app.py");
        assert!(result.success);
        assert!(result.used_fallback);
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].kind, NodeKind::Function);
        assert_eq!(result.nodes[0].name, "greet");
    }

    #[test]
    fn refusing_parser_falls_back() {
        let mut facade = ParserFacade::new();
        facade.register(Arc::new(RefusingParser));
        let result = facade.parse("export function f() { return 1; }\n", "a.ts");
        assert!(result.success);
        assert!(result.used_fallback);
        assert_eq!(result.nodes[0].name, "f");
    }
}

//! Per-file summary generation.
//!
//! Passes the head of a file to the configured LLM backend with a fixed
//! prompt asking for a single-paragraph summary. If the backend errors,
//! times out, or is disabled, a rule-based summary is built from the
//! file's language, top declarations, and imports. The rule-based path is
//! a pure function of the file, so tests can assert it; the LLM path is
//! never asserted.

use std::time::Instant;

use async_trait::async_trait;

use crate::config::SummaryConfig;
use crate::error::{AtlasError, AtlasResult};
use crate::types::{DiscoveredFile, FileSummary, ParseResult, SummaryMethod};

/// Fixed prompt prefix sent to the LLM backend.
const SUMMARY_PROMPT: &str = "Summarize what this source file does in a single short paragraph. \
     Mention its main responsibilities and notable exports. Do not quote code.";

/// An LLM completion backend used for file summaries.
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    /// Generate a completion for `prompt`. Errors are treated as transient
    /// and trigger the rule-based fallback.
    async fn complete(&self, prompt: &str) -> AtlasResult<String>;

    /// Model name reported in summary records.
    fn model(&self) -> &str;
}

/// HTTP summary backend speaking the Ollama-style `/api/generate` contract.
pub struct HttpSummaryBackend {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl HttpSummaryBackend {
    /// Create a backend for the given host and model.
    pub fn new(config: &SummaryConfig) -> AtlasResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AtlasError::SummaryUnavailable { reason: e.to_string() })?;
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl SummaryBackend for HttpSummaryBackend {
    async fn complete(&self, prompt: &str) -> AtlasResult<String> {
        #[derive(serde::Deserialize)]
        struct GenerateResponse {
            response: String,
        }

        let url = format!("{}/api/generate", self.host);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AtlasError::SummaryUnavailable { reason: e.to_string() })?;

        if !response.status().is_success() {
            return Err(AtlasError::SummaryUnavailable {
                reason: format!("{} returned {}", url, response.status()),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AtlasError::SummaryUnavailable { reason: e.to_string() })?;
        Ok(parsed.response.trim().to_string())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Generates one summary per file, preferring the LLM backend when
/// configured.
pub struct SummaryGenerator {
    backend: Option<Box<dyn SummaryBackend>>,
    head_lines: usize,
}

impl SummaryGenerator {
    /// Create a generator. `backend` is `None` when summaries are
    /// configured as rule-based only or no host is set.
    pub fn new(backend: Option<Box<dyn SummaryBackend>>, head_lines: usize) -> Self {
        Self { backend, head_lines }
    }

    /// Build a generator from configuration.
    pub fn from_config(config: &SummaryConfig) -> AtlasResult<Self> {
        let backend: Option<Box<dyn SummaryBackend>> =
            if config.method == "llm" && !config.host.is_empty() {
                Some(Box::new(HttpSummaryBackend::new(config)?))
            } else {
                None
            };
        Ok(Self::new(backend, config.head_lines))
    }

    /// Summarize one file.
    pub async fn summarize(
        &self,
        file: &DiscoveredFile,
        parse: &ParseResult,
        content: &str,
    ) -> FileSummary {
        let started = Instant::now();

        if let Some(backend) = &self.backend {
            let head: String = content
                .lines()
                .take(self.head_lines)
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "{SUMMARY_PROMPT}\n\nFile: {} ({})\n\n{head}",
                file.relative_path, file.language
            );

            match backend.complete(&prompt).await {
                Ok(text) if !text.is_empty() => {
                    return FileSummary {
                        text,
                        method: SummaryMethod::Llm,
                        model: Some(backend.model().to_string()),
                        generation_time_ms: elapsed_ms(started),
                    };
                }
                Ok(_) => {
                    tracing::debug!(path = %file.relative_path, "empty summary, using rule-based");
                }
                Err(e) => {
                    tracing::warn!(
                        path = %file.relative_path,
                        error = %e,
                        "summary backend failed, using rule-based"
                    );
                }
            }
        }

        FileSummary {
            text: rule_based_summary(file, parse),
            method: SummaryMethod::RuleBased,
            model: None,
            generation_time_ms: elapsed_ms(started),
        }
    }
}

/// Deterministic summary built from the file's structure alone.
pub fn rule_based_summary(file: &DiscoveredFile, parse: &ParseResult) -> String {
    let mut declarations: Vec<String> = parse
        .nodes
        .iter()
        .filter(|n| !n.name.is_empty())
        .take(6)
        .map(|n| format!("{} {}", n.kind.as_str(), n.name))
        .collect();
    declarations.dedup();

    let imports: Vec<&str> = parse
        .imports
        .iter()
        .take(5)
        .map(|i| i.source.as_str())
        .collect();

    let mut text = format!(
        "{} file `{}` with {} lines",
        capitalize(file.language.as_str()),
        file.relative_path,
        file.line_count
    );
    if !declarations.is_empty() {
        text.push_str(&format!(" defining {}", declarations.join(", ")));
    }
    if !imports.is_empty() {
        text.push_str(&format!("; imports {}", imports.join(", ")));
    }
    text.push('.');
    text
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::fallback;
    use crate::types::Language;
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

    struct FailingBackend;

    #[async_trait]
    impl SummaryBackend for FailingBackend {
        async fn complete(&self, _prompt: &str) -> AtlasResult<String> {
            Err(AtlasError::SummaryUnavailable { reason: "down".into() })
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    struct EchoBackend;

    #[async_trait]
    impl SummaryBackend for EchoBackend {
        async fn complete(&self, _prompt: &str) -> AtlasResult<String> {
            Ok("A file that does things.".into())
        }

        fn model(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn rule_based_summary_is_deterministic() {
        let content = "import { x } from './x';\nexport function run() { return x; }\n";
        let file = discovered("src/run.ts", content, Language::TypeScript);
        let parse = fallback::extract(content, Language::TypeScript);

        let a = rule_based_summary(&file, &parse);
        let b = rule_based_summary(&file, &parse);
        assert_eq!(a, b);
        assert!(a.contains("src/run.ts"));
        assert!(a.contains("function run"));
        assert!(a.contains("./x"));
    }

    #[tokio::test]
    async fn backend_failure_falls_back_to_rule_based() {
        let content = "export function run() {}\n";
        let file = discovered("src/run.ts", content, Language::TypeScript);
        let parse = fallback::extract(content, Language::TypeScript);

        let gen = SummaryGenerator::new(Some(Box::new(FailingBackend)), 100);
        let summary = gen.summarize(&file, &parse, content).await;
        assert_eq!(summary.method, SummaryMethod::RuleBased);
        assert!(summary.model.is_none());
        assert!(summary.text.contains("src/run.ts"));
    }

    #[tokio::test]
    async fn llm_path_records_model() {
        let content = "export function run() {}\n";
        let file = discovered("src/run.ts", content, Language::TypeScript);
        let parse = fallback::extract(content, Language::TypeScript);

        let gen = SummaryGenerator::new(Some(Box::new(EchoBackend)), 100);
        let summary = gen.summarize(&file, &parse, content).await;
        assert_eq!(summary.method, SummaryMethod::Llm);
        assert_eq!(summary.model.as_deref(), Some("echo"));
    }

    #[tokio::test]
    async fn no_backend_means_rule_based() {
        let content = "def run():\n    pass\n";
        let file = discovered("run.py", content, Language::Python);
        let parse = fallback::extract(content, Language::Python);

        let gen = SummaryGenerator::new(None, 100);
        let summary = gen.summarize(&file, &parse, content).await;
        assert_eq!(summary.method, SummaryMethod::RuleBased);
    }
}

//! Core domain types shared across all atlas-core subsystems.
//!
//! These types form the API contract between modules. Changing them
//! requires updating all consumers, so they should be stable and minimal.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Supported programming languages and document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python (.py)
    Python,
    /// TypeScript (.ts, .tsx)
    TypeScript,
    /// JavaScript (.js, .jsx)
    JavaScript,
    /// Rust (.rs)
    Rust,
    /// Go (.go)
    Go,
    /// Java (.java)
    Java,
    /// C (.c, .h)
    C,
    /// C++ (.cpp, .cc, .cxx, .hpp)
    Cpp,
    /// C# (.cs)
    CSharp,
    /// Ruby (.rb)
    Ruby,
    /// PHP (.php)
    Php,
    /// Swift (.swift)
    Swift,
    /// Kotlin (.kt, .kts)
    Kotlin,
    /// Shell / Bash (.sh, .bash, .zsh)
    Shell,
    /// SQL (.sql)
    Sql,
    /// Markdown (.md, .mdx) -- documentation
    Markdown,
    /// Plain text / rst / adoc -- documentation
    Text,
    /// YAML configuration (.yml, .yaml)
    Yaml,
    /// JSON data (.json, .jsonc)
    Json,
    /// Unknown / unsupported
    Unknown,
}

impl Language {
    /// Detect language from file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "py" | "pyi" => Self::Python,
            "ts" | "tsx" | "mts" | "cts" => Self::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "rs" => Self::Rust,
            "go" => Self::Go,
            "java" => Self::Java,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Self::Cpp,
            "cs" => Self::CSharp,
            "rb" => Self::Ruby,
            "php" => Self::Php,
            "swift" => Self::Swift,
            "kt" | "kts" => Self::Kotlin,
            "sh" | "bash" | "zsh" => Self::Shell,
            "sql" => Self::Sql,
            "md" | "mdx" => Self::Markdown,
            "txt" | "rst" | "adoc" => Self::Text,
            "yml" | "yaml" => Self::Yaml,
            "json" | "jsonc" => Self::Json,
            _ => Self::Unknown,
        }
    }

    /// Returns the language identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::TypeScript => "typescript",
            Self::JavaScript => "javascript",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::Swift => "swift",
            Self::Kotlin => "kotlin",
            Self::Shell => "shell",
            Self::Sql => "sql",
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Unknown => "unknown",
        }
    }

    /// Parse from a stored string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "python" => Self::Python,
            "typescript" => Self::TypeScript,
            "javascript" => Self::JavaScript,
            "rust" => Self::Rust,
            "go" => Self::Go,
            "java" => Self::Java,
            "c" => Self::C,
            "cpp" => Self::Cpp,
            "csharp" => Self::CSharp,
            "ruby" => Self::Ruby,
            "php" => Self::Php,
            "swift" => Self::Swift,
            "kotlin" => Self::Kotlin,
            "shell" => Self::Shell,
            "sql" => Self::Sql,
            "markdown" => Self::Markdown,
            "text" => Self::Text,
            "yaml" => Self::Yaml,
            "json" => Self::Json,
            _ => Self::Unknown,
        }
    }

    /// Returns true if this is a parseable programming language.
    pub fn is_code(&self) -> bool {
        !matches!(
            self,
            Self::Markdown | Self::Text | Self::Yaml | Self::Json | Self::Unknown
        )
    }

    /// Returns true if this is a documentation format, kept only when
    /// `include_docs` is enabled.
    pub fn is_documentation(&self) -> bool {
        matches!(self, Self::Markdown | Self::Text)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Repositories, workspaces, services
// ---------------------------------------------------------------------------

/// Classification of an indexed repository. Affects deduplication priority
/// and reference filtering at retrieval time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoType {
    /// Single deployable application.
    Monolithic,
    /// One service of a larger system.
    Microservice,
    /// Multi-package repository with workspaces.
    Monorepo,
    /// Reusable library code.
    Library,
    /// Indexed for comparison/learning; ranked below first-party code.
    Reference,
    /// Documentation-only repository.
    Documentation,
}

impl RepoType {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monolithic => "monolithic",
            Self::Microservice => "microservice",
            Self::Monorepo => "monorepo",
            Self::Library => "library",
            Self::Reference => "reference",
            Self::Documentation => "documentation",
        }
    }

    /// Parse from database string. Unrecognized values fall back to
    /// `Monolithic`, matching the indexing default.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "microservice" => Self::Microservice,
            "monorepo" => Self::Monorepo,
            "library" => Self::Library,
            "reference" => Self::Reference,
            "documentation" => Self::Documentation,
            _ => Self::Monolithic,
        }
    }

    /// Deduplication priority multiplier. First-party code outranks
    /// libraries, which outrank reference and documentation repos.
    pub fn dedup_priority(&self) -> f32 {
        match self {
            Self::Monolithic | Self::Microservice | Self::Monorepo => 1.0,
            Self::Library => 0.9,
            Self::Reference => 0.6,
            Self::Documentation => 0.5,
        }
    }

    /// Repos excluded when `include_references` is off.
    pub fn is_reference_material(&self) -> bool {
        matches!(self, Self::Reference | Self::Documentation)
    }
}

impl std::fmt::Display for RepoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository header persisted before file processing begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// Stable identity string.
    pub repo_id: String,
    /// Human-readable name.
    pub repo_name: String,
    /// Root path on disk.
    pub repo_path: String,
    /// Repository classification.
    pub repo_type: RepoType,
    /// Arbitrary operator-provided metadata (upstream URL, version, ...).
    pub metadata: serde_json::Value,
    /// When the repo was first indexed (unix millis).
    pub indexed_at: i64,
    /// When the repo was last re-indexed (unix millis).
    pub last_updated: i64,
}

/// A monorepo sub-package with its own dependency list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// Owning repository.
    pub repo_id: String,
    /// Workspace identity within the repo.
    pub workspace_id: String,
    /// Package name from its manifest.
    pub package_name: String,
    /// Path of the workspace root, relative to the repo root.
    pub workspace_path: String,
    /// Direct dependencies on sibling workspaces.
    pub dependencies: Vec<String>,
}

/// A path-alias mapping for a workspace (e.g. tsconfig `paths`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceAlias {
    /// Owning repository.
    pub repo_id: String,
    /// Workspace the alias belongs to.
    pub workspace_id: String,
    /// Alias kind tag (`tsconfig_path`, `package_name`, ...).
    pub alias_type: String,
    /// Pattern as written in imports (may end with `/*`).
    pub alias_pattern: String,
    /// Filesystem prefix the pattern resolves to, relative to the repo root.
    pub resolved_path: String,
}

/// A deployable unit exposing API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Owning repository.
    pub repo_id: String,
    /// Service identity within the repo.
    pub service_id: String,
    /// Human-readable name.
    pub service_name: String,
    /// Type tag (`api`, `worker`, `gateway`, ...).
    pub service_type: String,
    /// Path of the service root, relative to the repo root.
    pub service_path: String,
    /// Exposed API endpoints.
    pub endpoints: Vec<ApiEndpoint>,
}

/// Protocol family of an API endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    /// HTTP REST endpoint.
    Rest,
    /// GraphQL operation.
    Graphql,
    /// gRPC method.
    Grpc,
    /// WebSocket channel.
    Websocket,
}

impl ApiType {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Graphql => "graphql",
            Self::Grpc => "grpc",
            Self::Websocket => "websocket",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "graphql" => Self::Graphql,
            "grpc" => Self::Grpc,
            "websocket" => Self::Websocket,
            _ => Self::Rest,
        }
    }
}

/// An API endpoint attached to a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoint {
    /// HTTP method or RPC verb.
    pub method: String,
    /// Route path or fully qualified RPC name.
    pub path: String,
    /// Protocol family.
    pub api_type: ApiType,
    /// Request schema, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<serde_json::Value>,
    /// Response schema, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    /// Implementation pointer: file path and 1-indexed line range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<(String, (u32, u32))>,
    /// Whether the endpoint is marked deprecated.
    #[serde(default)]
    pub deprecated: bool,
}

/// A typed edge between two indexed repositories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossRepoDependency {
    /// Depending repository.
    pub source_repo_id: String,
    /// Depended-upon repository.
    pub target_repo_id: String,
    /// Edge type: `service`, `library`, `api`, or `shared`.
    pub dependency_type: String,
    /// Optional API contracts carried on the edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_contracts: Option<serde_json::Value>,
}

/// Weak back-references from a file/chunk/symbol to the project entities
/// that own it. All optional: a plain repository has none of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRefs {
    /// Owning repository id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    /// Owning workspace id (monorepos).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    /// Package name of the owning workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    /// Owning service id (microservices).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// A file kept by the discoverer, ready for the indexing pipeline.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Absolute path on disk.
    pub absolute_path: PathBuf,
    /// Path relative to the repository root, `/`-separated.
    pub relative_path: String,
    /// SHA-256 of the raw bytes, hex-encoded.
    pub file_hash: String,
    /// Detected language.
    pub language: Language,
    /// Number of lines.
    pub line_count: u32,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Last-modified time.
    pub modified_time: SystemTime,
    /// Encoding tag (`utf-8` for everything this pipeline keeps).
    pub encoding: &'static str,
}

/// Counters describing a discovery pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryStats {
    /// Entries visited during traversal.
    pub entries_walked: usize,
    /// Files kept for indexing.
    pub files_kept: usize,
    /// Dropped: unrecognized extension.
    pub skipped_unknown: usize,
    /// Dropped: binary content.
    pub skipped_binary: usize,
    /// Dropped: generated-file banner.
    pub skipped_generated: usize,
    /// Dropped: minified content.
    pub skipped_minified: usize,
    /// Dropped: exceeds the line limit.
    pub skipped_too_large: usize,
    /// Dropped: path matched a secret pattern.
    pub skipped_secret: usize,
    /// Per-file I/O errors (traversal continued).
    pub io_errors: usize,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Kind of a structural node produced by a parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Free function.
    Function,
    /// Method inside a class/impl.
    Method,
    /// Class, struct, or record.
    Class,
    /// Interface, trait, or protocol.
    Interface,
    /// Type alias or type definition.
    TypeAlias,
    /// Enum definition.
    Enum,
    /// Variable binding.
    Variable,
    /// Constant binding.
    Constant,
    /// Anything else worth keeping as a block.
    Block,
}

impl NodeKind {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::TypeAlias => "type",
            Self::Enum => "enum",
            Self::Variable => "variable",
            Self::Constant => "constant",
            Self::Block => "block",
        }
    }
}

/// A structural node extracted by a language parser or the fallback.
#[derive(Debug, Clone)]
pub struct ParsedNode {
    /// What kind of construct this is.
    pub kind: NodeKind,
    /// Declared name, empty for anonymous blocks.
    pub name: String,
    /// Starting line (1-indexed).
    pub start_line: u32,
    /// Ending line (1-indexed, inclusive).
    pub end_line: u32,
    /// Raw source text of the node.
    pub text: String,
    /// Parameter list, when the parser recovers one.
    pub parameters: Vec<String>,
    /// Return type annotation, when present.
    pub return_type: Option<String>,
    /// True when the node is declared public/exported.
    pub is_public: bool,
    /// True for `async` functions/methods.
    pub is_async: bool,
    /// True for `static` members.
    pub is_static: bool,
    /// Leading doc comment, when present.
    pub docstring: Option<String>,
    /// Cyclomatic-complexity estimate (branch keyword count + 1).
    pub complexity: u32,
    /// Nested children (methods of a class).
    pub children: Vec<ParsedNode>,
}

/// An import statement recovered from source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    /// The module specifier as written (`./utils`, `@scope/pkg`, `os.path`).
    pub source: String,
    /// Named symbols imported, empty for bare side-effect imports.
    pub symbols: Vec<String>,
    /// True for default imports.
    pub is_default: bool,
    /// True for namespace (`* as x`) imports.
    pub is_namespace: bool,
    /// Line number (1-indexed).
    pub line: u32,
}

/// An export statement recovered from source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    /// Exported symbol names.
    pub symbols: Vec<String>,
    /// True for default exports.
    pub is_default: bool,
    /// True for `export ... from` re-exports.
    pub is_reexport: bool,
    /// Source module of a re-export.
    pub reexport_source: Option<String>,
    /// Line number (1-indexed).
    pub line: u32,
}

/// Output of the parser facade for one file.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    /// True when either the structural parser or the fallback produced
    /// usable output.
    pub success: bool,
    /// True when the regex fallback produced the output.
    pub used_fallback: bool,
    /// Top-level structural nodes in source order.
    pub nodes: Vec<ParsedNode>,
    /// Import statements.
    pub imports: Vec<ImportRecord>,
    /// Export statements.
    pub exports: Vec<ExportRecord>,
    /// Error message when nothing usable was produced.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// The kind of region a chunk represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Whole-file summary chunk spanning lines 1..N.
    FileSummary,
    /// The contiguous import region.
    ImportBlock,
    /// A top-level function or method.
    Function,
    /// A class including its methods.
    Class,
    /// Merged small top-level statements.
    Block,
    /// Fixed-window chunk from the fallback path.
    Fallback,
    /// Single structural chunk for files over the large-file threshold.
    StructureOnly,
}

impl ChunkKind {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileSummary => "file_summary",
            Self::ImportBlock => "import_block",
            Self::Function => "function",
            Self::Class => "class",
            Self::Block => "block",
            Self::Fallback => "fallback",
            Self::StructureOnly => "structure_only",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "file_summary" => Self::FileSummary,
            "import_block" => Self::ImportBlock,
            "function" => Self::Function,
            "class" => Self::Class,
            "fallback" => Self::Fallback,
            "structure_only" => Self::StructureOnly,
            _ => Self::Block,
        }
    }
}

/// A semantically coherent chunk of a file, ready for embedding and
/// persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    /// UUIDv4 identity.
    pub chunk_id: String,
    /// Repository root path this chunk was indexed under.
    pub repo_path: String,
    /// Path of the owning file, relative to the repo root.
    pub file_path: String,
    /// What kind of region this is.
    pub kind: ChunkKind,
    /// Starting line (1-indexed).
    pub start_line: u32,
    /// Ending line (1-indexed, inclusive).
    pub end_line: u32,
    /// Raw content of the region.
    pub content: String,
    /// Language of the owning file.
    pub language: Language,
    /// Token estimate: ceil(content bytes / 4), at least 1.
    pub token_count: u32,
    /// Embedding vector; empty until embedded, or on embedding failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Arbitrary metadata (function names, complexity, feature flags).
    pub metadata: serde_json::Value,
    /// Multi-project back-references, mirroring the owning file's.
    #[serde(default)]
    pub refs: ProjectRefs,
}

impl CodeChunk {
    /// Token estimate for a span of content: `ceil(bytes / 4)`, minimum 1.
    pub fn estimate_tokens(content: &str) -> u32 {
        #[expect(clippy::cast_possible_truncation)]
        let estimate = (content.len().div_ceil(4)) as u32;
        estimate.max(1)
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// How a file summary was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMethod {
    /// Generated by the configured LLM backend.
    Llm,
    /// Built deterministically from the file's structure.
    RuleBased,
}

/// A per-file textual summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    /// Single-paragraph summary text.
    pub text: String,
    /// How it was produced.
    pub method: SummaryMethod,
    /// Model name, for the LLM path.
    pub model: Option<String>,
    /// Wall-clock generation time in milliseconds.
    pub generation_time_ms: u64,
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// Visibility scope of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolScope {
    /// Reachable from outside the file (exported or public).
    Exported,
    /// File-local.
    Internal,
}

impl SymbolScope {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exported => "exported",
            Self::Internal => "internal",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        if s == "exported" { Self::Exported } else { Self::Internal }
    }
}

/// A named symbol definition with its own embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSymbol {
    /// Repository root path.
    pub repo_path: String,
    /// Owning file path, relative to the repo root.
    pub file_path: String,
    /// Declared name.
    pub symbol_name: String,
    /// Kind tag (function/method/class/interface/type/variable/constant).
    pub symbol_type: String,
    /// Line of the definition (1-indexed).
    pub line_number: u32,
    /// Definition text, truncated to the configured maximum.
    pub definition: String,
    /// Embedding vector; empty on embedding failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Visibility scope.
    pub scope: SymbolScope,
    /// Multi-project back-references.
    #[serde(default)]
    pub refs: ProjectRefs,
}

// ---------------------------------------------------------------------------
// Stored file rows
// ---------------------------------------------------------------------------

/// A persisted file row (`code_files`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeFile {
    /// Repository root path.
    pub repo_path: String,
    /// Path relative to the repo root.
    pub file_path: String,
    /// Summary text.
    pub summary: String,
    /// Embedding of the summary; empty on embedding failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summary_embedding: Vec<f32>,
    /// Language tag.
    pub language: Language,
    /// Total line count.
    pub total_lines: u32,
    /// Structured imports.
    pub imports: Vec<ImportRecord>,
    /// Structured exports.
    pub exports: Vec<ExportRecord>,
    /// SHA-256 content hash, hex-encoded.
    pub file_hash: String,
    /// Last-modified time (unix millis).
    pub last_modified: i64,
    /// Multi-project back-references.
    #[serde(default)]
    pub refs: ProjectRefs,
}

// ---------------------------------------------------------------------------
// Query processing
// ---------------------------------------------------------------------------

/// Detected query modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// The query looks like pasted code.
    CodeSnippet,
    /// The query is a natural-language question or phrase.
    NaturalLanguage,
}

/// Output of the query processor: both embeddings plus classification.
#[derive(Debug, Clone)]
pub struct QueryEmbedding {
    /// Preprocessed query text.
    pub query_text: String,
    /// Detected modality.
    pub query_type: QueryType,
    /// Embedding of the preprocessed query.
    pub embedding: Vec<f32>,
    /// Embedding of the query with the code-context appendix, when the
    /// appendix was non-empty.
    pub enhanced_embedding: Option<Vec<f32>>,
    /// Wall-clock generation time in milliseconds.
    pub generation_time_ms: u64,
}

// ---------------------------------------------------------------------------
// Retrieval results
// ---------------------------------------------------------------------------

/// A file-level ANN hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHit {
    /// Repository root path.
    pub repo_path: String,
    /// File path relative to the repo root.
    pub file_path: String,
    /// File summary text.
    pub summary: String,
    /// Language tag.
    pub language: Language,
    /// Cosine similarity to the query.
    pub similarity: f32,
    /// Repository classification, when known.
    pub repo_type: Option<RepoType>,
    /// Multi-project back-references.
    #[serde(default)]
    pub refs: ProjectRefs,
}

/// A chunk-level ANN hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHit {
    /// The matched chunk (embedding retained for deduplication).
    pub chunk: CodeChunk,
    /// Cosine similarity to the (enhanced) query.
    pub similarity: f32,
    /// Repository classification, when known.
    pub repo_type: Option<RepoType>,
}

/// A symbol resolved from a query token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSymbol {
    /// The matched symbol.
    pub symbol: CodeSymbol,
    /// The query token that matched.
    pub matched_token: String,
}

/// Why an import edge was not expanded further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationReason {
    /// BFS depth cap reached.
    DepthLimit,
    /// Specifier resolves outside the repository.
    ExternalDependency,
    /// Strict scope forbids crossing a workspace/service boundary.
    BoundaryCrossed,
}

/// One edge of the expanded import graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportChain {
    /// Target file of the edge.
    pub file_path: String,
    /// Source file of the edge.
    pub imported_from: String,
    /// BFS depth of the target (seeds are depth 0).
    pub depth: u32,
    /// Exports of the target file, when loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Vec<ExportRecord>>,
    /// True when the target was already visited at a lower depth.
    #[serde(default)]
    pub circular: bool,
    /// True when the edge was not expanded further.
    #[serde(default)]
    pub truncated: bool,
    /// Why it was truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_reason: Option<TruncationReason>,
    /// Edge crosses workspace boundaries.
    #[serde(default)]
    pub cross_workspace: bool,
    /// Edge crosses service boundaries.
    #[serde(default)]
    pub cross_service: bool,
}

/// A cross-service call detected inside a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossServiceCall {
    /// Chunk the call was found in.
    pub chunk_id: String,
    /// Service owning the calling chunk, when known.
    pub from_service: Option<String>,
    /// Service the call targets.
    pub to_service: String,
    /// The matched call text.
    pub matched_text: String,
    /// True when the call matched a registered endpoint.
    pub endpoint_found: bool,
    /// The registered endpoint, when matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<ApiEndpoint>,
}

/// API context for the touched services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiContext {
    /// All endpoints of the touched services.
    pub endpoints: Vec<ApiEndpoint>,
    /// Detected cross-service calls.
    pub cross_service_calls: Vec<CrossServiceCall>,
    /// Contract edges between touched services.
    pub contract_links: Vec<CrossRepoDependency>,
    /// Endpoints grouped by service id.
    pub apis_by_service: BTreeMap<String, Vec<ApiEndpoint>>,
    /// Endpoint paths grouped by chunk id.
    pub endpoints_by_chunk: BTreeMap<String, Vec<String>>,
    /// Non-fatal problems found while enriching.
    pub api_warnings: Vec<String>,
}

/// Severity of a result warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    /// Informational.
    Info,
    /// Worth the caller's attention.
    Warning,
}

/// Category of a result warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Total token count exceeds the configured ceiling.
    ContextSize,
    /// A stage returned no or partial results.
    PartialResults,
    /// Cross-workspace or cross-service imports are present.
    BoundaryCrossed,
    /// An included reference repo has not been re-indexed recently.
    OutdatedReference,
}

/// A structured warning attached to a search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultWarning {
    /// Category.
    #[serde(rename = "type")]
    pub kind: WarningKind,
    /// Severity.
    pub severity: WarningSeverity,
    /// Human-readable message.
    pub message: String,
}

/// Files/chunks/symbols/imports belonging to one grouping key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextGroup {
    /// File paths in this group.
    pub files: Vec<String>,
    /// Chunk ids in this group.
    pub chunks: Vec<String>,
    /// Symbol names in this group.
    pub symbols: Vec<String>,
    /// Import-chain target paths in this group.
    pub imports: Vec<String>,
}

/// The assembled retrieval context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchContext {
    /// File-level hits.
    pub files: Vec<FileHit>,
    /// Chunk-level hits after deduplication.
    pub chunks: Vec<ChunkHit>,
    /// Resolved symbols.
    pub symbols: Vec<ResolvedSymbol>,
    /// Expanded import chains.
    pub imports: Vec<ImportChain>,
    /// API context, when services were touched.
    pub api: ApiContext,
    /// Total token estimate of the context.
    pub total_tokens: u64,
    /// Groups keyed by workspace id, present when any hit carries one.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_workspace: BTreeMap<String, ContextGroup>,
    /// Groups keyed by service id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_service: BTreeMap<String, ContextGroup>,
    /// Groups keyed by repo id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_repo: BTreeMap<String, ContextGroup>,
}

/// Final result returned by the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Original query.
    pub query: String,
    /// Detected modality.
    pub query_type: QueryType,
    /// Structured warnings.
    pub warnings: Vec<ResultWarning>,
    /// Stage timings and counters.
    pub metadata: serde_json::Value,
    /// The assembled context.
    pub context: SearchContext,
}

// ---------------------------------------------------------------------------
// Indexing stats and per-file state
// ---------------------------------------------------------------------------

/// Per-file pipeline state. Transitions are one-directional; `Failed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    /// Emitted by the discoverer.
    Discovered,
    /// Parser produced a usable result.
    Parsed,
    /// Chunker produced chunks.
    Chunked,
    /// Summary generated.
    Summarized,
    /// Chunk + summary embeddings generated.
    Embedded,
    /// Symbols extracted.
    Symbols,
    /// Rows committed.
    Persisted,
    /// Terminal failure state.
    Failed,
}

impl FileStage {
    /// Stage label used in progress reporting and timing maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Parsed => "parsed",
            Self::Chunked => "chunked",
            Self::Summarized => "summarized",
            Self::Embedded => "embedded",
            Self::Symbols => "symbols",
            Self::Persisted => "persisted",
            Self::Failed => "failed",
        }
    }
}

/// A recoverable error recorded against one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    /// File the error is scoped to.
    pub file_path: String,
    /// Stage that failed.
    pub stage: FileStage,
    /// Error description.
    pub message: String,
}

/// Statistics emitted by an indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexingStats {
    /// Files kept by discovery.
    pub files_total: usize,
    /// Files that ran the per-file pipeline (new + modified).
    pub files_processed: usize,
    /// Files that failed a pipeline stage.
    pub files_failed: usize,
    /// Files skipped as unchanged.
    pub files_skipped: usize,
    /// Files inserted for the first time.
    pub files_indexed_new: usize,
    /// Files deleted because they vanished from disk.
    pub files_deleted: usize,
    /// Chunks produced.
    pub chunks_total: usize,
    /// Chunks that received an embedding.
    pub chunks_embedded: usize,
    /// Symbols extracted.
    pub symbols_extracted: usize,
    /// Summaries produced by the LLM backend.
    pub summaries_llm: usize,
    /// Summaries produced by the rule-based fallback.
    pub summaries_fallback: usize,
    /// Fraction of discovered files skipped as unchanged, 0..=100.
    pub skip_rate: f64,
    /// Total wall-clock time in milliseconds.
    pub total_time_ms: u64,
    /// Cumulative per-stage timings in milliseconds.
    pub per_stage_timings: BTreeMap<String, u64>,
    /// Recoverable per-file errors.
    pub errors: Vec<FileError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_from_extension() {
        assert_eq!(Language::from_extension("ts"), Language::TypeScript);
        assert_eq!(Language::from_extension("tsx"), Language::TypeScript);
        assert_eq!(Language::from_extension("rs"), Language::Rust);
        assert_eq!(Language::from_extension("xyz"), Language::Unknown);
    }

    #[test]
    fn documentation_languages() {
        assert!(Language::Markdown.is_documentation());
        assert!(!Language::Markdown.is_code());
        assert!(Language::TypeScript.is_code());
    }

    #[test]
    fn token_estimate_is_ceil_div_four_min_one() {
        assert_eq!(CodeChunk::estimate_tokens(""), 1);
        assert_eq!(CodeChunk::estimate_tokens("abc"), 1);
        assert_eq!(CodeChunk::estimate_tokens("abcd"), 1);
        assert_eq!(CodeChunk::estimate_tokens("abcde"), 2);
    }

    #[test]
    fn repo_type_priorities() {
        assert_eq!(RepoType::Monolithic.dedup_priority(), 1.0);
        assert_eq!(RepoType::Library.dedup_priority(), 0.9);
        assert_eq!(RepoType::Reference.dedup_priority(), 0.6);
        assert_eq!(RepoType::Documentation.dedup_priority(), 0.5);
        assert!(RepoType::Reference.is_reference_material());
        assert!(!RepoType::Monorepo.is_reference_material());
    }

    #[test]
    fn chunk_kind_round_trip() {
        for kind in [
            ChunkKind::FileSummary,
            ChunkKind::ImportBlock,
            ChunkKind::Function,
            ChunkKind::Class,
            ChunkKind::Block,
            ChunkKind::Fallback,
            ChunkKind::StructureOnly,
        ] {
            assert_eq!(ChunkKind::from_str_lossy(kind.as_str()), kind);
        }
    }
}

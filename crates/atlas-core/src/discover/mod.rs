//! Repository file discovery.
//!
//! Walks a repository root, honoring ignore files when enabled, and emits
//! `DiscoveredFile` records for everything worth indexing. Binary,
//! generated, and minified files are excluded by content heuristics, and
//! paths matching configured secret patterns are dropped before their
//! contents are ever read into the pipeline.
//!
//! Output is sorted by relative path so downstream stages and tests see a
//! deterministic order.

use std::path::Path;
use std::time::SystemTime;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};

use crate::error::{AtlasError, AtlasResult};
use crate::types::{DiscoveredFile, DiscoveryStats, Language};

/// Directories never descended into, regardless of ignore files.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "dist", "build", ".next", "coverage"];

/// Lines longer than this mark a file as minified.
const MINIFIED_LINE_LEN: usize = 5_000;

/// Bytes inspected for NUL when sniffing binary content.
const BINARY_SNIFF_BYTES: usize = 8_192;

/// Banner substrings that mark generated files. Checked against the first
/// few lines only.
const GENERATED_MARKERS: &[&str] = &[
    "@generated",
    "DO NOT EDIT",
    "do not edit",
    "Code generated by",
    "Auto-generated",
    "autogenerated",
];

/// Options for one discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    /// Honor repository ignore files, merged from the root down.
    pub respect_ignore_file: bool,
    /// Files over this many lines are skipped.
    pub max_file_lines: u32,
    /// Keep documentation formats (markdown, text).
    pub include_docs: bool,
    /// Path globs excluded as secrets.
    pub secret_patterns: Vec<String>,
    /// Optional allowlist of language tags.
    pub languages_allowlist: Vec<String>,
}

impl From<&crate::config::IndexingConfig> for DiscoverOptions {
    fn from(cfg: &crate::config::IndexingConfig) -> Self {
        Self {
            respect_ignore_file: cfg.respect_ignore_file,
            max_file_lines: cfg.max_file_lines,
            include_docs: cfg.include_docs,
            secret_patterns: cfg.secret_patterns.clone(),
            languages_allowlist: cfg.languages_allowlist.clone(),
        }
    }
}

/// Walks a repository root and classifies its files.
pub struct Discoverer {
    opts: DiscoverOptions,
    secret_set: GlobSet,
}

impl Discoverer {
    /// Create a discoverer. Fails on an invalid secret pattern.
    pub fn new(opts: DiscoverOptions) -> AtlasResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &opts.secret_patterns {
            let glob = Glob::new(pattern).map_err(|e| AtlasError::Config {
                field: "indexing.secret_patterns".into(),
                details: format!("invalid glob `{pattern}`: {e}"),
            })?;
            builder.add(glob);
        }
        let secret_set = builder.build().map_err(|e| AtlasError::Config {
            field: "indexing.secret_patterns".into(),
            details: e.to_string(),
        })?;
        Ok(Self { opts, secret_set })
    }

    /// Enumerate files under `root`.
    ///
    /// I/O errors on individual files are logged and counted; a failure to
    /// access the root itself is fatal.
    pub fn discover(&self, root: &Path) -> AtlasResult<(Vec<DiscoveredFile>, DiscoveryStats)> {
        let root_meta = std::fs::metadata(root).map_err(|e| AtlasError::DiscoveryFailed {
            root: root.to_path_buf(),
            message: e.to_string(),
        })?;
        if !root_meta.is_dir() {
            return Err(AtlasError::DiscoveryFailed {
                root: root.to_path_buf(),
                message: "not a directory".into(),
            });
        }

        let mut stats = DiscoveryStats::default();
        let mut files = Vec::new();

        let walker = WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(self.opts.respect_ignore_file)
            .git_global(false)
            .git_exclude(self.opts.respect_ignore_file)
            .ignore(self.opts.respect_ignore_file)
            .parents(self.opts.respect_ignore_file)
            .require_git(false)
            .follow_links(false)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !SKIP_DIRS.contains(&name.as_ref())
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, "walk error, continuing");
                    stats.io_errors += 1;
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            stats.entries_walked += 1;

            let path = entry.path();
            let relative_path = match path.strip_prefix(root) {
                Ok(p) => p.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };

            if let Some(file) = self.classify(path, &relative_path, &mut stats) {
                files.push(file);
            }
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        stats.files_kept = files.len();

        tracing::info!(
            root = %root.display(),
            kept = stats.files_kept,
            walked = stats.entries_walked,
            secrets = stats.skipped_secret,
            "discovery complete"
        );

        Ok((files, stats))
    }

    /// Classify one file, reading its contents at most once.
    fn classify(
        &self,
        path: &Path,
        relative_path: &str,
        stats: &mut DiscoveryStats,
    ) -> Option<DiscoveredFile> {
        if self.secret_set.is_match(relative_path) {
            stats.skipped_secret += 1;
            return None;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let language = Language::from_extension(ext);

        if language == Language::Unknown {
            stats.skipped_unknown += 1;
            return None;
        }
        if language.is_documentation() && !self.opts.include_docs {
            stats.skipped_unknown += 1;
            return None;
        }
        if !self.opts.languages_allowlist.is_empty()
            && !self.opts.languages_allowlist.iter().any(|l| l == language.as_str())
        {
            stats.skipped_unknown += 1;
            return None;
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read file");
                stats.io_errors += 1;
                return None;
            }
        };

        if looks_binary(&bytes) {
            stats.skipped_binary += 1;
            return None;
        }
        let content = String::from_utf8_lossy(&bytes);
        if looks_minified(&content) {
            stats.skipped_minified += 1;
            return None;
        }
        if looks_generated(&content) {
            stats.skipped_generated += 1;
            return None;
        }

        let line_count = count_lines(&content);
        if line_count > self.opts.max_file_lines {
            stats.skipped_too_large += 1;
            return None;
        }

        let modified_time = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        Some(DiscoveredFile {
            absolute_path: path.to_path_buf(),
            relative_path: relative_path.to_string(),
            file_hash: sha256_hex(&bytes),
            language,
            line_count,
            size_bytes: bytes.len() as u64,
            modified_time,
            encoding: "utf-8",
        })
    }
}

/// SHA-256 of raw bytes, hex-encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Count lines the way editors do: a trailing newline does not start an
/// extra line.
pub fn count_lines(content: &str) -> u32 {
    if content.is_empty() {
        return 0;
    }
    #[expect(clippy::cast_possible_truncation)]
    let count = content.lines().count() as u32;
    count
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_BYTES).any(|&b| b == 0)
}

fn looks_minified(content: &str) -> bool {
    content.lines().any(|line| line.len() > MINIFIED_LINE_LEN)
}

fn looks_generated(content: &str) -> bool {
    content
        .lines()
        .take(5)
        .any(|line| GENERATED_MARKERS.iter().any(|m| line.contains(m)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_opts() -> DiscoverOptions {
        DiscoverOptions {
            respect_ignore_file: true,
            max_file_lines: 10_000,
            include_docs: false,
            secret_patterns: vec!["**/.env*".into(), "**/*.pem".into()],
            languages_allowlist: Vec::new(),
        }
    }

    #[test]
    fn discovers_and_sorts_files() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("b.ts"), "export const b = 2;\n").expect("write");
        std::fs::write(dir.path().join("a.ts"), "export const a = 1;\n").expect("write");
        std::fs::create_dir(dir.path().join("node_modules")).expect("mkdir");
        std::fs::write(dir.path().join("node_modules").join("x.ts"), "ignored").expect("write");

        let discoverer = Discoverer::new(default_opts()).expect("build");
        let (files, stats) = discoverer.discover(dir.path()).expect("discover");

        assert_eq!(stats.files_kept, 2);
        assert_eq!(files[0].relative_path, "a.ts");
        assert_eq!(files[1].relative_path, "b.ts");
        assert_eq!(files[0].language, Language::TypeScript);
        assert_eq!(files[0].line_count, 1);
        assert_eq!(files[0].file_hash.len(), 64);
    }

    #[test]
    fn skips_binary_and_secret_files() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("blob.js"), [0x00, 0x01, 0x02, b'a']).expect("write");
        std::fs::write(dir.path().join("server.pem"), "-----BEGIN KEY-----\n").expect("write");
        std::fs::write(dir.path().join("ok.js"), "const x = 1;\n").expect("write");

        let discoverer = Discoverer::new(default_opts()).expect("build");
        let (files, stats) = discoverer.discover(dir.path()).expect("discover");

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "ok.js");
        assert_eq!(stats.skipped_binary, 1);
        assert_eq!(stats.skipped_secret, 1);
    }

    #[test]
    fn skips_generated_files() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(
            dir.path().join("gen.ts"),
            "// Code generated by protoc. DO NOT EDIT.\nexport const x = 1;\n",
        )
        .expect("write");

        let discoverer = Discoverer::new(default_opts()).expect("build");
        let (files, stats) = discoverer.discover(dir.path()).expect("discover");
        assert!(files.is_empty());
        assert_eq!(stats.skipped_generated, 1);
    }

    #[test]
    fn docs_kept_only_when_enabled() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("README.md"), "# Readme\n").expect("write");

        let discoverer = Discoverer::new(default_opts()).expect("build");
        let (files, _) = discoverer.discover(dir.path()).expect("discover");
        assert!(files.is_empty());

        let mut opts = default_opts();
        opts.include_docs = true;
        let discoverer = Discoverer::new(opts).expect("build");
        let (files, _) = discoverer.discover(dir.path()).expect("discover");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].language, Language::Markdown);
    }

    #[test]
    fn missing_root_is_fatal() {
        let discoverer = Discoverer::new(default_opts()).expect("build");
        let result = discoverer.discover(Path::new("/definitely/not/a/path"));
        assert!(matches!(result, Err(AtlasError::DiscoveryFailed { .. })));
    }

    #[test]
    fn respects_gitignore() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join(".gitignore"), "ignored.ts\n").expect("write");
        std::fs::write(dir.path().join("ignored.ts"), "const x = 1;\n").expect("write");
        std::fs::write(dir.path().join("kept.ts"), "const y = 2;\n").expect("write");

        let discoverer = Discoverer::new(default_opts()).expect("build");
        let (files, _) = discoverer.discover(dir.path()).expect("discover");
        let names: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["kept.ts"]);
    }

    #[test]
    fn line_count_ignores_trailing_newline() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a"), 1);
        assert_eq!(count_lines("a\n"), 1);
        assert_eq!(count_lines("a\nb\n"), 2);
    }
}

//! Semantic code chunker.
//!
//! Transforms a parse result into ordered chunks suitable for embedding:
//! one whole-file summary chunk, an import-block chunk, one chunk per
//! top-level function, one chunk per class (methods included), and block
//! chunks covering everything in between. Files that failed structural
//! parsing fall back to fixed-window chunks; files over the large-file
//! threshold collapse into a single structure-only rendering.
//!
//! For a non-structure-only file the function, class, block, and fallback
//! chunk ranges partition the body minus the import region.

use serde_json::json;
use uuid::Uuid;

use crate::types::{
    ChunkKind, CodeChunk, DiscoveredFile, NodeKind, ParseResult, ParsedNode, ProjectRefs,
};

/// Tunables for one chunking pass.
#[derive(Debug, Clone)]
pub struct ChunkerOptions {
    /// Files over this many lines take the structure-only path.
    pub large_file_lines: u32,
    /// Minimum lines for a standalone block chunk.
    pub chunk_min_lines: u32,
    /// Maximum lines of a merged block chunk.
    pub chunk_max_lines: u32,
    /// Window size for fallback chunking.
    pub fallback_window_lines: u32,
    /// Lines of the file head included in the file-summary chunk.
    pub summary_head_lines: usize,
}

impl From<&crate::config::IndexingConfig> for ChunkerOptions {
    fn from(cfg: &crate::config::IndexingConfig) -> Self {
        Self {
            large_file_lines: cfg.large_file_lines,
            chunk_min_lines: cfg.chunk_min_lines,
            chunk_max_lines: cfg.chunk_max_lines,
            fallback_window_lines: cfg.fallback_window_lines,
            summary_head_lines: 50,
        }
    }
}

/// Output of one chunking pass.
#[derive(Debug, Clone)]
pub struct ChunkingResult {
    /// Emitted chunks, in file order after the leading file-summary chunk.
    pub chunks: Vec<CodeChunk>,
    /// True when the file took the large-file path; symbol extraction is
    /// skipped for such files.
    pub structure_only: bool,
}

/// Chunk one file.
pub fn chunk(
    file: &DiscoveredFile,
    parse: &ParseResult,
    content: &str,
    repo_path: &str,
    refs: &ProjectRefs,
    opts: &ChunkerOptions,
) -> ChunkingResult {
    let lines: Vec<&str> = content.lines().collect();
    let total_lines = file.line_count.max(1);

    if file.line_count > opts.large_file_lines {
        let chunk = structure_only_chunk(file, parse, repo_path, refs);
        return ChunkingResult { chunks: vec![chunk], structure_only: true };
    }

    let mut chunks = Vec::new();
    chunks.push(file_summary_chunk(file, parse, &lines, repo_path, refs, opts));

    let import_region = import_region(parse);
    if let Some((start, end)) = import_region {
        chunks.push(make_chunk(
            file,
            repo_path,
            refs,
            ChunkKind::ImportBlock,
            start,
            end,
            slice_lines(&lines, start, end),
            json!({
                "imports": parse.imports.iter().map(|i| i.source.clone()).collect::<Vec<_>>(),
            }),
        ));
    }

    let top_nodes = top_level_nodes(parse);
    if top_nodes.is_empty() && parse.used_fallback {
        chunks.extend(fallback_chunks(file, &lines, repo_path, refs, opts, import_region));
        return ChunkingResult { chunks, structure_only: false };
    }

    let mut covered: Vec<(u32, u32)> = Vec::new();
    if let Some(region) = import_region {
        covered.push(region);
    }

    for node in &top_nodes {
        let (kind, metadata) = match node.kind {
            NodeKind::Class | NodeKind::Interface | NodeKind::Enum => (
                ChunkKind::Class,
                json!({
                    "class_name": node.name,
                    "method_names": node
                        .children
                        .iter()
                        .map(|m| m.name.clone())
                        .collect::<Vec<_>>(),
                    "complexity": node.complexity,
                }),
            ),
            _ => (
                ChunkKind::Function,
                json!({
                    "function_name": node.name,
                    "parameters": node.parameters,
                    "is_async": node.is_async,
                    "complexity": node.complexity,
                    "has_loops": has_loops(&node.text),
                }),
            ),
        };
        let start = node.start_line.clamp(1, total_lines);
        let end = node.end_line.clamp(start, total_lines);
        covered.push((start, end));
        chunks.push(make_chunk(
            file,
            repo_path,
            refs,
            kind,
            start,
            end,
            slice_lines(&lines, start, end),
            metadata,
        ));
    }

    chunks.extend(block_chunks(file, &lines, repo_path, refs, opts, &covered));

    // Stable file order: summary first, then by start line.
    chunks[1..].sort_by_key(|c| (c.start_line, c.end_line));

    ChunkingResult { chunks, structure_only: false }
}

/// Whole-file chunk: structural header plus the head of the file.
fn file_summary_chunk(
    file: &DiscoveredFile,
    parse: &ParseResult,
    lines: &[&str],
    repo_path: &str,
    refs: &ProjectRefs,
    opts: &ChunkerOptions,
) -> CodeChunk {
    let function_names: Vec<String> = collect_names(parse, false);
    let class_names: Vec<String> = collect_names(parse, true);
    let complexity_total: u32 = parse.nodes.iter().map(|n| n.complexity).sum();

    let head = lines
        .iter()
        .take(opts.summary_head_lines)
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    let content = format!(
        "// {} ({}, {} lines)\n{head}",
        file.relative_path, file.language, file.line_count
    );

    make_chunk(
        file,
        repo_path,
        refs,
        ChunkKind::FileSummary,
        1,
        file.line_count.max(1),
        content,
        json!({
            "function_names": function_names,
            "class_names": class_names,
            "imports_count": parse.imports.len(),
            "exports_count": parse.exports.len(),
            "complexity_total": complexity_total,
            "has_async": parse.nodes.iter().any(|n| n.is_async),
            "has_loops": parse.nodes.iter().any(|n| has_loops(&n.text)),
        }),
    )
}

/// Single chunk for large files: a textual rendering of exports, imports,
/// and top-level declarations.
fn structure_only_chunk(
    file: &DiscoveredFile,
    parse: &ParseResult,
    repo_path: &str,
    refs: &ProjectRefs,
) -> CodeChunk {
    let mut rendering = format!(
        "// structure of {} ({}, {} lines)\n",
        file.relative_path, file.language, file.line_count
    );

    if !parse.exports.is_empty() {
        rendering.push_str("// exports:\n");
        for export in &parse.exports {
            if export.symbols.is_empty() {
                if let Some(src) = &export.reexport_source {
                    rendering.push_str(&format!("//   * from {src}\n"));
                }
            } else {
                rendering.push_str(&format!("//   {}\n", export.symbols.join(", ")));
            }
        }
    }
    if !parse.imports.is_empty() {
        rendering.push_str("// imports:\n");
        for import in &parse.imports {
            rendering.push_str(&format!("//   {}\n", import.source));
        }
    }
    rendering.push_str("// declarations:\n");
    for node in &parse.nodes {
        rendering.push_str(&format!(
            "//   {} {} (L{}-L{})\n",
            node.kind.as_str(),
            node.name,
            node.start_line,
            node.end_line
        ));
        // Keep the signature line itself when available.
        if let Some(first) = node.text.lines().next() {
            rendering.push_str(first);
            rendering.push('\n');
        }
    }

    let total_exports: usize = parse.exports.iter().map(|e| e.symbols.len().max(1)).sum();
    make_chunk(
        file,
        repo_path,
        refs,
        ChunkKind::StructureOnly,
        1,
        file.line_count.max(1),
        rendering,
        json!({
            "total_declarations": parse.nodes.len(),
            "total_imports": parse.imports.len(),
            "total_exports": total_exports,
        }),
    )
}

/// Contiguous import region: the span from the first to the last import
/// line.
fn import_region(parse: &ParseResult) -> Option<(u32, u32)> {
    let min = parse.imports.iter().map(|i| i.line).min()?;
    let max = parse.imports.iter().map(|i| i.line).max()?;
    Some((min, max))
}

/// Top-level functions/methods and classes, in source order. Methods of a
/// class stay inside the class chunk.
fn top_level_nodes(parse: &ParseResult) -> Vec<&ParsedNode> {
    let mut nodes: Vec<&ParsedNode> = parse
        .nodes
        .iter()
        .filter(|n| {
            matches!(
                n.kind,
                NodeKind::Function
                    | NodeKind::Method
                    | NodeKind::Class
                    | NodeKind::Interface
                    | NodeKind::Enum
            )
        })
        .collect();
    nodes.sort_by_key(|n| n.start_line);
    nodes
}

/// Block chunks covering every gap left between covered regions, merged up
/// to `chunk_max_lines`.
fn block_chunks(
    file: &DiscoveredFile,
    lines: &[&str],
    repo_path: &str,
    refs: &ProjectRefs,
    opts: &ChunkerOptions,
    covered: &[(u32, u32)],
) -> Vec<CodeChunk> {
    let total = file.line_count;
    let mut sorted = covered.to_vec();
    sorted.sort_unstable();

    let mut gaps: Vec<(u32, u32)> = Vec::new();
    let mut cursor = 1u32;
    for &(start, end) in &sorted {
        if start > cursor {
            gaps.push((cursor, start - 1));
        }
        cursor = cursor.max(end + 1);
    }
    if cursor <= total {
        gaps.push((cursor, total));
    }

    // Adjacent sub-minimum statements already share a gap, so each gap is
    // one merged block, split only at the line cap.
    let mut chunks = Vec::new();
    for (start, end) in gaps {
        if slice_lines(lines, start, end).trim().is_empty() {
            continue;
        }
        chunks.extend(emit_block(file, lines, repo_path, refs, opts, start, end));
    }

    chunks
}

/// Emit one gap as block chunks, splitting at the line cap.
fn emit_block(
    file: &DiscoveredFile,
    lines: &[&str],
    repo_path: &str,
    refs: &ProjectRefs,
    opts: &ChunkerOptions,
    start: u32,
    end: u32,
) -> Vec<CodeChunk> {
    let mut chunks = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let mut window_end = (cursor + opts.chunk_max_lines - 1).min(end);
        // Absorb a sub-minimum trailing fragment into this window rather
        // than emitting it as its own sliver.
        if window_end < end && end - window_end < opts.chunk_min_lines {
            window_end = end;
        }
        let content = slice_lines(lines, cursor, window_end);
        if !content.trim().is_empty() {
            let metadata = json!({ "has_loops": has_loops(&content) });
            chunks.push(make_chunk(
                file,
                repo_path,
                refs,
                ChunkKind::Block,
                cursor,
                window_end,
                content,
                metadata,
            ));
        }
        cursor = window_end + 1;
    }
    chunks
}

/// Fixed-window fallback chunks when parsing recovered no structure.
fn fallback_chunks(
    file: &DiscoveredFile,
    lines: &[&str],
    repo_path: &str,
    refs: &ProjectRefs,
    opts: &ChunkerOptions,
    import_region: Option<(u32, u32)>,
) -> Vec<CodeChunk> {
    let total = file.line_count;
    let window = opts.fallback_window_lines.max(1);
    let mut chunks = Vec::new();
    let mut cursor = 1u32;

    while cursor <= total {
        let mut window_end = (cursor + window - 1).min(total);
        // Keep the import region out of fallback windows.
        if let Some((istart, iend)) = import_region {
            if cursor >= istart && cursor <= iend {
                cursor = iend + 1;
                continue;
            }
            if window_end >= istart && cursor < istart {
                window_end = istart - 1;
            }
        }
        let content = slice_lines(lines, cursor, window_end);
        if !content.trim().is_empty() {
            chunks.push(make_chunk(
                file,
                repo_path,
                refs,
                ChunkKind::Fallback,
                cursor,
                window_end,
                content,
                json!({ "window": window }),
            ));
        }
        cursor = window_end + 1;
    }
    chunks
}

#[expect(clippy::too_many_arguments)]
fn make_chunk(
    file: &DiscoveredFile,
    repo_path: &str,
    refs: &ProjectRefs,
    kind: ChunkKind,
    start_line: u32,
    end_line: u32,
    content: String,
    metadata: serde_json::Value,
) -> CodeChunk {
    let token_count = CodeChunk::estimate_tokens(&content);
    CodeChunk {
        chunk_id: Uuid::new_v4().to_string(),
        repo_path: repo_path.to_string(),
        file_path: file.relative_path.clone(),
        kind,
        start_line,
        end_line,
        content,
        language: file.language,
        token_count,
        embedding: Vec::new(),
        metadata,
        refs: refs.clone(),
    }
}

/// 1-indexed inclusive line slice.
fn slice_lines(lines: &[&str], start: u32, end: u32) -> String {
    let start = (start.max(1) - 1) as usize;
    let end = (end as usize).min(lines.len());
    if start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}

fn has_loops(text: &str) -> bool {
    text.contains("for ") || text.contains("for(") || text.contains("while ") || text.contains("while(")
}

fn collect_names(parse: &ParseResult, classes: bool) -> Vec<String> {
    parse
        .nodes
        .iter()
        .filter(|n| {
            if classes {
                matches!(n.kind, NodeKind::Class | NodeKind::Interface | NodeKind::Enum)
            } else {
                matches!(n.kind, NodeKind::Function | NodeKind::Method)
            }
        })
        .map(|n| n.name.clone())
        .filter(|n| !n.is_empty())
        .collect()
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

    fn default_opts() -> ChunkerOptions {
        ChunkerOptions {
            large_file_lines: 5_000,
            chunk_min_lines: 10,
            chunk_max_lines: 150,
            fallback_window_lines: 60,
            summary_head_lines: 50,
        }
    }

    #[test]
    fn emits_summary_import_and_function_chunks() {
        let content = "import { a } from './a';\n\
                       import { b } from './b';\n\
                       \n\
                       export function first() {\n  return a();\n}\n\
                       \n\
                       export function second() {\n  return b();\n}\n";
        let file = discovered("src/mod.ts", content, Language::TypeScript);
        let parse = fallback::extract(content, Language::TypeScript);
        let result = chunk(&file, &parse, content, "/repo", &ProjectRefs::default(), &default_opts());

        assert!(!result.structure_only);
        assert_eq!(result.chunks[0].kind, ChunkKind::FileSummary);
        assert_eq!(result.chunks[0].start_line, 1);
        assert_eq!(result.chunks[0].end_line, file.line_count);

        let import_block = result
            .chunks
            .iter()
            .find(|c| c.kind == ChunkKind::ImportBlock)
            .expect("import block");
        assert_eq!((import_block.start_line, import_block.end_line), (1, 2));

        let functions: Vec<_> =
            result.chunks.iter().filter(|c| c.kind == ChunkKind::Function).collect();
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].metadata["function_name"], "first");

        for c in &result.chunks {
            assert!(c.token_count >= 1);
        }
    }

    #[test]
    fn function_and_block_ranges_partition_the_body() {
        let content = "import x from 'x';\n\
                       \n\
                       const setup = 1;\n\
                       \n\
                       export function main() {\n  return setup;\n}\n\
                       \n\
                       const teardown = 2;\n";
        let file = discovered("src/a.ts", content, Language::TypeScript);
        let parse = fallback::extract(content, Language::TypeScript);
        let result = chunk(&file, &parse, content, "/repo", &ProjectRefs::default(), &default_opts());

        let mut body: Vec<(u32, u32)> = result
            .chunks
            .iter()
            .filter(|c| {
                matches!(c.kind, ChunkKind::Function | ChunkKind::Class | ChunkKind::Block | ChunkKind::Fallback)
            })
            .map(|c| (c.start_line, c.end_line))
            .collect();
        body.sort_unstable();

        // No overlaps among body chunks.
        for pair in body.windows(2) {
            assert!(pair[0].1 < pair[1].0, "overlap: {pair:?}");
        }
        // Every non-blank, non-import line is covered.
        for (idx, line) in content.lines().enumerate() {
            let line_no = (idx + 1) as u32;
            if line.trim().is_empty() || line_no == 1 {
                continue;
            }
            assert!(
                body.iter().any(|&(s, e)| s <= line_no && line_no <= e),
                "line {line_no} not covered"
            );
        }
    }

    #[test]
    fn large_file_takes_structure_only_path() {
        let mut content = String::from("import a from 'a';\nexport const A = 1;\nexport const B = 2;\n");
        for i in 0..6_000 {
            content.push_str(&format!("const filler{i} = {i};\n"));
        }
        let file = discovered("src/big.ts", &content, Language::TypeScript);
        let parse = fallback::extract(&content, Language::TypeScript);
        let result = chunk(&file, &parse, &content, "/repo", &ProjectRefs::default(), &default_opts());

        assert!(result.structure_only);
        assert_eq!(result.chunks.len(), 1);
        let only = &result.chunks[0];
        assert_eq!(only.kind, ChunkKind::StructureOnly);
        assert_eq!(only.start_line, 1);
        assert_eq!(only.end_line, file.line_count);
        assert!(only.metadata["total_imports"].as_u64().is_some());
        assert!(only.metadata["total_exports"].as_u64() >= Some(2));
    }

    #[test]
    fn fallback_windows_when_no_structure() {
        let mut content = String::new();
        for i in 0..130 {
            content.push_str(&format!("line {i}\n"));
        }
        let file = discovered("src/opaque.sql", &content, Language::Sql);
        let mut parse = ParseResult { success: true, ..Default::default() };
        parse.used_fallback = true;
        let result = chunk(&file, &parse, &content, "/repo", &ProjectRefs::default(), &default_opts());

        let windows: Vec<_> =
            result.chunks.iter().filter(|c| c.kind == ChunkKind::Fallback).collect();
        assert_eq!(windows.len(), 3); // 60 + 60 + 10
        assert_eq!((windows[0].start_line, windows[0].end_line), (1, 60));
        assert_eq!((windows[2].start_line, windows[2].end_line), (121, 130));
    }

    #[test]
    fn every_chunk_gets_a_unique_id() {
        let content = "export function one() {}\nexport function two() {}\n";
        let file = discovered("src/ids.ts", content, Language::TypeScript);
        let parse = fallback::extract(content, Language::TypeScript);
        let result = chunk(&file, &parse, content, "/repo", &ProjectRefs::default(), &default_opts());
        let mut ids: Vec<_> = result.chunks.iter().map(|c| c.chunk_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), result.chunks.len());
    }
}

//! Regex fallback extractor.
//!
//! Recovers function signatures, class/interface headers, and
//! import/export lines from common languages when no structural parser is
//! available. Line numbers are 1-indexed and node ranges are estimated by
//! brace balance (brace languages) or indentation (Python).

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{
    ExportRecord, ImportRecord, Language, NodeKind, ParseResult, ParsedNode,
};

/// Compile a pattern known valid at authoring time.
#[expect(clippy::expect_used)]
fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

static FN_JS: LazyLock<Regex> = LazyLock::new(|| {
    re(
        r"^\s*(?:export\s+)?(?:default\s+)?(?:(async)\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*\(([^)]*)\)",
    )
});

static ARROW_JS: LazyLock<Regex> = LazyLock::new(|| {
    re(
        r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=\s*(?:(async)\s+)?(?:\(([^)]*)\)|[A-Za-z_$][\w$]*)\s*=>",
    )
});

static CLASS_JS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)")
});

static IFACE_TS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^\s*(?:export\s+)?interface\s+([A-Za-z_$][\w$]*)")
});

static TYPE_TS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^\s*(?:export\s+)?type\s+([A-Za-z_$][\w$]*)\s*=")
});

static CONST_JS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^\s*(?:export\s+)?const\s+([A-Z][A-Z0-9_]*)\s*=")
});

static FN_PY: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(\s*)(?:(async)\s+)?def\s+([A-Za-z_]\w*)\s*\(([^)]*)\)")
});

static CLASS_PY: LazyLock<Regex> =
    LazyLock::new(|| re(r"^class\s+([A-Za-z_]\w*)"));

static FN_RS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^\s*(pub(?:\([^)]*\))?\s+)?(?:(async)\s+)?fn\s+([A-Za-z_]\w*)")
});

static TYPE_RS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^\s*(pub(?:\([^)]*\))?\s+)?(struct|enum|trait)\s+([A-Za-z_]\w*)")
});

static FN_GO: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^func\s+(?:\([^)]*\)\s+)?([A-Za-z_]\w*)\s*\(([^)]*)\)")
});

static TYPE_GO: LazyLock<Regex> =
    LazyLock::new(|| re(r"^type\s+([A-Za-z_]\w*)\s+(?:struct|interface)"));

static CLASS_JVM: LazyLock<Regex> = LazyLock::new(|| {
    re(
        r"^\s*(?:(public|protected|private)\s+)?(?:static\s+)?(?:final\s+)?(?:abstract\s+)?(class|interface|enum)\s+([A-Za-z_]\w*)",
    )
});

static IMPORT_ES: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"^\s*import\s+(?:(.+?)\s+from\s+)?['"]([^'"]+)['"]"#)
});

static REQUIRE_JS: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"^\s*(?:const|let|var)\s+(.+?)\s*=\s*require\(\s*['"]([^'"]+)['"]\s*\)"#)
});

static IMPORT_PY: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?:from\s+([\w.]+)\s+import\s+(.+)|import\s+([\w.]+(?:\s*,\s*[\w.]+)*))")
});

static IMPORT_RS: LazyLock<Regex> =
    LazyLock::new(|| re(r"^\s*(?:pub\s+)?use\s+([\w:]+)"));

static IMPORT_GO: LazyLock<Regex> =
    LazyLock::new(|| re(r#"^\s*(?:import\s+)?(?:[A-Za-z_]\w*\s+)?"([^"]+)"\s*$"#));

static EXPORT_NAMED: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"^\s*export\s*\{([^}]*)\}(?:\s*from\s*['"]([^'"]+)['"])?"#)
});

static EXPORT_DECL: LazyLock<Regex> = LazyLock::new(|| {
    re(
        r"^\s*export\s+(?:default\s+)?(?:async\s+)?(?:function\s*\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
    )
});

static EXPORT_STAR: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"^\s*export\s+\*\s+from\s+['"]([^'"]+)['"]"#)
});

static BRANCH_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"\b(if|for|while|case|catch|elif|match|when)\b|&&|\|\|")
});

/// Extract structure from `content` using language-appropriate regexes.
///
/// Always returns `success = true`: the fallback can legitimately find
/// nothing in an empty or opaque file, and the chunker handles that.
pub fn extract(content: &str, language: Language) -> ParseResult {
    let lines: Vec<&str> = content.lines().collect();
    let mut nodes = Vec::new();
    let mut imports = Vec::new();
    let mut exports = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        #[expect(clippy::cast_possible_truncation)]
        let line_no = (idx + 1) as u32;

        scan_imports(line, line_no, language, &mut imports);
        scan_exports(line, line_no, &mut exports);

        if let Some(node) = scan_declaration(line, idx, &lines, language) {
            nodes.push(node);
        }
    }

    // Nested declarations are left to structural parsers; the fallback
    // keeps only the outermost nodes.
    nodes = drop_contained(nodes);

    ParseResult {
        success: true,
        used_fallback: false,
        nodes,
        imports,
        exports,
        error: None,
    }
}

fn scan_declaration(
    line: &str,
    idx: usize,
    lines: &[&str],
    language: Language,
) -> Option<ParsedNode> {
    #[expect(clippy::cast_possible_truncation)]
    let start_line = (idx + 1) as u32;

    let (kind, name, params, is_async, is_public) = match language {
        Language::Python => {
            if let Some(c) = FN_PY.captures(line) {
                let indented = !c.get(1).map_or("", |m| m.as_str()).is_empty();
                let kind = if indented { NodeKind::Method } else { NodeKind::Function };
                let name = c[3].to_string();
                let public = !name.starts_with('_');
                (kind, name, split_params(&c[4]), c.get(2).is_some(), public)
            } else if let Some(c) = CLASS_PY.captures(line) {
                let name = c[1].to_string();
                let public = !name.starts_with('_');
                (NodeKind::Class, name, Vec::new(), false, public)
            } else {
                return None;
            }
        }
        Language::Rust => {
            if let Some(c) = FN_RS.captures(line) {
                (
                    NodeKind::Function,
                    c[3].to_string(),
                    Vec::new(),
                    c.get(2).is_some(),
                    c.get(1).is_some(),
                )
            } else if let Some(c) = TYPE_RS.captures(line) {
                let kind = if &c[2] == "trait" { NodeKind::Interface } else { NodeKind::Class };
                (kind, c[3].to_string(), Vec::new(), false, c.get(1).is_some())
            } else {
                return None;
            }
        }
        Language::Go => {
            if let Some(c) = FN_GO.captures(line) {
                let name = c[1].to_string();
                let public = name.chars().next().is_some_and(char::is_uppercase);
                (NodeKind::Function, name, split_params(&c[2]), false, public)
            } else if let Some(c) = TYPE_GO.captures(line) {
                let name = c[1].to_string();
                let public = name.chars().next().is_some_and(char::is_uppercase);
                (NodeKind::Class, name, Vec::new(), false, public)
            } else {
                return None;
            }
        }
        Language::Java | Language::CSharp | Language::Kotlin => {
            if let Some(c) = CLASS_JVM.captures(line) {
                let kind = if &c[2] == "interface" { NodeKind::Interface } else { NodeKind::Class };
                let public = c.get(1).map_or(true, |m| m.as_str() == "public");
                (kind, c[3].to_string(), Vec::new(), false, public)
            } else {
                return None;
            }
        }
        _ => {
            // JavaScript/TypeScript family, and the default for everything else.
            if let Some(c) = FN_JS.captures(line) {
                let exported = line.trim_start().starts_with("export");
                (
                    NodeKind::Function,
                    c[2].to_string(),
                    split_params(c.get(3).map_or("", |m| m.as_str())),
                    c.get(1).is_some(),
                    exported,
                )
            } else if let Some(c) = ARROW_JS.captures(line) {
                let exported = line.trim_start().starts_with("export");
                (
                    NodeKind::Function,
                    c[1].to_string(),
                    split_params(c.get(3).map_or("", |m| m.as_str())),
                    c.get(2).is_some(),
                    exported,
                )
            } else if let Some(c) = CLASS_JS.captures(line) {
                let exported = line.trim_start().starts_with("export");
                (NodeKind::Class, c[1].to_string(), Vec::new(), false, exported)
            } else if let Some(c) = IFACE_TS.captures(line) {
                let exported = line.trim_start().starts_with("export");
                (NodeKind::Interface, c[1].to_string(), Vec::new(), false, exported)
            } else if let Some(c) = TYPE_TS.captures(line) {
                let exported = line.trim_start().starts_with("export");
                (NodeKind::TypeAlias, c[1].to_string(), Vec::new(), false, exported)
            } else if let Some(c) = CONST_JS.captures(line) {
                let exported = line.trim_start().starts_with("export");
                (NodeKind::Constant, c[1].to_string(), Vec::new(), false, exported)
            } else {
                return None;
            }
        }
    };

    let end_idx = if language == Language::Python {
        python_block_end(idx, lines)
    } else {
        brace_block_end(idx, lines)
    };
    #[expect(clippy::cast_possible_truncation)]
    let end_line = (end_idx + 1) as u32;

    let text = lines[idx..=end_idx].join("\n");
    let complexity = estimate_complexity(&text);
    let docstring = leading_docstring(idx, lines);

    Some(ParsedNode {
        kind,
        name,
        start_line,
        end_line,
        text,
        parameters: params,
        return_type: None,
        is_public,
        is_async,
        is_static: line.contains("static "),
        docstring,
        complexity,
        children: Vec::new(),
    })
}

fn scan_imports(line: &str, line_no: u32, language: Language, imports: &mut Vec<ImportRecord>) {
    match language {
        Language::Python => {
            if let Some(c) = IMPORT_PY.captures(line) {
                if let Some(module) = c.get(1) {
                    let symbols: Vec<String> = c[2]
                        .split(',')
                        .map(|s| s.trim().split_whitespace().next().unwrap_or("").to_string())
                        .filter(|s| !s.is_empty() && s != "(")
                        .collect();
                    imports.push(ImportRecord {
                        source: module.as_str().to_string(),
                        symbols,
                        is_default: false,
                        is_namespace: false,
                        line: line_no,
                    });
                } else if let Some(modules) = c.get(3) {
                    for module in modules.as_str().split(',') {
                        imports.push(ImportRecord {
                            source: module.trim().to_string(),
                            symbols: Vec::new(),
                            is_default: false,
                            is_namespace: true,
                            line: line_no,
                        });
                    }
                }
            }
        }
        Language::Rust => {
            if let Some(c) = IMPORT_RS.captures(line) {
                imports.push(ImportRecord {
                    source: c[1].to_string(),
                    symbols: Vec::new(),
                    is_default: false,
                    is_namespace: false,
                    line: line_no,
                });
            }
        }
        Language::Go => {
            if let Some(c) = IMPORT_GO.captures(line) {
                imports.push(ImportRecord {
                    source: c[1].to_string(),
                    symbols: Vec::new(),
                    is_default: false,
                    is_namespace: true,
                    line: line_no,
                });
            }
        }
        _ => {
            if let Some(c) = IMPORT_ES.captures(line) {
                let clause = c.get(1).map_or("", |m| m.as_str());
                let (symbols, is_default, is_namespace) = parse_es_import_clause(clause);
                imports.push(ImportRecord {
                    source: c[2].to_string(),
                    symbols,
                    is_default,
                    is_namespace,
                    line: line_no,
                });
            } else if let Some(c) = REQUIRE_JS.captures(line) {
                let clause = c[1].trim();
                let symbols = if clause.starts_with('{') {
                    clause
                        .trim_matches(|ch| ch == '{' || ch == '}')
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                } else {
                    vec![clause.to_string()]
                };
                imports.push(ImportRecord {
                    source: c[2].to_string(),
                    symbols,
                    is_default: !clause.starts_with('{'),
                    is_namespace: false,
                    line: line_no,
                });
            }
        }
    }
}

fn scan_exports(line: &str, line_no: u32, exports: &mut Vec<ExportRecord>) {
    if let Some(c) = EXPORT_NAMED.captures(line) {
        let symbols: Vec<String> = c[1]
            .split(',')
            .map(|s| s.trim().split_whitespace().next().unwrap_or("").to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let reexport_source = c.get(2).map(|m| m.as_str().to_string());
        exports.push(ExportRecord {
            symbols,
            is_default: false,
            is_reexport: reexport_source.is_some(),
            reexport_source,
            line: line_no,
        });
    } else if let Some(c) = EXPORT_STAR.captures(line) {
        exports.push(ExportRecord {
            symbols: Vec::new(),
            is_default: false,
            is_reexport: true,
            reexport_source: Some(c[1].to_string()),
            line: line_no,
        });
    } else if let Some(c) = EXPORT_DECL.captures(line) {
        exports.push(ExportRecord {
            symbols: vec![c[1].to_string()],
            is_default: line.contains("export default"),
            is_reexport: false,
            reexport_source: None,
            line: line_no,
        });
    }
}

/// `import` clause shapes: `x`, `* as ns`, `{ a, b as c }`, `x, { a }`.
fn parse_es_import_clause(clause: &str) -> (Vec<String>, bool, bool) {
    let clause = clause.trim();
    if clause.is_empty() {
        return (Vec::new(), false, false);
    }
    if clause.starts_with("* as") {
        return (vec![clause.trim_start_matches("* as").trim().to_string()], false, true);
    }
    let mut symbols = Vec::new();
    let mut is_default = false;
    let mut rest = clause;
    if !clause.starts_with('{') {
        let (default_name, tail) = clause.split_once(',').unwrap_or((clause, ""));
        symbols.push(default_name.trim().to_string());
        is_default = true;
        rest = tail;
    }
    if let Some(open) = rest.find('{') {
        let inner = rest[open + 1..].trim_end_matches(['}', ' ']);
        for part in inner.split(',') {
            let name = part.trim().split_whitespace().next().unwrap_or("");
            if !name.is_empty() {
                symbols.push(name.to_string());
            }
        }
    }
    (symbols, is_default, false)
}

/// Find the end of a brace-delimited block starting at `start`. Falls back
/// to the declaration line itself when no opening brace follows.
fn brace_block_end(start: usize, lines: &[&str]) -> usize {
    let mut depth: i64 = 0;
    let mut opened = false;
    for (offset, line) in lines[start..].iter().enumerate() {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return start + offset;
        }
        // Single-line declarations without a body (type aliases, consts).
        if !opened && offset == 0 && line.trim_end().ends_with(';') {
            return start;
        }
        // Give up after a window; the declaration line alone is still useful.
        if offset > 400 {
            break;
        }
    }
    if opened { lines.len() - 1 } else { start }
}

/// Find the end of an indentation-delimited block (Python).
fn python_block_end(start: usize, lines: &[&str]) -> usize {
    let base_indent = indent_of(lines[start]);
    let mut end = start;
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= base_indent {
            break;
        }
        end = start + 1 + offset;
    }
    end
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn leading_docstring(idx: usize, lines: &[&str]) -> Option<String> {
    if idx == 0 {
        return None;
    }
    let prev = lines[idx - 1].trim();
    if prev.starts_with("///") || prev.starts_with("//") || prev.starts_with('#') || prev.starts_with('*')
    {
        Some(prev.trim_start_matches(['/', '#', '*', ' ']).to_string()).filter(|s| !s.is_empty())
    } else {
        None
    }
}

fn split_params(params: &str) -> Vec<String> {
    params
        .split(',')
        .map(|p| p.trim().split([':', '=']).next().unwrap_or("").trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Branch-keyword count plus one.
pub fn estimate_complexity(text: &str) -> u32 {
    #[expect(clippy::cast_possible_truncation)]
    let branches = BRANCH_KEYWORDS.find_iter(text).count() as u32;
    branches + 1
}

/// Drop nodes fully contained in an earlier node's line range.
fn drop_contained(nodes: Vec<ParsedNode>) -> Vec<ParsedNode> {
    let mut kept: Vec<ParsedNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        let contained = kept
            .iter()
            .any(|outer| outer.start_line < node.start_line && node.end_line <= outer.end_line);
        if !contained {
            kept.push(node);
        }
    }
    kept
}

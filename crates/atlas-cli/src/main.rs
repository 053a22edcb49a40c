//! CodeAtlas CLI.
//!
//! Command-line interface for indexing, searching, and managing
//! CodeAtlas indexes. The MCP server lives in its own binary
//! (`atlas-mcp`); this tool covers operator workflows.

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use atlas_core::config::Config;
use atlas_core::engine::Engine;
use atlas_core::index::IndexOptions;
use atlas_core::retrieval::SearchOptions;
use atlas_core::store::{SearchFilter, Store};
use atlas_core::types::RepoType;

/// CodeAtlas -- code-aware retrieval engine
#[derive(Parser, Debug)]
#[command(name = "codeatlas", version, about = "Index repositories and search them with ranked code context")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Log level.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index a repository.
    Index {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,

        /// Stable repository id (defaults to the directory name).
        #[arg(long)]
        repo_id: Option<String>,

        /// Repository type (monolithic, microservice, monorepo, library,
        /// reference, documentation).
        #[arg(long)]
        repo_type: Option<String>,

        /// Force full reindex, ignoring unchanged hashes.
        #[arg(long)]
        force: bool,

        /// Use rule-based summaries only (no LLM calls).
        #[arg(long)]
        rule_based_summaries: bool,
    },

    /// Search the indexed codebase.
    Search {
        /// Search query (natural language or pasted code).
        query: String,

        /// Maximum number of files.
        #[arg(long, default_value_t = 15)]
        max_files: usize,

        /// Maximum number of chunks.
        #[arg(long, default_value_t = 25)]
        max_snippets: usize,

        /// Include reference repositories.
        #[arg(long)]
        include_references: bool,

        /// Print the raw JSON result instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Status,

    /// List indexed repositories.
    Repos,

    /// Delete an indexed repository and all of its rows.
    Delete {
        /// Repository id.
        repo_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.as_str())
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::load(Some(std::path::Path::new("."))) {
        Ok(config) => config,
        Err(e) => {
            report_fatal(&e);
            std::process::exit(1);
        }
    };
    let engine = match Engine::from_config(config) {
        Ok(engine) => engine,
        Err(e) => {
            report_fatal(&e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Index { path, repo_id, repo_type, force, rule_based_summaries } => {
            let repo_type = match repo_type.as_deref() {
                None => None,
                Some(raw @ ("monolithic" | "microservice" | "monorepo" | "library" | "reference"
                | "documentation")) => Some(RepoType::from_str_lossy(raw)),
                Some(other) => {
                    eprintln!("unknown repo type `{other}`");
                    std::process::exit(1);
                }
            };

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_message(format!("indexing {path}"));
            spinner.enable_steady_tick(std::time::Duration::from_millis(120));

            let opts = IndexOptions {
                repo_id,
                repo_type,
                force_reindex: force,
                rule_based_summaries,
                ..IndexOptions::default()
            };
            let result = engine
                .indexer
                .index(std::path::Path::new(&path), &opts, &CancellationToken::new())
                .await;
            spinner.finish_and_clear();

            match result {
                Ok(stats) => {
                    println!(
                        "indexed {path}: {} files ({} new, {} skipped, {} failed), {} chunks, {} symbols in {} ms",
                        stats.files_total,
                        stats.files_indexed_new,
                        stats.files_skipped,
                        stats.files_failed,
                        stats.chunks_total,
                        stats.symbols_extracted,
                        stats.total_time_ms,
                    );
                    for error in &stats.errors {
                        eprintln!("  failed {} at {}: {}", error.file_path, error.stage.as_str(), error.message);
                    }
                }
                Err(e) => {
                    report_fatal(&e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Search { query, max_files, max_snippets, include_references, json } => {
            let mut opts = SearchOptions::from_config(&engine.config);
            opts.max_files = max_files.clamp(1, 50);
            opts.max_snippets = max_snippets.clamp(1, 100);
            opts.filter = SearchFilter { include_references, ..SearchFilter::default() };

            match engine.pipeline.search(&query, &opts, &CancellationToken::new()).await {
                Ok(result) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    } else {
                        println!(
                            "{} file(s), {} chunk(s), {} symbol(s), {} tokens",
                            result.context.files.len(),
                            result.context.chunks.len(),
                            result.context.symbols.len(),
                            result.context.total_tokens,
                        );
                        for warning in &result.warnings {
                            println!("  ! {:?}: {}", warning.kind, warning.message);
                        }
                        for file in &result.context.files {
                            println!("\n{} ({:.3})\n  {}", file.file_path, file.similarity, file.summary);
                        }
                        for hit in &result.context.chunks {
                            println!(
                                "\n--- {} L{}-L{} ({:.3}) ---\n{}",
                                hit.chunk.file_path,
                                hit.chunk.start_line,
                                hit.chunk.end_line,
                                hit.similarity,
                                hit.chunk.content,
                            );
                        }
                    }
                }
                Err(e) => {
                    report_fatal(&e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Status => {
            let counts = engine.store.counts()?;
            println!("repositories: {}", counts.repositories);
            println!("files:        {}", counts.files);
            println!("chunks:       {}", counts.chunks);
            println!("symbols:      {}", counts.symbols);
        }

        Commands::Repos => {
            let repositories = engine.store.list_repositories()?;
            if repositories.is_empty() {
                println!("no repositories indexed");
            }
            for repo in repositories {
                println!("{}\t{}\t{}", repo.repo_id, repo.repo_type, repo.repo_path);
            }
        }

        Commands::Delete { repo_id } => {
            let files = engine.store.delete_repository_cascade(&repo_id)?;
            println!("deleted `{repo_id}` ({files} files)");
        }
    }

    Ok(())
}

fn report_fatal(error: &atlas_core::AtlasError) {
    let (headline, hint) = error.headline_and_hint();
    eprintln!("error: {headline}");
    if let Some(hint) = hint {
        eprintln!("hint: {hint}");
    }
}

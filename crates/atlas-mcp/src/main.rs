//! CodeAtlas MCP server.
//!
//! Exposes the indexing and retrieval engine to AI agents over the Model
//! Context Protocol on stdio. Exits 1 on fatal initialization failures
//! (bad configuration, unreachable store, schema mismatch) and 0 on a
//! clean shutdown.

mod tools;

use anyhow::Result;
use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};

use atlas_core::{Config, Engine};

/// CodeAtlas MCP server
#[derive(Parser, Debug)]
#[command(name = "atlas-mcp", version, about)]
struct Args {
    /// Project root used to locate `.codeatlas/config.toml`.
    #[arg(long, default_value = ".")]
    project: String,

    /// Log level filter.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr: stdout belongs to the MCP transport.
    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.as_str())
        .with_writer(std::io::stderr)
        .init();

    let project = std::path::PathBuf::from(&args.project);
    let config = match Config::load(Some(project.as_path())) {
        Ok(config) => config,
        Err(e) => {
            let (headline, hint) = e.headline_and_hint();
            tracing::error!(error = %headline, hint = hint.unwrap_or(""), "configuration failed");
            std::process::exit(1);
        }
    };

    let engine = match Engine::from_config(config) {
        Ok(engine) => engine,
        Err(e) => {
            let (headline, hint) = e.headline_and_hint();
            tracing::error!(error = %headline, hint = hint.unwrap_or(""), "engine init failed");
            std::process::exit(1);
        }
    };

    tracing::info!("CodeAtlas MCP server starting on stdio");
    let service = tools::AtlasServer::new(engine).serve(stdio()).await?;
    service.waiting().await?;
    tracing::info!("CodeAtlas MCP server shut down");

    Ok(())
}

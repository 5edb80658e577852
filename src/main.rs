//! Thin CLI front end over the indexing engine.
//!
//! Wires the orchestrator to the built-in chunking parser and in-memory
//! store. All behavior lives in the library; this binary only parses
//! arguments and prints reports.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use quarry::indexing::IndexOrchestrator;
use quarry::parsing::ChunkingParser;
use quarry::storage::MemoryStore;
use quarry::types::IndexReport;
use quarry::{ChangeWatcher, Settings};

#[derive(Parser)]
#[command(name = "quarry", version, about = "Resilient code indexing engine")]
struct Cli {
    /// Path to a settings file (defaults to .quarry/settings.toml lookup)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
    /// Fully index a project directory
    Index { path: PathBuf },
    /// Re-index only the given files
    Update {
        path: PathBuf,
        /// Changed files, relative to the project root or absolute
        files: Vec<PathBuf>,
    },
    /// Delete all artifacts for a project
    Delete { path: PathBuf },
    /// Show indexing state and snippet statistics
    Status { path: PathBuf },
    /// Watch a project and index changes as they settle
    Watch {
        path: PathBuf,
        /// Debounce window in milliseconds
        #[arg(long, default_value_t = 500)]
        debounce_ms: u64,
    },
}

fn load_settings(config: Option<&PathBuf>) -> Result<Settings> {
    let settings = match config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| anyhow::anyhow!("failed to load settings: {e}"))?;
    Ok(settings)
}

fn build_orchestrator(settings: Settings) -> Result<Arc<IndexOrchestrator>> {
    let settings = Arc::new(settings);
    let parser = Arc::new(ChunkingParser::from_config(&settings.indexing));
    let store = Arc::new(MemoryStore::new());

    let orchestrator = IndexOrchestrator::new(settings, parser, store)
        .context("failed to build orchestrator")?;
    Ok(Arc::new(orchestrator))
}

fn print_report(report: &IndexReport) {
    if report.success {
        println!(
            "indexed {} files ({} chunks, {} failed) in {:?}",
            report.files_processed, report.chunks_stored, report.files_failed, report.elapsed
        );
    } else {
        eprintln!("indexing failed:");
        for error in &report.errors {
            eprintln!("  {error}");
        }
    }
    if let Some(project_id) = &report.project_id {
        println!("project: {project_id}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Init { force } = &cli.command {
        let path = Settings::init_config_file(*force)
            .map_err(|e| anyhow::anyhow!("init failed: {e}"))?;
        println!("configuration ready at {}", path.display());
        return Ok(());
    }

    let settings = load_settings(cli.config.as_ref())?;
    quarry::logging::init_with_config(&settings.logging);

    match cli.command {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Index { path } => {
            let orchestrator = build_orchestrator(settings)?;
            let report = orchestrator.create_index(&path).await?;
            print_report(&report);
            if !report.success {
                std::process::exit(1);
            }
        }
        Command::Update { path, files } => {
            let orchestrator = build_orchestrator(settings)?;
            let report = orchestrator.update_index(&path, &files).await;
            print_report(&report);
            if !report.success {
                std::process::exit(1);
            }
        }
        Command::Delete { path } => {
            let orchestrator = build_orchestrator(settings)?;
            if orchestrator.delete_index(&path).await {
                println!("deleted index for {}", path.display());
            } else {
                eprintln!("delete failed for {}", path.display());
                std::process::exit(1);
            }
        }
        Command::Status { path } => {
            let orchestrator = build_orchestrator(settings)?;
            let status = orchestrator.get_status(&path).await?;
            println!("project: {}", status.project_id);
            println!("indexing: {}", status.is_indexing);
            if let Some(stats) = status.statistics {
                println!(
                    "snippets: {} total, {} stored, {} duplicates",
                    stats.total_snippets, stats.processed_snippets, stats.duplicate_snippets
                );
            }
        }
        Command::Watch { path, debounce_ms } => {
            let orchestrator = build_orchestrator(settings)?;
            orchestrator.monitor().start_monitoring();

            // Seed the index so incremental changes apply to something.
            let report = orchestrator.create_index(&path).await?;
            print_report(&report);

            let watcher = ChangeWatcher::new(path, Arc::clone(&orchestrator), debounce_ms)?;
            let cancel = watcher.cancel_token();

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });

            watcher.watch().await?;
        }
    }

    Ok(())
}

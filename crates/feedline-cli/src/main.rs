//! feedline - paginated API to document store ETL
//!
//! Pulls records page by page from a JSON API, stamps them with identity
//! and lineage metadata, and writes them in batches to a local document store.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "feedline")]
#[command(about = "Paginated API to document store ETL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./feedline.toml or ~/.config/feedline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, transform and load the configured endpoints
    Run(cmd::run::RunArgs),
    /// Inspect the document store
    Store(cmd::store::StoreArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env first so config defaults and ${VAR} expansion can see it
    let dotenv = dotenvy::dotenv().ok();

    let progress = Arc::new(feedline_core::ProgressContext::new());
    let multi = progress.is_tty().then(|| progress.multi());
    feedline_core::init_logging(cli.quiet, cli.debug, multi).context("failed to init logger")?;
    if let Some(path) = dotenv {
        log::debug!("Loaded environment from {}", path.display());
    }

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, &progress),
        Command::Store(args) => cmd::store::run(args, &config),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            let src = &config.source;
            table.add_row(vec![
                "Base URL",
                src.base_url.as_deref().unwrap_or("not set"),
            ]);
            table.add_row(vec!["Connector", &src.connector]);
            table.add_row(vec![
                "Token",
                match (&src.token, &src.auth_header) {
                    (None, _) => "not set",
                    (Some(_), None) => "configured (bearer)",
                    (Some(_), Some(_)) => "configured (header)",
                },
            ]);
            table.add_row(vec!["Timeout", &format!("{}s", src.timeout_secs)]);
            table.add_row(vec!["Min interval", &format!("{}ms", src.min_interval_ms)]);
            table.add_row(vec![
                "Max retries",
                &config
                    .retry
                    .max_attempts
                    .map_or("unbounded".to_string(), |n| n.to_string()),
            ]);
            table.add_row(vec!["Batch size", &config.load.batch_size.to_string()]);
            table.add_row(vec!["Upsert", &config.load.upsert.to_string()]);
            table.add_row(vec![
                "Store directory",
                &config.load.store_dir.display().to_string(),
            ]);
            let endpoints = config.endpoints(None)?;
            table.add_row(vec![
                "Endpoints",
                &endpoints
                    .iter()
                    .map(|e| format!("{} → {}", e.label(), e.namespace(&src.connector)))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}

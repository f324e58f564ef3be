//! `feedline store` - inspect the document store

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use feedline_core::fmt_num;
use feedline_store::{DirStore, DocumentStore};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub action: StoreAction,
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    /// List namespaces and their document counts
    List {
        /// Store directory (default: [load] store_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Print the documents of one namespace as JSON lines
    Show {
        namespace: String,

        /// Store directory (default: [load] store_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Maximum documents to print
        #[arg(short = 'l', long, default_value_t = 10)]
        limit: usize,
    },
}

pub fn run(args: StoreArgs, config: &Config) -> Result<()> {
    match args.action {
        StoreAction::List { dir } => list(&dir.unwrap_or_else(|| config.load.store_dir.clone())),
        StoreAction::Show {
            namespace,
            dir,
            limit,
        } => show(
            &dir.unwrap_or_else(|| config.load.store_dir.clone()),
            &namespace,
            limit,
        ),
    }
}

fn open(dir: &Path) -> Result<DirStore> {
    DirStore::open(dir).with_context(|| format!("failed to open store at {}", dir.display()))
}

fn list(dir: &Path) -> Result<()> {
    let store = open(dir)?;
    let namespaces = store.namespaces()?;

    if namespaces.is_empty() {
        eprintln!("No namespaces in {}.", dir.display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Namespace").fg(Color::Cyan),
            Cell::new("Documents").fg(Color::Cyan),
        ]);

    let mut total = 0;
    for ns in &namespaces {
        total += ns.documents;
        table.add_row(vec![Cell::new(&ns.name), Cell::new(fmt_num(ns.documents))]);
    }

    eprintln!("\n{table}");
    eprintln!(
        "{} namespaces, {} documents total",
        namespaces.len(),
        fmt_num(total)
    );
    Ok(())
}

fn show(dir: &Path, namespace: &str, limit: usize) -> Result<()> {
    let store = open(dir)?;
    let docs = store.documents(namespace)?;
    for doc in docs.iter().take(limit) {
        println!("{}", serde_json::to_string(doc)?);
    }
    if docs.len() > limit {
        eprintln!("… {} more", fmt_num(docs.len() - limit));
    }
    Ok(())
}

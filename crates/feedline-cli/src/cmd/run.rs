//! `feedline run` - extract, transform and load every configured endpoint

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use feedline_core::{
    DEFAULT_PREVIEW, Pipeline, ReqwestTransport, RunOptions, SharedProgress, StopHandle, Summary,
    fmt_num, format_iso8601, shutdown_flag, system_clock,
};
use feedline_store::{DirStore, DocumentStore, MemoryStore};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Only fetch records updated since this time (YYYY-MM-DD or RFC 3339)
    #[arg(short, long, value_parser = parse_since)]
    pub since: Option<DateTime<Utc>>,

    /// Stop after this many transformed documents per endpoint
    #[arg(short = 'l', long)]
    pub limit: Option<usize>,

    /// Extract and transform only, print a preview instead of writing
    #[arg(long)]
    pub dry_run: bool,

    /// Documents printed by --dry-run
    #[arg(long, default_value_t = DEFAULT_PREVIEW)]
    pub preview: usize,

    /// Upsert documents that carry an `_id` (default: [load] upsert)
    #[arg(long, conflicts_with = "no_upsert")]
    pub upsert: bool,

    /// Always insert, even documents that carry an `_id`
    #[arg(long)]
    pub no_upsert: bool,

    /// Run only the endpoint with this name (or path)
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Operations per bulk write
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Stop cleanly after this many seconds
    #[arg(long)]
    pub max_runtime: Option<u64>,

    /// Store directory (default: [load] store_dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

fn parse_since(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("Invalid date format: {e}"))
        .and_then(|d| {
            d.and_hms_opt(0, 0, 0)
                .map(|t| t.and_utc())
                .ok_or_else(|| "Invalid date".to_string())
        })
}

fn resolve_upsert(args: &RunArgs, config: &Config) -> bool {
    if args.upsert {
        true
    } else if args.no_upsert {
        false
    } else {
        config.load.upsert
    }
}

fn setup_signal_handler() -> Result<()> {
    // First signal: set graceful shutdown flag
    // Second signal: force exit
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        let flag = shutdown_flag();
        // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
        let registered = unsafe {
            signal_hook::low_level::register(signal, move || {
                if flag.swap(true, Ordering::Relaxed) {
                    std::process::exit(130);
                }
            })
        };
        registered.with_context(|| format!("failed to register handler for signal {signal}"))?;
    }
    Ok(())
}

pub fn run(args: RunArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let source = config.source_config()?;
    let endpoints = config.endpoints(args.endpoint.as_deref())?;
    let opts = RunOptions {
        since: args.since.map(format_iso8601),
        limit: args.limit,
        dry_run: args.dry_run,
        upsert: resolve_upsert(&args, config),
        batch_size: args.batch_size.unwrap_or(config.load.batch_size),
        preview: args.preview,
    };

    setup_signal_handler()?;
    let stop = shutdown_flag();
    if let Some(secs) = args.max_runtime {
        StopHandle::new(stop.clone()).stop_after(Duration::from_secs(secs));
    }

    let store: Box<dyn DocumentStore> = if opts.dry_run {
        Box::new(MemoryStore::new())
    } else {
        let dir = args.output.unwrap_or_else(|| config.load.store_dir.clone());
        Box::new(
            DirStore::open_for_writing(&dir)
                .with_context(|| format!("failed to open store at {}", dir.display()))?,
        )
    };

    log::info!(
        "{}: {} endpoint(s) from {}",
        source.connector,
        endpoints.len(),
        source.base_url
    );
    let pipeline = Pipeline::new(source, Arc::new(ReqwestTransport::new()), system_clock())
        .with_stop_flag(stop.clone())
        .with_progress(progress.clone());

    let summaries = pipeline
        .run_all(&endpoints, store.as_ref(), &opts)
        .context("pipeline run failed")?;

    if opts.dry_run {
        print_previews(&summaries)?;
    }
    print_summary(&summaries);

    if stop.load(Ordering::Relaxed) {
        bail!("interrupted");
    }
    Ok(())
}

/// Pretty JSON of the first documents of each endpoint, on stdout
fn print_previews(summaries: &[Summary]) -> Result<()> {
    for s in summaries {
        eprintln!(
            "Dry run: {} transformed {} documents, showing {}",
            s.endpoint,
            fmt_num(s.transformed),
            s.preview.len()
        );
        for doc in &s.preview {
            println!("{}", serde_json::to_string_pretty(doc)?);
        }
    }
    Ok(())
}

/// Per-endpoint summary table on stderr
fn print_summary(summaries: &[Summary]) {
    if summaries.is_empty() {
        eprintln!("No endpoints were run.");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Endpoint").fg(Color::Cyan),
            Cell::new("Namespace").fg(Color::Cyan),
            Cell::new("Pages").fg(Color::Cyan),
            Cell::new("Records").fg(Color::Cyan),
            Cell::new("Transformed").fg(Color::Cyan),
            Cell::new("Skipped").fg(Color::Cyan),
            Cell::new("Written").fg(Color::Cyan),
            Cell::new("Failed batches").fg(Color::Cyan),
            Cell::new("Time").fg(Color::Cyan),
        ]);

    for s in summaries {
        let (written, failed) = match &s.load {
            Some(load) => {
                let failed = if load.failed_batches > 0 {
                    Cell::new(load.failed_batches).fg(Color::Red)
                } else {
                    Cell::new(0)
                };
                (Cell::new(fmt_num(load.written)), failed)
            }
            None => (
                Cell::new("dry run").fg(Color::DarkGrey),
                Cell::new("-").fg(Color::DarkGrey),
            ),
        };
        let endpoint = if s.interrupted {
            Cell::new(format!("{} (interrupted)", s.endpoint)).fg(Color::Yellow)
        } else {
            Cell::new(&s.endpoint)
        };
        table.add_row(vec![
            endpoint,
            Cell::new(&s.namespace),
            Cell::new(fmt_num(s.pages)),
            Cell::new(fmt_num(s.extracted)),
            Cell::new(fmt_num(s.transformed)),
            Cell::new(fmt_num(s.skipped)),
            written,
            failed,
            Cell::new(format!("{:.1}s", s.elapsed.as_secs_f64())),
        ]);
    }
    eprintln!("\n{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> RunArgs {
        #[derive(clap::Parser)]
        struct Wrapper {
            #[command(flatten)]
            run: RunArgs,
        }
        let argv = std::iter::once("feedline").chain(extra.iter().copied());
        <Wrapper as clap::Parser>::parse_from(argv).run
    }

    #[test]
    fn upsert_flags_override_config() {
        let mut config = Config::default();
        config.load.upsert = false;
        assert!(!resolve_upsert(&args(&[]), &config));
        assert!(resolve_upsert(&args(&["--upsert"]), &config));
        config.load.upsert = true;
        assert!(!resolve_upsert(&args(&["--no-upsert"]), &config));
    }

    #[test]
    fn run_args_parse() {
        let a = args(&["--since", "2024-05-01", "--limit", "10", "--dry-run", "-e", "pulses"]);
        assert_eq!(a.limit, Some(10));
        assert!(a.dry_run);
        assert_eq!(a.preview, DEFAULT_PREVIEW);
        assert_eq!(a.endpoint.as_deref(), Some("pulses"));
        assert_eq!(a.since.map(format_iso8601).as_deref(), Some("2024-05-01T00:00:00Z"));
    }

    #[test]
    fn since_accepts_date_and_timestamp() {
        let d = parse_since("2024-03-01").unwrap();
        assert_eq!(format_iso8601(d), "2024-03-01T00:00:00Z");
        let t = parse_since("2024-03-01T12:30:00+02:00").unwrap();
        assert_eq!(format_iso8601(t), "2024-03-01T10:30:00Z");
        assert!(parse_since("yesterday").is_err());
    }
}

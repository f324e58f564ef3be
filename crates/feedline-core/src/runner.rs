//! One pipeline run: extract → transform → load, per endpoint

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use feedline_store::{Document, DocumentStore};

use crate::clock::SharedClock;
use crate::error::ExtractError;
use crate::extract::Extractor;
use crate::http::HttpTransport;
use crate::loader::{BatchLoader, DEFAULT_BATCH_SIZE, LoadSummary};
use crate::pagination::PaginationState;
use crate::progress::{SharedProgress, fmt_num};
use crate::source::{EndpointConfig, SourceConfig};
use crate::transform::Transformer;

/// Documents shown by a dry run unless configured otherwise.
pub const DEFAULT_PREVIEW: usize = 3;

/// Per-run switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Lower bound sent on the first request, already formatted
    pub since: Option<String>,
    /// Stop after this many transformed documents
    pub limit: Option<usize>,
    /// Extract and transform only; nothing is written
    pub dry_run: bool,
    pub upsert: bool,
    pub batch_size: usize,
    /// Documents kept for display in a dry run
    pub preview: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            since: None,
            limit: None,
            dry_run: false,
            upsert: true,
            batch_size: DEFAULT_BATCH_SIZE,
            preview: DEFAULT_PREVIEW,
        }
    }
}

/// What happened on one endpoint.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub endpoint: String,
    pub namespace: String,
    pub pages: usize,
    pub extracted: usize,
    pub transformed: usize,
    pub skipped: usize,
    /// `None` for dry runs
    pub load: Option<LoadSummary>,
    /// First documents of a dry run
    pub preview: Vec<Document>,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl Summary {
    pub fn written(&self) -> usize {
        self.load.as_ref().map_or(0, |l| l.written)
    }
}

/// Wires the components for a source and runs its endpoints.
pub struct Pipeline {
    source: SourceConfig,
    transport: Arc<dyn HttpTransport>,
    clock: SharedClock,
    stop: Option<Arc<AtomicBool>>,
    progress: Option<SharedProgress>,
}

impl Pipeline {
    pub fn new(
        source: SourceConfig,
        transport: Arc<dyn HttpTransport>,
        clock: SharedClock,
    ) -> Self {
        Self {
            source,
            transport,
            clock,
            stop: None,
            progress: None,
        }
    }

    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run one endpoint to completion.
    ///
    /// Records extracted before a fatal error have been loaded batch by batch
    /// already; the pending partial batch is not.
    pub fn run_endpoint(
        &self,
        endpoint: &EndpointConfig,
        store: &dyn DocumentStore,
        opts: &RunOptions,
    ) -> Result<Summary, ExtractError> {
        let start = Instant::now();
        let label = endpoint.label().to_string();
        let namespace = endpoint.namespace(&self.source.connector);
        feedline_store::validate_namespace(&namespace).map_err(ExtractError::Namespace)?;

        let mut initial = PaginationState::new();
        if let Some(since) = &opts.since {
            initial.insert(self.source.pagination.since_param.clone(), since.clone());
        }

        let pb = self
            .progress
            .as_ref()
            .map(|p| p.stage_line(&label))
            .unwrap_or_else(indicatif::ProgressBar::hidden);

        let mut extractor = Extractor::new(
            self.transport.clone(),
            &self.source,
            endpoint,
            initial,
            self.clock.clone(),
        )
        .with_progress(pb.clone());
        if let Some(flag) = &self.stop {
            extractor = extractor.with_stop_flag(flag.clone());
        }

        let transformer = Transformer::for_endpoint(&self.source, endpoint, self.clock.clone());
        let mut docs = transformer.transform(&mut extractor);
        let limit = opts.limit.unwrap_or(usize::MAX);

        log::info!(
            "{label}: {} {} → {}",
            if opts.dry_run { "previewing" } else { "loading" },
            self.source.endpoint_url(&endpoint.path),
            namespace
        );

        let mut preview = Vec::new();
        let load = if opts.dry_run {
            for doc in (&mut docs).take(limit) {
                let doc = doc?;
                if preview.len() < opts.preview {
                    preview.push(doc);
                }
            }
            None
        } else {
            let loader = BatchLoader::new(store, namespace.clone()).with_progress(pb.clone());
            Some(loader.try_load((&mut docs).take(limit), opts.upsert, opts.batch_size)?)
        };

        let transformed = docs.transformed();
        let skipped = docs.skipped();
        drop(docs);
        pb.finish_and_clear();

        let summary = Summary {
            endpoint: label,
            namespace,
            pages: extractor.pages_fetched(),
            extracted: extractor.records_yielded(),
            transformed,
            skipped,
            load,
            preview,
            interrupted: extractor.interrupted(),
            elapsed: start.elapsed(),
        };
        log_summary(&summary);
        Ok(summary)
    }

    /// Run endpoints in order, stopping early when the stop flag is raised.
    ///
    /// The first fatal error ends the run; summaries of endpoints that
    /// finished before it are logged but not returned.
    pub fn run_all(
        &self,
        endpoints: &[EndpointConfig],
        store: &dyn DocumentStore,
        opts: &RunOptions,
    ) -> Result<Vec<Summary>, ExtractError> {
        let mut summaries = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if self.stop_requested() {
                log::info!("stop requested, skipping {}", endpoint.label());
                break;
            }
            summaries.push(self.run_endpoint(endpoint, store, opts)?);
        }
        Ok(summaries)
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }
}

fn log_summary(s: &Summary) {
    let suffix = if s.interrupted { " (interrupted)" } else { "" };
    match &s.load {
        Some(load) => log::info!(
            "{}: {} pages, {} records, {} transformed, {} skipped, {} written to {} in {:.1}s{suffix}",
            s.endpoint,
            fmt_num(s.pages),
            fmt_num(s.extracted),
            fmt_num(s.transformed),
            fmt_num(s.skipped),
            fmt_num(load.written),
            s.namespace,
            s.elapsed.as_secs_f64()
        ),
        None => log::info!(
            "{}: dry run, {} pages, {} records, {} transformed, {} skipped{suffix}",
            s.endpoint,
            fmt_num(s.pages),
            fmt_num(s.extracted),
            fmt_num(s.transformed),
            fmt_num(s.skipped)
        ),
    }
}

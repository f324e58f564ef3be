//! Batched bulk writes into a [`DocumentStore`] namespace

use std::convert::Infallible;

use indicatif::ProgressBar;

use feedline_store::{Document, DocumentStore, WriteOperation};

use crate::progress::fmt_num;

/// Default number of operations per bulk call.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Outcome of a load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Documents the store reports as created or changed
    pub written: usize,
    /// Documents handed to the loader
    pub documents: usize,
    /// Bulk calls issued
    pub batches: usize,
    /// Bulk calls that failed as a whole
    pub failed_batches: usize,
    /// Individual operations rejected inside otherwise applied calls
    pub failed_operations: usize,
}

/// Operations waiting for the next bulk call.
struct Batch {
    ops: Vec<WriteOperation>,
    capacity: usize,
}

impl Batch {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ops: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, op: WriteOperation) {
        self.ops.push(op);
    }

    fn is_full(&self) -> bool {
        self.ops.len() >= self.capacity
    }

    fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn take(&mut self) -> Vec<WriteOperation> {
        std::mem::replace(&mut self.ops, Vec::with_capacity(self.capacity))
    }
}

/// Groups documents into bulk calls against one namespace.
pub struct BatchLoader<'a> {
    store: &'a dyn DocumentStore,
    namespace: String,
    pb: ProgressBar,
}

impl<'a> BatchLoader<'a> {
    pub fn new(store: &'a dyn DocumentStore, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            pb: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Write every document, `batch_size` per bulk call.
    ///
    /// With `upsert`, documents carrying an `_id` replace-or-create by that
    /// key; the rest are inserted. A failing bulk call is logged and counted,
    /// never fatal.
    pub fn load<I>(&self, docs: I, upsert: bool, batch_size: usize) -> LoadSummary
    where
        I: IntoIterator<Item = Document>,
    {
        match self.try_load(docs.into_iter().map(Ok::<_, Infallible>), upsert, batch_size) {
            Ok(summary) => summary,
            Err(never) => match never {},
        }
    }

    /// Like [`load`](Self::load) over a fallible stream.
    ///
    /// Batches already flushed stay written. On the first `Err` the pending
    /// partial batch is dropped and the error returned.
    pub fn try_load<I, E>(&self, docs: I, upsert: bool, batch_size: usize) -> Result<LoadSummary, E>
    where
        I: IntoIterator<Item = Result<Document, E>>,
    {
        let mut summary = LoadSummary::default();
        let mut batch = Batch::new(batch_size);

        for doc in docs {
            let doc = doc?;
            summary.documents += 1;
            batch.push(WriteOperation::for_document(doc, upsert));
            if batch.is_full() {
                self.flush(batch.take(), &mut summary);
            }
        }
        if !batch.is_empty() {
            self.flush(batch.take(), &mut summary);
        }

        log::debug!(
            "{}: {} documents in {} batches, {} written",
            self.namespace,
            summary.documents,
            summary.batches,
            summary.written
        );
        Ok(summary)
    }

    fn flush(&self, ops: Vec<WriteOperation>, summary: &mut LoadSummary) {
        let n = ops.len();
        summary.batches += 1;
        match self.store.bulk_write(&self.namespace, ops) {
            Ok(result) => {
                for failure in &result.failures {
                    log::warn!(
                        "{}: operation {} of batch {} rejected: {}",
                        self.namespace,
                        failure.index,
                        summary.batches,
                        failure.message
                    );
                }
                summary.failed_operations += result.failures.len();
                summary.written += result.written();
            }
            Err(e) => {
                summary.failed_batches += 1;
                log::warn!(
                    "{}: bulk write of {n} documents failed: {e}",
                    self.namespace
                );
            }
        }
        self.pb.set_message(format!(
            "{} written · {} batches",
            fmt_num(summary.written),
            fmt_num(summary.batches)
        ));
    }
}

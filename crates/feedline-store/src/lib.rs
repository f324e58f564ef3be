//! feedline-store: document model and bulk-write storage backends
//!
//! A [`DocumentStore`] receives unordered batches of [`WriteOperation`]s for
//! one namespace. Operations inside a batch are independent: a failing
//! operation is reported in [`BulkWriteResult::failures`] while the others
//! still apply. A whole-batch failure is a [`StoreError`].

pub mod collection;
pub mod dir;
pub mod document;
pub mod error;
pub mod memory;
pub mod ops;

pub use dir::DirStore;
pub use document::{
    CONNECTOR_FIELD, Document, ID_FIELD, INGESTED_AT_FIELD, RawRecord, SOURCE_FIELD,
};
pub use error::StoreError;
pub use memory::{BulkCall, MemoryStore};
pub use ops::{BulkWriteResult, WriteFailure, WriteOperation};

/// Check a namespace name before anything is written to it.
///
/// Names are ASCII alphanumerics, `_`, `-` and `.`, without a leading dot,
/// so every backend can map them to a file or collection name.
pub fn validate_namespace(namespace: &str) -> Result<(), StoreError> {
    let valid = !namespace.is_empty()
        && !namespace.starts_with('.')
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidNamespace(namespace.to_string()))
    }
}

/// Name and size of one stored namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub name: String,
    pub documents: usize,
}

/// Destination of bulk writes.
///
/// Handles take `&self` so one store can be shared across runs; backends
/// serialize their own writes.
pub trait DocumentStore: Send + Sync {
    /// Submit `ops` to `namespace` as one unordered bulk write.
    fn bulk_write(
        &self,
        namespace: &str,
        ops: Vec<WriteOperation>,
    ) -> Result<BulkWriteResult, StoreError>;

    /// List namespaces with their document counts.
    fn namespaces(&self) -> Result<Vec<NamespaceInfo>, StoreError>;
}

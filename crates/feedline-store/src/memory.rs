//! In-process document store

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::collection::{Collection, IdGenerator};
use crate::document::Document;
use crate::error::StoreError;
use crate::ops::{BulkWriteResult, WriteOperation};
use crate::{DocumentStore, NamespaceInfo};

/// Record of one `bulk_write` call, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCall {
    pub namespace: String,
    pub operations: usize,
    pub failed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    collections: BTreeMap<String, Collection>,
    calls: Vec<BulkCall>,
    failing_calls: BTreeSet<usize>,
}

/// Thread-safe in-memory store.
///
/// Every bulk call is recorded; [`fail_call`](Self::fail_call) makes a given
/// call fail as a whole, which is how connectivity loss is simulated.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    ids: IdGenerator,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the `call_idx`-th (0-based) bulk write fail without applying anything.
    pub fn fail_call(&self, call_idx: usize) {
        self.lock().failing_calls.insert(call_idx);
    }

    /// All bulk calls so far, in order.
    pub fn calls(&self) -> Vec<BulkCall> {
        self.lock().calls.clone()
    }

    /// Operation counts of each bulk call, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().calls.iter().map(|c| c.operations).collect()
    }

    pub fn count(&self, namespace: &str) -> usize {
        self.lock()
            .collections
            .get(namespace)
            .map_or(0, Collection::len)
    }

    pub fn get(&self, namespace: &str, id: &Value) -> Option<Document> {
        self.lock()
            .collections
            .get(namespace)
            .and_then(|c| c.get(id).cloned())
    }

    pub fn documents(&self, namespace: &str) -> Vec<Document> {
        self.lock()
            .collections
            .get(namespace)
            .map(|c| c.documents().cloned().collect())
            .unwrap_or_default()
    }
}

impl DocumentStore for MemoryStore {
    fn bulk_write(
        &self,
        namespace: &str,
        ops: Vec<WriteOperation>,
    ) -> Result<BulkWriteResult, StoreError> {
        let mut inner = self.lock();
        let call_idx = inner.calls.len();
        let failed = inner.failing_calls.contains(&call_idx);
        inner.calls.push(BulkCall {
            namespace: namespace.to_string(),
            operations: ops.len(),
            failed,
        });
        if failed {
            return Err(StoreError::Unavailable(format!(
                "injected failure on bulk call {call_idx}"
            )));
        }

        let coll = inner.collections.entry(namespace.to_string()).or_default();
        Ok(coll.apply(ops, &self.ids))
    }

    fn namespaces(&self) -> Result<Vec<NamespaceInfo>, StoreError> {
        Ok(self
            .lock()
            .collections
            .iter()
            .map(|(name, c)| NamespaceInfo {
                name: name.clone(),
                documents: c.len(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(v: Value) -> WriteOperation {
        WriteOperation::Insert(Document::new(v.as_object().cloned().unwrap()))
    }

    #[test]
    fn records_calls() {
        let store = MemoryStore::new();
        store
            .bulk_write("ns", vec![insert(json!({"a": 1})), insert(json!({"a": 2}))])
            .unwrap();
        store.bulk_write("ns", vec![insert(json!({"a": 3}))]).unwrap();
        assert_eq!(store.batch_sizes(), vec![2, 1]);
        assert_eq!(store.count("ns"), 3);
    }

    #[test]
    fn injected_failure_applies_nothing() {
        let store = MemoryStore::new();
        store.fail_call(0);
        let err = store
            .bulk_write("ns", vec![insert(json!({"_id": 1}))])
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.count("ns"), 0);

        store.bulk_write("ns", vec![insert(json!({"_id": 1}))]).unwrap();
        assert_eq!(store.count("ns"), 1);
        assert!(store.calls()[0].failed);
        assert!(!store.calls()[1].failed);
    }

    #[test]
    fn namespaces_lists_counts() {
        let store = MemoryStore::new();
        store.bulk_write("b", vec![insert(json!({"x": 1}))]).unwrap();
        store
            .bulk_write("a", vec![insert(json!({"x": 1})), insert(json!({"x": 2}))])
            .unwrap();
        let ns = store.namespaces().unwrap();
        assert_eq!(ns.len(), 2);
        assert_eq!(ns[0].name, "a");
        assert_eq!(ns[0].documents, 2);
    }
}

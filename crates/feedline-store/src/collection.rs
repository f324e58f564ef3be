//! In-memory namespace contents and bulk-write application

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::Value;

use crate::document::{Document, ID_FIELD, id_key};
use crate::ops::{BulkWriteResult, WriteFailure, WriteOperation};

// Distinguishes generators opened by the same process
static GENERATORS: AtomicU32 = AtomicU32::new(0);

const COUNTER_MASK: u32 = 0x00ff_ffff;

/// Generator for store-assigned ids, laid out like an ObjectId: 8 hex digits
/// of Unix seconds, 10 of generator tag (process id and per-process
/// generator number) and 6 of counter.
#[derive(Debug)]
pub struct IdGenerator {
    tag: u64,
    counter: AtomicU32,
}

impl IdGenerator {
    pub fn new() -> Self {
        let pid = u64::from(std::process::id()) & 0x00ff_ffff;
        let seq = u64::from(GENERATORS.fetch_add(1, Ordering::Relaxed) & 0xffff);
        Self {
            tag: (pid << 16) | seq,
            counter: AtomicU32::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let secs = chrono::Utc::now().timestamp().max(0) as u32;
        let n = self.counter.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;
        format!("{secs:08x}{:010x}{n:06x}", self.tag)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Documents of one namespace, keyed by canonical `_id`.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    docs: BTreeMap<String, Document>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply every operation independently; a failing operation is recorded
    /// and the rest still apply.
    pub fn apply(&mut self, ops: Vec<WriteOperation>, ids: &IdGenerator) -> BulkWriteResult {
        let mut result = BulkWriteResult::default();
        for (index, op) in ops.into_iter().enumerate() {
            match op {
                WriteOperation::Insert(doc) => match self.insert(doc, ids) {
                    Ok(()) => result.inserted += 1,
                    Err(message) => result.failures.push(WriteFailure { index, message }),
                },
                WriteOperation::Upsert { id, document } => match self.upsert(id, document) {
                    UpsertOutcome::Created => result.upserted += 1,
                    UpsertOutcome::Matched { modified } => {
                        result.matched += 1;
                        if modified {
                            result.modified += 1;
                        }
                    }
                },
            }
        }
        result
    }

    fn insert(&mut self, mut doc: Document, ids: &IdGenerator) -> Result<(), String> {
        let id = match doc.id() {
            Some(id) => id.clone(),
            None => {
                // A generated id never collides with a stored one
                let mut id = Value::String(ids.next_id());
                while self.docs.contains_key(&id_key(&id)) {
                    id = Value::String(ids.next_id());
                }
                doc.set_id(id.clone());
                id
            }
        };
        let key = id_key(&id);
        if self.docs.contains_key(&key) {
            return Err(format!("duplicate key: {ID_FIELD}={id}"));
        }
        self.docs.insert(key, doc);
        Ok(())
    }

    fn upsert(&mut self, id: Value, document: Document) -> UpsertOutcome {
        let key = id_key(&id);
        if let Some(existing) = self.docs.get_mut(&key) {
            let modified = existing.set_fields(&document);
            return UpsertOutcome::Matched { modified };
        }

        // `_id` leads, the rest keep source order
        let mut fields = serde_json::Map::new();
        fields.insert(ID_FIELD.to_string(), id);
        for (k, v) in document.into_fields() {
            if k != ID_FIELD {
                fields.insert(k, v);
            }
        }
        self.docs.insert(key, Document::new(fields));
        UpsertOutcome::Created
    }

    /// Insert a document loaded from persistent storage, keyed by its `_id`.
    ///
    /// Returns `false` (and drops the document) when it has no `_id`.
    pub(crate) fn restore(&mut self, doc: Document) -> bool {
        let Some(key) = doc.id().map(id_key) else {
            return false;
        };
        self.docs.insert(key, doc);
        true
    }

    pub fn get(&self, id: &Value) -> Option<&Document> {
        self.docs.get(&id_key(id))
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.docs.values()
    }
}

enum UpsertOutcome {
    Created,
    Matched { modified: bool },
}

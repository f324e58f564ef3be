//! Bulk write operations and their results

use serde_json::Value;

use crate::document::Document;

/// One operation inside an unordered bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    /// Update the document keyed by `id` with all fields, creating it if absent.
    Upsert { id: Value, document: Document },
    /// Plain insert; the store assigns an `_id` when the document has none.
    Insert(Document),
}

impl WriteOperation {
    /// Upsert when requested and the document carries an `_id`, insert otherwise.
    pub fn for_document(document: Document, upsert: bool) -> Self {
        match document.id().cloned() {
            Some(id) if upsert => Self::Upsert { id, document },
            _ => Self::Insert(document),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "upsert",
            Self::Insert(_) => "insert",
        }
    }

    pub fn document(&self) -> &Document {
        match self {
            Self::Upsert { document, .. } | Self::Insert(document) => document,
        }
    }
}

/// A single operation that failed inside an otherwise applied bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    /// Position of the operation in the submitted batch
    pub index: usize,
    pub message: String,
}

/// Outcome of one bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub inserted: usize,
    pub matched: usize,
    pub modified: usize,
    pub upserted: usize,
    pub failures: Vec<WriteFailure>,
}

impl BulkWriteResult {
    /// Documents created or changed by this write.
    pub fn written(&self) -> usize {
        self.inserted + self.upserted + self.modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        Document::new(v.as_object().cloned().unwrap())
    }

    #[test]
    fn upsert_requires_flag_and_id() {
        let with_id = doc(json!({"_id": "a"}));
        let without_id = doc(json!({"x": 1}));

        assert_eq!(
            WriteOperation::for_document(with_id.clone(), true).kind(),
            "upsert"
        );
        assert_eq!(WriteOperation::for_document(with_id, false).kind(), "insert");
        assert_eq!(WriteOperation::for_document(without_id, true).kind(), "insert");
    }

    #[test]
    fn written_excludes_matched() {
        let res = BulkWriteResult {
            inserted: 2,
            matched: 5,
            modified: 1,
            upserted: 3,
            failures: vec![],
        };
        assert_eq!(res.written(), 6);
    }
}

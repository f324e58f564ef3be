//! Schema-less records and storage-ready documents

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record as returned by the source API: ordered field name → JSON value.
pub type RawRecord = Map<String, Value>;

/// Natural key field
pub const ID_FIELD: &str = "_id";
/// Transformation timestamp (ISO-8601 UTC)
pub const INGESTED_AT_FIELD: &str = "_ingested_at";
/// Pipeline instance identifier
pub const CONNECTOR_FIELD: &str = "_connector";
/// Endpoint tag for multi-endpoint connectors
pub const SOURCE_FIELD: &str = "_source";

/// Storage-ready document: a raw record plus reserved `_`-prefixed fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(RawRecord);

impl Document {
    pub fn new(fields: RawRecord) -> Self {
        Self(fields)
    }

    /// Natural key, if set. A JSON `null` counts as absent.
    pub fn id(&self) -> Option<&Value> {
        self.0.get(ID_FIELD).filter(|v| !v.is_null())
    }

    pub fn set_id(&mut self, id: Value) {
        self.0.insert(ID_FIELD.to_string(), id);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn fields(&self) -> &RawRecord {
        &self.0
    }

    pub fn into_fields(self) -> RawRecord {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply `other`'s fields on top of this document (`$set` semantics).
    ///
    /// Fields absent from `other` are kept. Returns whether anything changed.
    pub fn set_fields(&mut self, other: &Document) -> bool {
        let mut changed = false;
        for (k, v) in &other.0 {
            if self.0.get(k) != Some(v) {
                self.0.insert(k.clone(), v.clone());
                changed = true;
            }
        }
        changed
    }
}

impl From<RawRecord> for Document {
    fn from(fields: RawRecord) -> Self {
        Self(fields)
    }
}

/// Canonical map key for an `_id` value.
///
/// Uses the JSON encoding so `1` and `"1"` stay distinct keys.
pub fn id_key(id: &Value) -> String {
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => Document::new(m),
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn null_id_is_absent() {
        assert!(doc(json!({"_id": null})).id().is_none());
        assert_eq!(doc(json!({"_id": 7})).id(), Some(&json!(7)));
    }

    #[test]
    fn set_fields_merges_and_reports_change() {
        let mut a = doc(json!({"_id": "x", "a": 1, "keep": true}));
        let b = doc(json!({"_id": "x", "a": 2, "b": "new"}));
        assert!(a.set_fields(&b));
        assert_eq!(a.get("a"), Some(&json!(2)));
        assert_eq!(a.get("b"), Some(&json!("new")));
        assert_eq!(a.get("keep"), Some(&json!(true)));
        assert!(!a.set_fields(&b));
    }

    #[test]
    fn id_key_distinguishes_types() {
        assert_ne!(id_key(&json!(1)), id_key(&json!("1")));
    }

    #[test]
    fn serializes_transparently() {
        let d = doc(json!({"_id": "a", "n": 1}));
        assert_eq!(serde_json::to_string(&d).unwrap(), r#"{"_id":"a","n":1}"#);
    }
}

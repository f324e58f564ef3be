//! Raw record to stored document: identity, lineage, ingestion time

use serde_json::Value;
use thiserror::Error;

use feedline_store::{
    CONNECTOR_FIELD, Document, INGESTED_AT_FIELD, RawRecord, SOURCE_FIELD,
};

use crate::clock::{SharedClock, format_iso8601};
use crate::source::{EndpointConfig, SourceConfig};

/// A record that cannot become a document. Only that record is dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("identity field \"{field}\" holds {kind}, expected a string or number")]
    UnsupportedIdentity { field: String, kind: &'static str },
    #[error("identity field \"{field}\" is an empty string")]
    EmptyIdentity { field: String },
}

/// Stamps every record with metadata and derives its `_id`.
#[derive(Clone)]
pub struct Transformer {
    connector: String,
    id_field: Option<String>,
    source_tag: Option<String>,
    clock: SharedClock,
}

impl std::fmt::Debug for Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer")
            .field("connector", &self.connector)
            .field("id_field", &self.id_field)
            .field("source_tag", &self.source_tag)
            .finish_non_exhaustive()
    }
}

impl Transformer {
    pub fn new(connector: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            connector: connector.into(),
            id_field: None,
            source_tag: None,
            clock,
        }
    }

    pub fn for_endpoint(
        source: &SourceConfig,
        endpoint: &EndpointConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            connector: source.connector.clone(),
            id_field: endpoint.id_field.clone(),
            source_tag: endpoint.source_tag.clone(),
            clock,
        }
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    pub fn with_source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = Some(tag.into());
        self
    }

    /// Turn one raw record into a document.
    ///
    /// All source fields are kept. An `_id` already on the record is left
    /// alone; otherwise it is taken from the identity field, prefixed with
    /// the source tag when one is set. A missing or null identity leaves the
    /// document without `_id`.
    pub fn transform_record(&self, raw: RawRecord) -> Result<Document, TransformError> {
        let mut doc = Document::new(raw);

        if doc.id().is_none() {
            if let Some(id) = self.derive_id(&doc)? {
                doc.set_id(id);
            }
        }

        doc.insert(INGESTED_AT_FIELD, Value::String(format_iso8601(self.clock.now())));
        doc.insert(CONNECTOR_FIELD, Value::String(self.connector.clone()));
        if let Some(tag) = &self.source_tag {
            doc.insert(SOURCE_FIELD, Value::String(tag.clone()));
        }
        Ok(doc)
    }

    fn derive_id(&self, doc: &Document) -> Result<Option<Value>, TransformError> {
        let Some(field) = &self.id_field else {
            return Ok(None);
        };
        let key = match doc.get(field) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(s)) if s.is_empty() => {
                return Err(TransformError::EmptyIdentity {
                    field: field.clone(),
                });
            }
            Some(v @ (Value::String(_) | Value::Number(_))) => v.clone(),
            Some(other) => {
                return Err(TransformError::UnsupportedIdentity {
                    field: field.clone(),
                    kind: kind_of(other),
                });
            }
        };

        Ok(Some(match &self.source_tag {
            Some(tag) => {
                let raw = match &key {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Value::String(format!("{tag}_{raw}"))
            }
            None => key,
        }))
    }

    /// Map a stream of raw records, dropping (and counting) the ones that
    /// fail. Upstream errors pass through untouched.
    pub fn transform<I, E>(&self, input: I) -> Transform<'_, I>
    where
        I: Iterator<Item = Result<RawRecord, E>>,
    {
        Transform {
            transformer: self,
            inner: input,
            transformed: 0,
            skipped: 0,
        }
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Bool(_) => "a boolean",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
        Value::Null => "null",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
    }
}

/// Iterator returned by [`Transformer::transform`].
pub struct Transform<'a, I> {
    transformer: &'a Transformer,
    inner: I,
    transformed: usize,
    skipped: usize,
}

impl<I> Transform<'_, I> {
    pub fn transformed(&self) -> usize {
        self.transformed
    }

    /// Records dropped because they could not be transformed
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<I, E> Iterator for Transform<'_, I>
where
    I: Iterator<Item = Result<RawRecord, E>>,
{
    type Item = Result<Document, E>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(raw) => match self.transformer.transform_record(raw) {
                    Ok(doc) => {
                        self.transformed += 1;
                        return Some(Ok(doc));
                    }
                    Err(e) => {
                        self.skipped += 1;
                        log::warn!("skipping record: {e}");
                    }
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;

    fn record(v: Value) -> RawRecord {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn transformer() -> Transformer {
        Transformer::new("otx", ManualClock::at_epoch_2024().shared())
    }

    #[test]
    fn stamps_metadata_and_keeps_fields() {
        let doc = transformer()
            .transform_record(record(json!({"name": "a", "nested": {"x": [1, 2]}})))
            .unwrap();
        assert_eq!(doc.get("name"), Some(&json!("a")));
        assert_eq!(doc.get("nested"), Some(&json!({"x": [1, 2]})));
        assert_eq!(doc.get(CONNECTOR_FIELD), Some(&json!("otx")));
        assert_eq!(doc.get(INGESTED_AT_FIELD), Some(&json!("2024-01-01T00:00:00Z")));
        assert!(doc.id().is_none());
        assert!(doc.get(SOURCE_FIELD).is_none());
    }

    #[test]
    fn derives_id_from_field() {
        let t = transformer().with_id_field("indicator");
        let doc = t.transform_record(record(json!({"indicator": "1.2.3.4"}))).unwrap();
        assert_eq!(doc.id(), Some(&json!("1.2.3.4")));

        let doc = t.transform_record(record(json!({"indicator": 42}))).unwrap();
        assert_eq!(doc.id(), Some(&json!(42)));
    }

    #[test]
    fn source_tag_prefixes_id() {
        let t = transformer().with_id_field("id").with_source_tag("pulses");
        let doc = t.transform_record(record(json!({"id": 7}))).unwrap();
        assert_eq!(doc.id(), Some(&json!("pulses_7")));
        assert_eq!(doc.get(SOURCE_FIELD), Some(&json!("pulses")));
    }

    #[test]
    fn existing_id_is_kept() {
        let t = transformer().with_id_field("id");
        let doc = t
            .transform_record(record(json!({"_id": "keep", "id": "other"})))
            .unwrap();
        assert_eq!(doc.id(), Some(&json!("keep")));
    }

    #[test]
    fn null_or_missing_identity_leaves_no_id() {
        let t = transformer().with_id_field("id");
        assert!(t.transform_record(record(json!({"id": null}))).unwrap().id().is_none());
        assert!(t.transform_record(record(json!({"x": 1}))).unwrap().id().is_none());
    }

    #[test]
    fn unsupported_identity_is_an_error() {
        let t = transformer().with_id_field("id");
        assert_eq!(
            t.transform_record(record(json!({"id": {"a": 1}}))),
            Err(TransformError::UnsupportedIdentity {
                field: "id".into(),
                kind: "an object"
            })
        );
        assert!(matches!(
            t.transform_record(record(json!({"id": ""}))),
            Err(TransformError::EmptyIdentity { .. })
        ));
    }

    #[test]
    fn stream_skips_bad_records() {
        let t = transformer().with_id_field("id");
        let input: Vec<Result<RawRecord, String>> = (0..10)
            .map(|i| {
                if i == 4 {
                    Ok(record(json!({"id": [1, 2]})))
                } else {
                    Ok(record(json!({"id": i})))
                }
            })
            .collect();
        let mut stream = t.transform(input.into_iter());
        let docs: Vec<_> = stream.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(docs.len(), 9);
        assert_eq!(stream.skipped(), 1);
        assert_eq!(stream.transformed(), 9);
        let ids: Vec<_> = docs.iter().map(|d| d.id().cloned().unwrap()).collect();
        assert_eq!(ids[3], json!(3));
        assert_eq!(ids[4], json!(5));
    }

    #[test]
    fn upstream_errors_pass_through() {
        let t = transformer();
        let input: Vec<Result<RawRecord, &str>> =
            vec![Ok(record(json!({"a": 1}))), Err("boom")];
        let out: Vec<_> = t.transform(input.into_iter()).collect();
        assert!(out[0].is_ok());
        assert_eq!(out[1].as_ref().unwrap_err(), &"boom");
    }
}

//! Page parsing and continuation state
//!
//! A page body is a JSON object carrying the records under one of
//! [`RECORD_KEYS`], an optional "more pages" flag, and either a
//! `next_cursor` or `page`/`total_pages` counters. Continuation fields may
//! also sit inside a nested `pagination` or `meta` object. A bare JSON array
//! is accepted as a single, final page.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use feedline_store::RawRecord;

/// Keys searched, in order, for the record list
pub const RECORD_KEYS: &[&str] = &["data", "results", "items", "records"];

const HAS_MORE_KEYS: &[&str] = &["has_more", "hasMore", "more"];
const CURSOR_KEYS: &[&str] = &["next_cursor", "nextCursor"];
const PAGE_KEYS: &[&str] = &["page", "current_page"];
const TOTAL_PAGES_KEYS: &[&str] = &["total_pages", "totalPages"];
const NESTED_KEYS: &[&str] = &["pagination", "meta"];

/// Request parameters that evolve page by page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationState {
    params: BTreeMap<String, String>,
}

impl PaginationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Overwrite with the continuation hints of the page just received.
    pub fn merge(&mut self, next: &PaginationState) {
        for (k, v) in &next.params {
            self.params.insert(k.clone(), v.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PaginationState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            params: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Names of the query parameters pagination writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationParams {
    pub cursor_param: String,
    pub page_param: String,
    /// Seeded from `--since` on the first request
    pub since_param: String,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            cursor_param: "cursor".to_string(),
            page_param: "page".to_string(),
            since_param: "since".to_string(),
        }
    }
}

/// One parsed page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<RawRecord>,
    pub has_more: bool,
    /// Parameters for the next request (empty when none were advertised)
    pub next: PaginationState,
    /// List elements that were not objects
    pub skipped: usize,
}

impl Page {
    /// No further request should be made after this page.
    pub fn is_last(&self) -> bool {
        !self.has_more || self.next.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Parse a 200 response body into records and continuation.
pub fn parse_page(body: &str, params: &PaginationParams) -> Result<Page, PageError> {
    let value: Value = serde_json::from_str(body)?;
    match value {
        Value::Array(items) => {
            let (records, skipped) = collect_records(items);
            Ok(Page {
                records,
                has_more: false,
                next: PaginationState::new(),
                skipped,
            })
        }
        Value::Object(obj) => parse_object(obj, params),
        other => Err(PageError::Shape(format!(
            "expected an object or array, got {}",
            type_name(&other)
        ))),
    }
}

fn parse_object(mut obj: Map<String, Value>, params: &PaginationParams) -> Result<Page, PageError> {
    let key = RECORD_KEYS
        .iter()
        .find(|k| obj.contains_key(**k))
        .ok_or_else(|| {
            PageError::Shape(format!(
                "no record list under any of {}",
                RECORD_KEYS.join(", ")
            ))
        })?;
    let items = match obj.remove(*key) {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(PageError::Shape(format!(
                "\"{key}\" is {}, expected an array",
                type_name(&other)
            )));
        }
        None => Vec::new(),
    };
    let (records, skipped) = collect_records(items);

    let mut next = PaginationState::new();
    if let Some(cursor) = lookup(&obj, CURSOR_KEYS).and_then(scalar_string) {
        next.insert(params.cursor_param.clone(), cursor);
    } else if let (Some(page), Some(total)) = (
        lookup(&obj, PAGE_KEYS).and_then(as_u64),
        lookup(&obj, TOTAL_PAGES_KEYS).and_then(as_u64),
    ) {
        if page < total {
            next.insert(params.page_param.clone(), (page + 1).to_string());
        }
    }

    let has_more = lookup(&obj, HAS_MORE_KEYS)
        .and_then(truthy)
        .unwrap_or(!next.is_empty());

    Ok(Page {
        records,
        has_more,
        next,
        skipped,
    })
}

fn collect_records(items: Vec<Value>) -> (Vec<RawRecord>, usize) {
    let mut skipped = 0;
    let records = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(m) => Some(m),
            other => {
                skipped += 1;
                log::warn!("skipping non-object record ({})", type_name(&other));
                None
            }
        })
        .collect();
    (records, skipped)
}

/// First of `keys` found at the top level, then inside a nested
/// `pagination`/`meta` object.
fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k)).or_else(|| {
        NESTED_KEYS
            .iter()
            .filter_map(|n| obj.get(*n).and_then(Value::as_object))
            .find_map(|nested| keys.iter().find_map(|k| nested.get(*k)))
    })
}

/// Boolean-ish flag: bools, numbers (non-zero = true) and common strings.
fn truthy(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

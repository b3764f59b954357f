//! One fetched page of a REST listing.

use reqwest::header::{HeaderMap, LINK};
use serde_json::Value;

/// The decoded body of a page, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A list of items: either the body itself or the array found under the extract key.
    Collection(Vec<Value>),

    /// The extract key held a single non-array value.
    Single(Value),

    /// Anything else; the whole body is one item.
    Fallback(Value),
}

impl Payload {
    /// Classify `body`, looking under `extract_key` when the body is an object that has it.
    #[must_use]
    pub fn decode(body: Value, extract_key: Option<&str>) -> Self {
        match body {
            Value::Array(items) => Self::Collection(items),
            Value::Object(mut map) => match extract_key.and_then(|key| map.remove(key)) {
                Some(Value::Array(items)) => Self::Collection(items),
                Some(value) => Self::Single(value),
                None => Self::Fallback(Value::Object(map)),
            },
            other => Self::Fallback(other),
        }
    }

    /// Flatten into the items this page contributes to a listing.
    #[must_use]
    pub fn into_items(self) -> Vec<Value> {
        match self {
            Self::Collection(items) => items,
            Self::Single(value) | Self::Fallback(value) => vec![value],
        }
    }
}

/// A page as returned by the paginated client.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub payload: Payload,
    pub next: Option<String>,
}

impl Page {
    /// A page with no data and no continuation.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            payload: Payload::Collection(Vec::new()),
            next: None,
        }
    }
}

/// Whether a decoded body carries no data (`null`, `[]`, `{}` or `""`).
#[must_use]
pub fn is_empty(body: &Value) -> bool {
    match body {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Extract the `rel="next"` target from a `Link` header, if any.
#[must_use]
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK).and_then(|h| h.to_str().ok())?;

    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim();
            param == r#"rel="next""# || param == "rel=next"
        });

        if !is_next {
            return None;
        }

        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

//! Core types for livedoc

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{Failure, LiveError, Result};

/// Unique identifier for a document within a collection
pub type DocumentId = String;

/// One primitive component of a [`Key`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl std::fmt::Display for KeyPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyPart::Null => write!(f, "null"),
            KeyPart::Bool(b) => write!(f, "{}", b),
            KeyPart::Int(i) => write!(f, "{}", i),
            KeyPart::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<&String> for KeyPart {
    fn from(s: &String) -> Self {
        KeyPart::Str(s.clone())
    }
}

impl From<i64> for KeyPart {
    fn from(i: i64) -> Self {
        KeyPart::Int(i)
    }
}

impl From<usize> for KeyPart {
    fn from(i: usize) -> Self {
        KeyPart::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        KeyPart::Bool(b)
    }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(KeyPart::Null)
    }
}

/// Identifier for one logical live query: resource kind plus parameters.
///
/// Equality and hashing are structural, so two keys built from the same
/// parts always share a feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(Vec<KeyPart>);

impl Key {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Append a part, builder style
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    /// The leading resource name, if the key starts with a string
    pub fn resource(&self) -> Option<&str> {
        match self.0.first() {
            Some(KeyPart::Str(s)) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, "]")
    }
}

/// Build a [`Key`] from a list of values convertible into [`KeyPart`]
///
/// ```
/// use livedoc::key;
/// let k = key!["orders", "doc", "o-1"];
/// assert_eq!(k.resource(), Some("orders"));
/// ```
#[macro_export]
macro_rules! key {
    ($($part:expr),* $(,)?) => {
        $crate::types::Key::new(vec![$($crate::types::KeyPart::from($part)),*])
    };
}

/// A document stored in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier, unique within the collection
    pub id: DocumentId,
    /// Field values
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Set a field, builder style
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Parse a field as a timestamp, see [`parse_timestamp`]
    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get(field).and_then(parse_timestamp)
    }
}

/// Interpret a JSON value as a point in time.
///
/// Accepts epoch milliseconds (integer or float), RFC 3339 strings, and
/// objects of the form `{seconds, nanoseconds}` (also with leading
/// underscores, as exported by document databases).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            if let Some(ms) = n.as_i64() {
                Utc.timestamp_millis_opt(ms).single()
            } else {
                let ms = n.as_f64()?;
                if !ms.is_finite() {
                    return None;
                }
                let secs = (ms / 1000.0).floor();
                let nanos = ((ms - secs * 1000.0) * 1_000_000.0) as u32;
                Utc.timestamp_opt(secs as i64, nanos).single()
            }
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Object(obj) => {
            let seconds = obj
                .get("seconds")
                .or_else(|| obj.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = obj
                .get("nanoseconds")
                .or_else(|| obj.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, u32::try_from(nanos).ok()?).single()
        }
        _ => None,
    }
}

/// Sort direction for ordered queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl std::fmt::Display for SortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortDirection::Ascending => write!(f, "asc"),
            SortDirection::Descending => write!(f, "desc"),
        }
    }
}

impl std::str::FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Ascending),
            "desc" | "descending" => Ok(SortDirection::Descending),
            _ => Err(format!("Unknown sort direction: {}", s)),
        }
    }
}

/// Opaque position of a record in an ordered query.
///
/// Serialized as a URL-safe token; callers should treat the token as an
/// uninterpreted string and hand it back unchanged to resume paging.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Document the cursor points at
    pub id: DocumentId,
    /// Value of the order-by field on that document
    pub order_value: Option<Value>,
}

#[derive(Serialize, Deserialize)]
struct CursorRepr {
    id: DocumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    v: Option<Value>,
}

impl Cursor {
    /// Cursor at `doc` for a query ordered by `order_field`
    pub fn at(doc: &Document, order_field: &str) -> Self {
        Self {
            id: doc.id.clone(),
            order_value: doc.get(order_field).cloned(),
        }
    }

    pub fn to_token(&self) -> String {
        let repr = CursorRepr {
            id: self.id.clone(),
            v: self.order_value.clone(),
        };
        // Serializing a string and a JSON value cannot fail
        let bytes = serde_json::to_vec(&repr).unwrap_or_default();
        BASE64.encode(bytes)
    }

    pub fn from_token(token: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(token.trim())
            .map_err(|e| LiveError::InvalidCursor(format!("bad encoding: {}", e)))?;
        let repr: CursorRepr = serde_json::from_slice(&bytes)
            .map_err(|e| LiveError::InvalidCursor(format!("bad payload: {}", e)))?;
        if repr.id.is_empty() {
            return Err(LiveError::InvalidCursor("empty document id".to_string()));
        }
        Ok(Self {
            id: repr.id,
            order_value: repr.v,
        })
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_token())
    }
}

impl std::str::FromStr for Cursor {
    type Err = LiveError;

    fn from_str(s: &str) -> Result<Self> {
        Cursor::from_token(s)
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_token())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Cursor::from_token(&token).map_err(serde::de::Error::custom)
    }
}

impl From<&Cursor> for KeyPart {
    fn from(cursor: &Cursor) -> Self {
        KeyPart::Str(cursor.to_token())
    }
}

/// One bounded page of an ordered collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Records in query order, `None` when the page is empty
    pub items: Option<Vec<Document>>,
    /// Cursor at the last record, `None` when the page is empty
    pub next_cursor: Option<Cursor>,
}

impl Page {
    pub fn empty() -> Self {
        Self {
            items: None,
            next_cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_none()
    }
}

/// Immutable result of a query at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Snapshot {
    /// A single record; `None` when it does not exist
    Document(Option<Document>),
    /// An ordered sequence; `None` is the empty marker
    List(Option<Vec<Document>>),
    /// A bounded page with its forward cursor
    Page(Page),
}

impl Snapshot {
    pub fn document(&self) -> Option<&Document> {
        match self {
            Snapshot::Document(doc) => doc.as_ref(),
            _ => None,
        }
    }

    pub fn list(&self) -> Option<&[Document]> {
        match self {
            Snapshot::List(items) => items.as_deref(),
            Snapshot::Page(page) => page.items.as_deref(),
            Snapshot::Document(_) => None,
        }
    }

    pub fn page(&self) -> Option<&Page> {
        match self {
            Snapshot::Page(page) => Some(page),
            _ => None,
        }
    }

    /// Whether the query matched no records
    pub fn is_empty(&self) -> bool {
        match self {
            Snapshot::Document(doc) => doc.is_none(),
            Snapshot::List(items) => items.is_none(),
            Snapshot::Page(page) => page.is_empty(),
        }
    }

    /// Cursor referencing the last record, for forward pagination
    pub fn cursor(&self) -> Option<&Cursor> {
        self.page().and_then(|p| p.next_cursor.as_ref())
    }
}

/// State of a live query as observed by a consumer
#[derive(Debug, Clone, PartialEq)]
pub enum LiveState {
    /// No snapshot and no error observed yet
    Loading,
    Ready(Arc<Snapshot>),
    Failed(Failure),
}

impl LiveState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LiveState::Loading)
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            LiveState::Ready(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            LiveState::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

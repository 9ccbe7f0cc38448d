//! Query descriptors handed to a document backend
//!
//! A descriptor targets either one document or a collection, optionally
//! narrowed by field equality, ordered by one field, bounded by a limit and
//! resumed after a cursor. [`QueryDescriptor::evaluate`] gives the reference
//! semantics that backends are expected to follow.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{LiveError, Result};
use crate::types::{parse_timestamp, Cursor, Document, DocumentId, SortDirection};

/// Field equality filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn matches(&self, doc: &Document) -> bool {
        doc.get(&self.field) == Some(&self.value)
    }
}

/// Order-by clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Description of one live or one-shot query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Collection name
    pub collection: String,
    /// Single-document target, if set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentId>,
    /// Equality filters (AND)
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Exclusive resume position; requires `order_by`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after: Option<Cursor>,
}

impl QueryDescriptor {
    /// Query over a whole collection
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            document: None,
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    /// Query for a single document
    pub fn document(collection: impl Into<String>, id: impl Into<DocumentId>) -> Self {
        Self {
            document: Some(id.into()),
            ..Self::collection(collection)
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }

    pub fn is_document(&self) -> bool {
        self.document.is_some()
    }

    /// Reject descriptors no backend could serve
    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(LiveError::InvalidInput("collection name is empty".to_string()));
        }
        if let Some(id) = &self.document {
            if id.is_empty() {
                return Err(LiveError::InvalidInput("document id is empty".to_string()));
            }
            if !self.filters.is_empty()
                || self.order_by.is_some()
                || self.limit.is_some()
                || self.start_after.is_some()
            {
                return Err(LiveError::InvalidInput(
                    "document queries take no filters, ordering or bounds".to_string(),
                ));
            }
        }
        if self.limit == Some(0) {
            return Err(LiveError::InvalidInput("limit must be positive".to_string()));
        }
        if self.start_after.is_some() && self.order_by.is_none() {
            return Err(LiveError::InvalidInput(
                "start_after requires an order_by clause".to_string(),
            ));
        }
        if self.filters.iter().any(|f| f.field.is_empty())
            || self.order_by.as_ref().is_some_and(|o| o.field.is_empty())
        {
            return Err(LiveError::InvalidInput("field name is empty".to_string()));
        }
        Ok(())
    }

    /// Run the query over an unordered set of documents.
    ///
    /// When ordered, documents lacking the order field are excluded and ties
    /// are broken by document id in the same direction. Without an order the
    /// input order is kept.
    pub fn evaluate<'a, I>(&self, docs: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        if let Some(id) = &self.document {
            return docs.into_iter().filter(|d| &d.id == id).take(1).cloned().collect();
        }

        let mut matched: Vec<&Document> = docs
            .into_iter()
            .filter(|d| self.filters.iter().all(|f| f.matches(d)))
            .collect();

        if let Some(order) = &self.order_by {
            matched.retain(|d| d.get(&order.field).is_some());
            matched.sort_by(|a, b| compare_position(a, b, order));

            if let Some(cursor) = &self.start_after {
                matched.retain(|d| {
                    compare_to_cursor(d, cursor, order) == Ordering::Greater
                });
            }
        }

        let limit = self.limit.unwrap_or(usize::MAX);
        matched.into_iter().take(limit).cloned().collect()
    }
}

/// Order of two documents under `order`, ties broken by id
fn compare_position(a: &Document, b: &Document, order: &OrderBy) -> Ordering {
    let null = Value::Null;
    let va = a.get(&order.field).unwrap_or(&null);
    let vb = b.get(&order.field).unwrap_or(&null);
    let ord = compare_values(va, vb).then_with(|| a.id.cmp(&b.id));
    match order.direction {
        SortDirection::Ascending => ord,
        SortDirection::Descending => ord.reverse(),
    }
}

/// Position of `doc` relative to `cursor` in query order
fn compare_to_cursor(doc: &Document, cursor: &Cursor, order: &OrderBy) -> Ordering {
    let null = Value::Null;
    let value = doc.get(&order.field).unwrap_or(&null);
    let cursor_value = cursor.order_value.as_ref().unwrap_or(&null);
    let ord = compare_values(value, cursor_value).then_with(|| doc.id.cmp(&cursor.id));
    match order.direction {
        SortDirection::Ascending => ord,
        SortDirection::Descending => ord.reverse(),
    }
}

/// Position of a JSON value in the ordering used by ordered queries
enum SortKey {
    Null,
    Bool(bool),
    /// Numbers and anything readable as a timestamp, in epoch millis
    Time(f64),
    Str(String),
    Other(String),
}

impl SortKey {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => SortKey::Null,
            Value::Bool(b) => SortKey::Bool(*b),
            Value::Number(n) => SortKey::Time(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => match parse_timestamp(value) {
                Some(ts) => SortKey::Time(epoch_millis(ts)),
                None => SortKey::Str(s.clone()),
            },
            Value::Object(_) => match parse_timestamp(value) {
                Some(ts) => SortKey::Time(epoch_millis(ts)),
                None => SortKey::Other(value.to_string()),
            },
            Value::Array(_) => SortKey::Other(value.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Null => 0,
            SortKey::Bool(_) => 1,
            SortKey::Time(_) => 2,
            SortKey::Str(_) => 3,
            SortKey::Other(_) => 4,
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Bool(x), SortKey::Bool(y)) => x.cmp(y),
            (SortKey::Time(x), SortKey::Time(y)) => x.total_cmp(y),
            (SortKey::Str(x), SortKey::Str(y)) | (SortKey::Other(x), SortKey::Other(y)) => x.cmp(y),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn epoch_millis(ts: chrono::DateTime<chrono::Utc>) -> f64 {
    ts.timestamp() as f64 * 1000.0 + f64::from(ts.timestamp_subsec_nanos()) / 1_000_000.0
}

/// Total order over JSON values used for server-side ordering.
///
/// Numbers, RFC 3339 strings and `{seconds, nanoseconds}` objects all order
/// chronologically against each other (numbers read as epoch millis). Other
/// values order by type: null, bool, time, string, then arrays and objects.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    SortKey::of(a).cmp(&SortKey::of(b))
}

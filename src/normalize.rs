//! Client-side ordering for unordered snapshots
//!
//! Filtered queries without a matching server-side index arrive in arbitrary
//! order. [`normalize`] sorts them newest first by a timestamp field and
//! collapses an empty result into the empty marker.
//!
//! Records missing the field (or holding something that is not a timestamp)
//! compare equal to everything. This relaxation is intentional: records are
//! not required to carry the field, and the resulting position of such
//! records depends on the order the server delivered them in.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::{Document, SortDirection};

/// Default timestamp field for ordering
pub const DEFAULT_TIMESTAMP_FIELD: &str = "timestampCreate";

/// Which field to order by, and in which direction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    /// Newest first by `field`
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Compare two records; `Equal` when either lacks a timestamp
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        match (a.timestamp(&self.field), b.timestamp(&self.field)) {
            (Some(ta), Some(tb)) => match self.direction {
                SortDirection::Descending => tb.cmp(&ta),
                SortDirection::Ascending => ta.cmp(&tb),
            },
            _ => Ordering::Equal,
        }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::descending(DEFAULT_TIMESTAMP_FIELD)
    }
}

/// Order `records` by `spec`; `None` when there is nothing to order.
///
/// Deterministic for a given input: equal records keep their relative input
/// order.
pub fn normalize(records: Vec<Document>, spec: &SortSpec) -> Option<Vec<Document>> {
    if records.is_empty() {
        return None;
    }
    Some(stable_sort_by(records, &|a, b| spec.compare(a, b)))
}

/// Stable top-down merge sort.
///
/// The missing-field rule makes the comparator non-transitive, and the
/// standard library sorts may panic on such comparators. A plain merge only
/// ever asks "is the right head strictly smaller", which is well defined for
/// any comparator.
pub fn stable_sort_by<T, F>(mut items: Vec<T>, compare: &F) -> Vec<T>
where
    F: Fn(&T, &T) -> Ordering,
{
    if items.len() <= 1 {
        return items;
    }

    let right = items.split_off(items.len() / 2);
    let left = stable_sort_by(items, compare);
    let right = stable_sort_by(right, compare);

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        let next = if compare(r, l) == Ordering::Less {
            right.next()
        } else {
            left.next()
        };
        merged.extend(next);
    }
    merged.extend(left);
    merged.extend(right);
    merged
}

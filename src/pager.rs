//! Forward-only cursor pagination over an ordered collection
//!
//! Every page query is ordered newest first by the timestamp field before
//! the page bound is applied; pagination without a stable order is not
//! offered. The cursor returned with a page points at its last record and
//! resumes strictly after it.

use crate::backend::DocumentBackend;
use crate::config::{LiveConfig, DEFAULT_PAGE_SIZE};
use crate::error::{LiveError, Result};
use crate::normalize::DEFAULT_TIMESTAMP_FIELD;
use crate::query::QueryDescriptor;
use crate::types::{Cursor, Document, Page, SortDirection};

/// Build a [`Page`] from query results ordered by `order_field`
pub fn shape_page(docs: Vec<Document>, order_field: &str) -> Page {
    let next_cursor = docs.last().map(|last| Cursor::at(last, order_field));
    if docs.is_empty() {
        return Page::empty();
    }
    Page {
        items: Some(docs),
        next_cursor,
    }
}

/// Stateless page query builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pager {
    order_field: String,
    default_page_size: usize,
}

impl Pager {
    pub fn new(order_field: impl Into<String>, default_page_size: usize) -> Self {
        Self {
            order_field: order_field.into(),
            default_page_size: default_page_size.max(1),
        }
    }

    pub fn from_config(config: &LiveConfig) -> Self {
        Self::new(config.timestamp_field.clone(), config.default_page_size)
    }

    pub fn order_field(&self) -> &str {
        &self.order_field
    }

    pub fn default_page_size(&self) -> usize {
        self.default_page_size
    }

    /// Bound `base` to one page starting after `cursor`.
    ///
    /// `base` may carry equality filters; any ordering, limit or cursor it
    /// already has is replaced.
    pub fn query(
        &self,
        base: QueryDescriptor,
        page_size: Option<usize>,
        cursor: Option<&Cursor>,
    ) -> Result<QueryDescriptor> {
        if base.is_document() {
            return Err(LiveError::InvalidInput(
                "cannot page a single-document query".to_string(),
            ));
        }
        let page_size = page_size.unwrap_or(self.default_page_size);
        if page_size == 0 {
            return Err(LiveError::InvalidInput("page size must be positive".to_string()));
        }

        let mut query = base
            .order_by(self.order_field.clone(), SortDirection::Descending)
            .limit(page_size);
        query.start_after = cursor.cloned();
        Ok(query)
    }

    pub fn shape(&self, docs: Vec<Document>) -> Page {
        shape_page(docs, &self.order_field)
    }

    /// Fetch one page without listening
    pub async fn fetch(
        &self,
        backend: &dyn DocumentBackend,
        base: QueryDescriptor,
        page_size: Option<usize>,
        cursor: Option<&Cursor>,
    ) -> Result<Page> {
        let query = self.query(base, page_size, cursor)?;
        let docs = backend.fetch(&query).await?;
        tracing::trace!(collection = %query.collection, count = docs.len(), "fetched page");
        Ok(self.shape(docs))
    }
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_FIELD, DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use pretty_assertions::assert_eq;

    fn seeded(n: i64) -> MemoryBackend {
        let backend = MemoryBackend::new();
        // item1 is the newest
        backend.put_many(
            "orders",
            (1..=n).map(|i| {
                Document::new(format!("item{}", i)).with_field("timestampCreate", 1000 - i)
            }),
        );
        backend
    }

    fn ids(page: &Page) -> Vec<String> {
        page.items
            .as_ref()
            .map(|items| items.iter().map(|d| d.id.clone()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_cursoring_through_five_items() {
        let backend = seeded(5);
        let pager = Pager::default();
        let base = QueryDescriptor::collection("orders");

        let p1 = pager.fetch(&backend, base.clone(), Some(2), None).await.unwrap();
        assert_eq!(ids(&p1), vec!["item1", "item2"]);
        assert_eq!(p1.next_cursor.as_ref().unwrap().id, "item2");

        let p2 = pager
            .fetch(&backend, base.clone(), Some(2), p1.next_cursor.as_ref())
            .await
            .unwrap();
        assert_eq!(ids(&p2), vec!["item3", "item4"]);
        assert_eq!(p2.next_cursor.as_ref().unwrap().id, "item4");

        let p3 = pager
            .fetch(&backend, base.clone(), Some(2), p2.next_cursor.as_ref())
            .await
            .unwrap();
        assert_eq!(ids(&p3), vec!["item5"]);
        assert_eq!(p3.next_cursor.as_ref().unwrap().id, "item5");

        let p4 = pager
            .fetch(&backend, base, Some(2), p3.next_cursor.as_ref())
            .await
            .unwrap();
        assert_eq!(p4, Page::empty());
    }

    #[tokio::test]
    async fn test_default_page_size_is_ten() {
        let backend = seeded(15);
        let pager = Pager::default();
        let page = pager
            .fetch(&backend, QueryDescriptor::collection("orders"), None, None)
            .await
            .unwrap();
        assert_eq!(page.len(), 10);
    }

    #[tokio::test]
    async fn test_cursor_survives_token_roundtrip() {
        let backend = seeded(4);
        let pager = Pager::default();
        let base = QueryDescriptor::collection("orders");
        let p1 = pager.fetch(&backend, base.clone(), Some(3), None).await.unwrap();

        let token = p1.next_cursor.unwrap().to_token();
        let cursor = Cursor::from_token(&token).unwrap();
        let p2 = pager.fetch(&backend, base, Some(3), Some(&cursor)).await.unwrap();
        assert_eq!(ids(&p2), vec!["item4"]);
    }

    #[test]
    fn test_query_always_ordered() {
        let pager = Pager::new("createdAt", 5);
        let q = pager
            .query(
                QueryDescriptor::collection("orders").order_by("other", SortDirection::Ascending),
                None,
                None,
            )
            .unwrap();
        let order = q.order_by.unwrap();
        assert_eq!(order.field, "createdAt");
        assert_eq!(order.direction, SortDirection::Descending);
        assert_eq!(q.limit, Some(5));
    }

    #[test]
    fn test_query_rejects_bad_input() {
        let pager = Pager::default();
        assert!(pager
            .query(QueryDescriptor::collection("orders"), Some(0), None)
            .is_err());
        assert!(pager
            .query(QueryDescriptor::document("orders", "a"), None, None)
            .is_err());
    }

    #[test]
    fn test_shape_empty() {
        let page = shape_page(Vec::new(), "timestampCreate");
        assert!(page.items.is_none());
        assert!(page.next_cursor.is_none());
    }
}

//! Live reads over the `orders` collection

use crate::accessors::{LiveQueries, LiveQuery, PagedResult, QueryResult};
use crate::types::{Cursor, Document};

/// Collection holding orders
pub const ORDERS_COLLECTION: &str = "orders";

/// Order accessors: one order, a customer's orders, and the paged feed of
/// all orders
#[derive(Clone)]
pub struct OrderQueries {
    live: LiveQueries,
}

impl OrderQueries {
    pub fn new(live: LiveQueries) -> Self {
        Self { live }
    }

    pub fn live(&self) -> &LiveQueries {
        &self.live
    }

    /// A single order by id
    pub fn order(&self, id: &str) -> LiveQuery<QueryResult<Document>> {
        self.live.document(ORDERS_COLLECTION, id)
    }

    /// Orders placed by `uid`, newest first
    pub fn orders_for(&self, uid: &str) -> LiveQuery<QueryResult<Option<Vec<Document>>>> {
        self.live.list_by_owner(ORDERS_COLLECTION, uid)
    }

    /// One page of all orders, newest first.
    ///
    /// Pass the previous page's `last_cursor` to continue.
    pub fn all_orders(
        &self,
        page_limit: Option<usize>,
        last_cursor: Option<&Cursor>,
    ) -> LiveQuery<PagedResult> {
        self.live.paged(ORDERS_COLLECTION, page_limit, last_cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::LiveConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn orders() -> (MemoryBackend, OrderQueries) {
        let backend = MemoryBackend::new();
        backend
            .seed_from_json(
                &json!({
                    "orders": [
                        {"id": "o1", "uid": "alice", "timestampCreate": {"seconds": 1_700_000_100, "nanoseconds": 0}},
                        {"id": "o2", "uid": "bob", "timestampCreate": {"seconds": 1_700_000_200, "nanoseconds": 0}},
                        {"id": "o3", "uid": "alice", "timestampCreate": {"seconds": 1_700_000_300, "nanoseconds": 0}},
                        {"id": "o4", "uid": "alice"}
                    ]
                })
                .to_string(),
            )
            .unwrap();
        let live = LiveQueries::with_backend(Arc::new(backend.clone()), LiveConfig::default());
        (backend, OrderQueries::new(live))
    }

    #[tokio::test]
    async fn test_order() {
        let (_backend, orders) = orders();
        let result = orders.order("o2").ready().await;
        assert_eq!(result.data.unwrap().get("uid"), Some(&json!("bob")));
    }

    #[tokio::test]
    async fn test_orders_for_sorts_and_keeps_untimestamped() {
        let (_backend, orders) = orders();
        let result = orders.orders_for("alice").ready().await;
        let ids: Vec<String> = result
            .data
            .flatten()
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&"o4".to_string()));
        let o3 = ids.iter().position(|id| id == "o3").unwrap();
        let o1 = ids.iter().position(|id| id == "o1").unwrap();
        assert!(o3 < o1);
    }

    #[tokio::test]
    async fn test_all_orders_skips_untimestamped() {
        let (_backend, orders) = orders();
        let result = orders.all_orders(None, None).ready().await;
        let ids: Vec<&str> = result.items().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["o3", "o2", "o1"]);
        assert_eq!(result.last_cursor.unwrap().id, "o1");
    }

    #[tokio::test]
    async fn test_orders_for_unknown_customer_is_empty() {
        let (_backend, orders) = orders();
        let result = orders.orders_for("carol").ready().await;
        assert!(result.is_empty());
    }
}

//! Reactive read accessors
//!
//! Each accessor subscribes through the [`SubscriptionCache`] and exposes
//! the feed as a plain result value: `data`, `error` and `is_loading`.
//! Accessors never fail: errors are reported in the `error` field, with
//! `data` left empty, and are logged when they surface.

use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;

use crate::backend::DocumentBackend;
use crate::cache::{ConsumerHandle, Shape, SubscriptionCache};
use crate::config::LiveConfig;
use crate::error::LiveError;
use crate::key;
use crate::pager::Pager;
use crate::query::QueryDescriptor;
use crate::types::{Cursor, Document, Key, KeyPart, LiveState};

/// Result of a live read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult<T> {
    /// `None` while loading or after an error
    pub data: Option<T>,
    pub error: Option<String>,
    /// True until the first snapshot or error
    pub is_loading: bool,
}

impl<T> QueryResult<T> {
    pub fn loading() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: true,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
            is_loading: false,
        }
    }

    pub fn ready(data: Option<T>) -> Self {
        Self {
            data,
            error: None,
            is_loading: false,
        }
    }
}

impl QueryResult<Option<Vec<Document>>> {
    /// Loaded, and nothing matched
    pub fn is_empty(&self) -> bool {
        matches!(self.data, Some(None))
    }
}

/// Result of a live paged read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedResult {
    /// `None` while loading or after an error, `Some(None)` for an empty
    /// page
    pub data: Option<Option<Vec<Document>>>,
    /// Cursor at the last record, to request the following page
    pub last_cursor: Option<Cursor>,
    pub error: Option<String>,
    pub is_loading: bool,
}

impl PagedResult {
    /// Loaded, and the page is empty
    pub fn is_empty(&self) -> bool {
        matches!(self.data, Some(None))
    }

    /// Records of a loaded page; empty while loading or failed
    pub fn items(&self) -> &[Document] {
        self.data.as_ref().and_then(Option::as_deref).unwrap_or(&[])
    }

    pub fn loading() -> Self {
        Self {
            data: None,
            last_cursor: None,
            error: None,
            is_loading: true,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            data: None,
            last_cursor: None,
            error: Some(message.into()),
            is_loading: false,
        }
    }
}

fn project_document(state: &LiveState) -> QueryResult<Document> {
    match state {
        LiveState::Loading => QueryResult::loading(),
        LiveState::Failed(failure) => QueryResult::failed(failure.message.clone()),
        LiveState::Ready(snapshot) => QueryResult::ready(snapshot.document().cloned()),
    }
}

fn project_list(state: &LiveState) -> QueryResult<Option<Vec<Document>>> {
    match state {
        LiveState::Loading => QueryResult::loading(),
        LiveState::Failed(failure) => QueryResult::failed(failure.message.clone()),
        LiveState::Ready(snapshot) => {
            QueryResult::ready(Some(snapshot.list().map(<[Document]>::to_vec)))
        }
    }
}

fn project_page(state: &LiveState) -> PagedResult {
    match state {
        LiveState::Loading => PagedResult::loading(),
        LiveState::Failed(failure) => PagedResult::failed(failure.message.clone()),
        LiveState::Ready(snapshot) => match snapshot.page() {
            Some(page) => PagedResult {
                data: Some(page.items.clone()),
                last_cursor: page.next_cursor.clone(),
                error: None,
                is_loading: false,
            },
            None => PagedResult {
                data: Some(snapshot.list().map(<[Document]>::to_vec)),
                last_cursor: None,
                error: None,
                is_loading: false,
            },
        },
    }
}

/// A live read bound to one feed; unsubscribes on drop
pub struct LiveQuery<R> {
    handle: ConsumerHandle,
    project: fn(&LiveState) -> R,
}

impl<R: 'static> LiveQuery<R> {
    fn new(handle: ConsumerHandle, project: fn(&LiveState) -> R) -> Self {
        Self { handle, project }
    }

    pub fn key(&self) -> &Key {
        self.handle.key()
    }

    /// Current result
    pub fn result(&self) -> R {
        (self.project)(&self.handle.state())
    }

    /// Wait for the next change; `None` once the feed has ended
    pub async fn next(&mut self) -> Option<R> {
        let state = self.handle.changed().await?;
        Some((self.project)(&state))
    }

    /// Wait until loading finishes
    pub async fn ready(&mut self) -> R {
        let state = self.handle.ready().await;
        (self.project)(&state)
    }

    /// Results as a stream, starting with the current one
    pub fn stream(&self) -> impl Stream<Item = R> + Send + 'static {
        let project = self.project;
        self.handle.stream().map(move |state| project(&state))
    }

    pub fn cancel(&mut self) {
        self.handle.cancel();
    }
}

/// Entry point for the three live accessors
///
/// Accessors open their feeds on the tokio runtime they are called from.
/// Called outside a runtime they return an already failed result instead.
///
/// Keys include the configured owner and order fields, so instances with
/// different configs can share one cache without joining each other's
/// feeds.
#[derive(Clone)]
pub struct LiveQueries {
    cache: Arc<SubscriptionCache>,
    config: LiveConfig,
    pager: Pager,
}

impl LiveQueries {
    pub fn new(cache: Arc<SubscriptionCache>, config: LiveConfig) -> Self {
        let pager = Pager::from_config(&config);
        Self {
            cache,
            config,
            pager,
        }
    }

    /// New cache over `backend`
    pub fn with_backend(backend: Arc<dyn DocumentBackend>, config: LiveConfig) -> Self {
        Self::new(SubscriptionCache::new(backend), config)
    }

    pub fn cache(&self) -> &Arc<SubscriptionCache> {
        &self.cache
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    /// One document by id
    pub fn document(&self, collection: &str, id: &str) -> LiveQuery<QueryResult<Document>> {
        let handle = self.cache.subscribe(
            key![collection, "doc", id],
            QueryDescriptor::document(collection, id),
            Shape::Document,
        );
        LiveQuery::new(handle, project_document)
    }

    /// Documents whose owner field equals `owner`, newest first.
    ///
    /// Ordered client-side, so no composite index is needed on the server.
    pub fn list_by_owner(
        &self,
        collection: &str,
        owner: &str,
    ) -> LiveQuery<QueryResult<Option<Vec<Document>>>> {
        let owner_field = self.config.owner_field.as_str();
        let sort = self.config.sort_spec();
        let handle = self.cache.subscribe(
            key![collection, "owner", owner_field, owner, sort.field.as_str()],
            QueryDescriptor::collection(collection).where_eq(owner_field, owner),
            Shape::Sorted(sort),
        );
        LiveQuery::new(handle, project_list)
    }

    /// One page of `collection`, newest first, after `cursor`
    pub fn paged(
        &self,
        collection: &str,
        page_size: Option<usize>,
        cursor: Option<&Cursor>,
    ) -> LiveQuery<PagedResult> {
        let size = page_size.unwrap_or(self.pager.default_page_size());
        let key = key![
            collection,
            "page",
            self.pager.order_field(),
            size,
            cursor.map(KeyPart::from)
        ];

        let handle = match self
            .pager
            .query(QueryDescriptor::collection(collection), Some(size), cursor)
        {
            Ok(query) => self.cache.subscribe(
                key,
                query,
                Shape::Page {
                    order_field: self.pager.order_field().to_string(),
                },
            ),
            Err(err) => rejected(key, err),
        };
        LiveQuery::new(handle, project_page)
    }
}

/// Handle for a request refused before reaching the cache
fn rejected(key: Key, err: LiveError) -> ConsumerHandle {
    tracing::warn!(key = %key, "live query rejected: {}", err);
    ConsumerHandle::detached(key, 0, LiveState::Failed(err.to_failure()))
}

//! Subscription cache: one live feed per key, shared by many consumers
//!
//! The cache owns every [`ChangeSource`]. The first consumer of a key opens
//! the feed, later consumers attach to it and immediately see the latest
//! state, and the last consumer to leave cancels the feed and evicts the
//! entry. A failed feed is delivered to all of its consumers and evicted, so
//! the next subscribe retries the open.
//!
//! State is published through a `watch` channel per entry: consumers always
//! see the most recent state, and an undelivered older state is superseded
//! by a newer one.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use crate::backend::DocumentBackend;
use crate::error::{ErrorKind, Failure, LiveError};
use crate::normalize::{normalize, SortSpec};
use crate::pager::shape_page;
use crate::query::QueryDescriptor;
use crate::source::{ChangeSource, SourceEvent};
use crate::types::{Document, Key, LiveState, Snapshot};

/// Identifier of one consumer registration
pub type ConsumerId = u64;

/// How raw listener results become a [`Snapshot`]
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// First record, if any
    Document,
    /// Records in server order, empty collapsed to the marker
    List,
    /// Records ordered client-side, empty collapsed to the marker
    Sorted(SortSpec),
    /// Page with a cursor at its last record under `order_field`
    Page { order_field: String },
}

impl Shape {
    pub fn apply(&self, docs: Vec<Document>) -> Snapshot {
        match self {
            Shape::Document => Snapshot::Document(docs.into_iter().next()),
            Shape::List => Snapshot::List(if docs.is_empty() { None } else { Some(docs) }),
            Shape::Sorted(spec) => Snapshot::List(normalize(docs, spec)),
            Shape::Page { order_field } => Snapshot::Page(shape_page(docs, order_field)),
        }
    }
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Feeds opened
    pub opened: AtomicU64,
    /// Feeds closed because their last consumer left
    pub closed: AtomicU64,
    /// Feeds evicted after a failure
    pub failed: AtomicU64,
    /// Consumers that joined a feed with a state already available
    pub replays: AtomicU64,
    /// Snapshots published to consumers
    pub delivered: AtomicU64,
    /// Events dropped because their feed was already gone
    pub dropped: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub entries: usize,
    pub consumers: usize,
    pub opened: u64,
    pub closed: u64,
    pub failed: u64,
    pub replays: u64,
    pub delivered: u64,
    pub dropped: u64,
}

struct Entry {
    generation: u64,
    state: watch::Sender<LiveState>,
    consumers: HashSet<ConsumerId>,
    source: Option<ChangeSource>,
}

/// Keyed registry of live feeds
pub struct SubscriptionCache {
    backend: Arc<dyn DocumentBackend>,
    registry: Mutex<HashMap<Key, Entry>>,
    stats: CacheStats,
    next_consumer: AtomicU64,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl SubscriptionCache {
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            registry: Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
            next_consumer: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub fn backend(&self) -> &Arc<dyn DocumentBackend> {
        &self.backend
    }

    /// Attach a consumer to the feed for `key`, opening it if needed.
    ///
    /// Returns immediately. The handle starts at the latest state of an
    /// existing feed, or `Loading` for a new one. `query` and `shape` are
    /// only used when this call opens the feed.
    ///
    /// Outside a tokio runtime, or after [`shutdown`](Self::shutdown), the
    /// handle is already failed and no feed is opened.
    pub fn subscribe(self: &Arc<Self>, key: Key, query: QueryDescriptor, shape: Shape) -> ConsumerHandle {
        let id = self.next_consumer.fetch_add(1, Ordering::Relaxed);

        if self.closed.load(Ordering::Acquire) {
            return ConsumerHandle::detached(key, id, LiveState::Failed(closed_failure()));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            let err = LiveError::OpenFailure("no tokio runtime to drive the listener".to_string());
            tracing::warn!(key = %key, "cannot open feed: {}", err);
            return ConsumerHandle::detached(key, id, LiveState::Failed(err.to_failure()));
        }

        let mut registry = self.registry.lock();
        // shutdown() may have drained the registry since the check above
        if self.closed.load(Ordering::Acquire) {
            drop(registry);
            return ConsumerHandle::detached(key, id, LiveState::Failed(closed_failure()));
        }
        let rx = match registry.get_mut(&key) {
            Some(entry) => {
                entry.consumers.insert(id);
                if !entry.state.borrow().is_loading() {
                    self.stats.replays.fetch_add(1, Ordering::Relaxed);
                }
                tracing::trace!(key = %key, consumer = id, consumers = entry.consumers.len(), "joined feed");
                entry.state.subscribe()
            }
            None => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(LiveState::Loading);
                let mut entry = Entry {
                    generation,
                    state: tx,
                    consumers: HashSet::from([id]),
                    source: None,
                };

                let cache = Arc::downgrade(self);
                let sink_key = key.clone();
                entry.source = Some(ChangeSource::open(
                    self.backend.clone(),
                    key.clone(),
                    query,
                    move |event| on_source_event(&cache, &sink_key, generation, &shape, event),
                ));
                registry.insert(key.clone(), entry);
                self.stats.opened.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, consumer = id, generation, "opened feed");
                rx
            }
        };
        drop(registry);

        ConsumerHandle {
            cache: Arc::downgrade(self),
            key,
            id,
            rx,
            cancelled: false,
        }
    }

    /// Callback form of [`subscribe`](Self::subscribe).
    ///
    /// `on_next` runs for every snapshot, `on_error` once if the feed fails.
    /// Spawns the delivery task, so this must be called within a tokio
    /// runtime.
    pub fn subscribe_with<N, E>(
        self: &Arc<Self>,
        key: Key,
        query: QueryDescriptor,
        shape: Shape,
        on_next: N,
        on_error: E,
    ) -> CallbackSubscription
    where
        N: Fn(Arc<Snapshot>) + Send + 'static,
        E: FnOnce(Failure) + Send + 'static,
    {
        let mut handle = self.subscribe(key, query, shape);
        let task = tokio::spawn(async move {
            loop {
                let state = handle.rx.borrow_and_update().clone();
                match state {
                    LiveState::Ready(snapshot) => on_next(snapshot),
                    LiveState::Failed(failure) => {
                        on_error(failure);
                        break;
                    }
                    LiveState::Loading => {}
                }
                if handle.rx.changed().await.is_err() {
                    break;
                }
            }
            handle.cancel();
        });
        CallbackSubscription { task }
    }

    /// Number of live feeds
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.registry.lock().contains_key(key)
    }

    /// Consumers attached to the feed for `key`
    pub fn consumer_count(&self, key: &Key) -> usize {
        self.registry.lock().get(key).map_or(0, |e| e.consumers.len())
    }

    /// Latest state of the feed for `key`, if one is live
    pub fn peek(&self, key: &Key) -> Option<LiveState> {
        self.registry.lock().get(key).map(|e| e.state.borrow().clone())
    }

    pub fn stats(&self) -> CacheStatsResponse {
        let registry = self.registry.lock();
        CacheStatsResponse {
            entries: registry.len(),
            consumers: registry.values().map(|e| e.consumers.len()).sum(),
            opened: self.stats.opened.load(Ordering::Relaxed),
            closed: self.stats.closed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            replays: self.stats.replays.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Cancel every feed and refuse new subscriptions.
    ///
    /// Attached consumers observe a `Closed` failure.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<(Key, Entry)> = self.registry.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            entry.state.send_replace(LiveState::Failed(closed_failure()));
            if let Some(source) = entry.source {
                source.cancel();
            }
        }
        tracing::info!(feeds = count, "subscription cache shut down");
    }

    /// Detach consumer `id` from `key`; closes the feed if it was the last
    fn release(&self, key: &Key, id: ConsumerId) {
        let evicted = {
            let mut registry = self.registry.lock();
            let Some(entry) = registry.get_mut(key) else {
                return;
            };
            if !entry.consumers.remove(&id) {
                return;
            }
            if !entry.consumers.is_empty() {
                tracing::trace!(key = %key, consumer = id, remaining = entry.consumers.len(), "left feed");
                return;
            }
            registry.remove(key)
        };

        // Cancel outside the registry lock
        if let Some(entry) = evicted {
            if let Some(source) = &entry.source {
                source.cancel();
            }
            self.stats.closed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, generation = entry.generation, "closed feed");
        }
    }
}

impl Drop for SubscriptionCache {
    fn drop(&mut self) {
        for (_, entry) in self.registry.get_mut().drain() {
            if let Some(source) = entry.source {
                source.cancel();
            }
        }
    }
}

/// Route an event from the source of generation `generation` to its entry
fn on_source_event(
    cache: &Weak<SubscriptionCache>,
    key: &Key,
    generation: u64,
    shape: &Shape,
    event: SourceEvent,
) {
    let Some(cache) = cache.upgrade() else {
        return;
    };

    let evicted = {
        let mut registry = cache.registry.lock();
        let current = registry
            .get(key)
            .is_some_and(|entry| entry.generation == generation);
        if !current {
            cache.stats.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key = %key, generation, "dropping event for stale feed");
            return;
        }

        match event {
            SourceEvent::Snapshot(docs) => {
                let snapshot = shape.apply(docs);
                if let Some(entry) = registry.get(key) {
                    entry.state.send_replace(LiveState::Ready(Arc::new(snapshot)));
                }
                cache.stats.delivered.fetch_add(1, Ordering::Relaxed);
                None
            }
            SourceEvent::Failed(err) => {
                let failure = err.to_failure();
                tracing::warn!(key = %key, kind = %failure.kind, "live query failed: {}", failure.message);
                let entry = registry.remove(key);
                if let Some(entry) = &entry {
                    entry.state.send_replace(LiveState::Failed(failure));
                }
                cache.stats.failed.fetch_add(1, Ordering::Relaxed);
                entry
            }
        }
    };

    // Dropped outside the registry lock
    drop(evicted);
}

/// A consumer's registration on one feed.
///
/// Dropping the handle unsubscribes.
pub struct ConsumerHandle {
    cache: Weak<SubscriptionCache>,
    key: Key,
    id: ConsumerId,
    rx: watch::Receiver<LiveState>,
    cancelled: bool,
}

impl ConsumerHandle {
    /// Handle not attached to any feed, fixed at `state`
    pub(crate) fn detached(key: Key, id: ConsumerId, state: LiveState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self {
            cache: Weak::new(),
            key,
            id,
            rx,
            cancelled: true,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Latest state of the feed
    pub fn state(&self) -> LiveState {
        self.rx.borrow().clone()
    }

    /// Wait for a state newer than the last one observed through this
    /// method, and return it.
    ///
    /// Returns `None` once the feed is gone and no newer state remains.
    pub async fn changed(&mut self) -> Option<LiveState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the feed leaves `Loading`
    pub async fn ready(&mut self) -> LiveState {
        let state = self.rx.borrow_and_update().clone();
        if !state.is_loading() {
            return state;
        }
        let settled = self.rx.wait_for(|s| !s.is_loading()).await.map(|s| s.clone());
        match settled {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Stream of states, starting with the current one
    pub fn stream(&self) -> WatchStream<LiveState> {
        WatchStream::new(self.rx.clone())
    }

    /// Unsubscribe. Idempotent and immediate.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        if let Some(cache) = self.cache.upgrade() {
            cache.release(&self.key, self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

/// Subscription driven by callbacks; canceled on drop
pub struct CallbackSubscription {
    task: JoinHandle<()>,
}

impl CallbackSubscription {
    /// Stop invoking callbacks and unsubscribe
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for CallbackSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Failure for consumers of a cache that has shut down
pub fn closed_failure() -> Failure {
    Failure::new(ErrorKind::Closed, LiveError::Closed.to_string())
}

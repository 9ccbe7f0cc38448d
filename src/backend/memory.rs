//! In-process document backend
//!
//! Keeps collections in memory and re-evaluates every open listener on each
//! write, so listeners observe snapshots in commit order. Used by tests, the
//! benches and the `livedoc-watch` demo; also handy as a stand-in when the
//! real database is unavailable.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::{DocumentBackend, Listener, ListenerEvent};
use crate::config::{LiveConfig, DEFAULT_LISTENER_BUFFER};
use crate::error::{LiveError, Result};
use crate::query::QueryDescriptor;
use crate::types::{Document, DocumentId};

struct ListenerSlot {
    query: QueryDescriptor,
    tx: async_channel::Sender<ListenerEvent>,
    /// Last result sent, to skip writes that do not change it
    last: Vec<Document>,
}

#[derive(Default)]
struct Collection {
    docs: BTreeMap<DocumentId, Document>,
    listeners: HashMap<u64, ListenerSlot>,
}

impl Collection {
    /// Push fresh results to every listener whose result changed
    fn notify(&mut self) {
        let docs = &self.docs;
        let mut gone = Vec::new();
        for (id, slot) in self.listeners.iter_mut() {
            let result = slot.query.evaluate(docs.values());
            if result == slot.last {
                continue;
            }
            slot.last = result.clone();
            // A full buffer evicts the oldest pending snapshot: latest wins
            if slot.tx.force_send(ListenerEvent::Snapshot(result)).is_err() {
                gone.push(*id);
            }
        }
        for id in gone {
            self.listeners.remove(&id);
        }
    }
}

struct Inner {
    collections: DashMap<String, Collection>,
    denied: RwLock<HashSet<String>>,
    next_listener: AtomicU64,
    opened_total: AtomicU64,
    buffer: usize,
}

/// In-memory [`DocumentBackend`]
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_LISTENER_BUFFER)
    }

    /// Backend whose listeners hold at most `buffer` pending snapshots
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                collections: DashMap::new(),
                denied: RwLock::new(HashSet::new()),
                next_listener: AtomicU64::new(1),
                opened_total: AtomicU64::new(0),
                buffer: buffer.max(1),
            }),
        }
    }

    pub fn from_config(config: &LiveConfig) -> Self {
        Self::with_buffer(config.listener_buffer)
    }

    /// Insert or replace a document
    pub fn put(&self, collection: &str, doc: Document) {
        let mut coll = self.inner.collections.entry(collection.to_string()).or_default();
        tracing::trace!(collection, id = %doc.id, "put document");
        coll.docs.insert(doc.id.clone(), doc);
        coll.notify();
    }

    /// Insert several documents as one commit
    pub fn put_many(&self, collection: &str, docs: impl IntoIterator<Item = Document>) {
        let mut coll = self.inner.collections.entry(collection.to_string()).or_default();
        for doc in docs {
            coll.docs.insert(doc.id.clone(), doc);
        }
        coll.notify();
    }

    /// Set one field on an existing document
    pub fn set_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let mut coll = self
            .inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| LiveError::InvalidInput(format!("no such collection: {}", collection)))?;
        let doc = coll
            .docs
            .get_mut(id)
            .ok_or_else(|| LiveError::InvalidInput(format!("no such document: {}", id)))?;
        doc.fields.insert(field.to_string(), value.into());
        coll.notify();
        Ok(())
    }

    pub fn delete(&self, collection: &str, id: &str) -> Option<Document> {
        let mut coll = self.inner.collections.get_mut(collection)?;
        let removed = coll.docs.remove(id);
        if removed.is_some() {
            coll.notify();
        }
        removed
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.inner
            .collections
            .get(collection)
            .and_then(|c| c.docs.get(id).cloned())
    }

    /// Number of documents in `collection`
    pub fn count(&self, collection: &str) -> usize {
        self.inner.collections.get(collection).map_or(0, |c| c.docs.len())
    }

    /// Load `{"collection": [doc, ...], ...}`; returns documents loaded
    pub fn seed_from_json(&self, json: &str) -> Result<usize> {
        let seed: HashMap<String, Vec<Document>> = serde_json::from_str(json)?;
        let mut total = 0;
        for (collection, docs) in seed {
            total += docs.len();
            self.put_many(&collection, docs);
        }
        Ok(total)
    }

    /// Make listener opens on `collection` fail as permission denied
    pub fn deny_collection(&self, collection: &str) {
        self.inner.denied.write().insert(collection.to_string());
    }

    pub fn allow_collection(&self, collection: &str) {
        self.inner.denied.write().remove(collection);
    }

    /// Fail every open listener on `collection` mid-stream.
    ///
    /// Returns the number of listeners terminated.
    pub fn fail_listeners(&self, collection: &str, message: &str) -> usize {
        let Some(mut coll) = self.inner.collections.get_mut(collection) else {
            return 0;
        };
        let failed: Vec<ListenerSlot> = coll.listeners.drain().map(|(_, slot)| slot).collect();
        for slot in &failed {
            let _ = slot.tx.force_send(ListenerEvent::Error(message.to_string()));
        }
        failed.len()
    }

    /// Listeners currently registered across all collections
    pub fn active_listeners(&self) -> usize {
        self.inner
            .collections
            .iter()
            .map(|c| c.listeners.len())
            .sum()
    }

    /// Listeners currently registered on `collection`
    pub fn listeners_on(&self, collection: &str) -> usize {
        self.inner
            .collections
            .get(collection)
            .map_or(0, |c| c.listeners.len())
    }

    /// Listeners ever opened
    pub fn opened_total(&self) -> u64 {
        self.inner.opened_total.load(Ordering::Relaxed)
    }

    fn check_access(&self, query: &QueryDescriptor) -> Result<()> {
        query.validate()?;
        if self.inner.denied.read().contains(&query.collection) {
            return Err(LiveError::OpenFailure(format!(
                "permission denied: missing or insufficient permissions for '{}'",
                query.collection
            )));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn close_listener(inner: &Weak<Inner>, collection: &str, id: u64) {
    if let Some(inner) = inner.upgrade() {
        if let Some(mut coll) = inner.collections.get_mut(collection) {
            if coll.listeners.remove(&id).is_some() {
                tracing::debug!(collection, listener = id, "listener closed");
            }
        }
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn open_listener(&self, query: &QueryDescriptor) -> Result<Listener> {
        self.check_access(query)?;

        let (tx, rx) = async_channel::bounded(self.inner.buffer);
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        {
            let mut coll = self
                .inner
                .collections
                .entry(query.collection.clone())
                .or_default();
            let initial = query.evaluate(coll.docs.values());
            let _ = tx.force_send(ListenerEvent::Snapshot(initial.clone()));
            coll.listeners.insert(
                id,
                ListenerSlot {
                    query: query.clone(),
                    tx,
                    last: initial,
                },
            );
        }
        self.inner.opened_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(collection = %query.collection, listener = id, "listener opened");

        let inner = Arc::downgrade(&self.inner);
        let collection = query.collection.clone();
        Ok(Listener::new(rx, move || close_listener(&inner, &collection, id)))
    }

    async fn fetch(&self, query: &QueryDescriptor) -> Result<Vec<Document>> {
        self.check_access(query)?;
        Ok(self
            .inner
            .collections
            .get(&query.collection)
            .map(|c| query.evaluate(c.docs.values()))
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

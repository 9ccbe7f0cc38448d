//! Change sources: one backend listener exposed as a push feed
//!
//! A [`ChangeSource`] opens a listener in a background task and forwards its
//! events to a sink in the order received. It never retries: an open error or
//! a listener error is delivered once and ends the source, so permission or
//! configuration problems are never masked as transient.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::backend::{DocumentBackend, ListenerEvent};
use crate::error::LiveError;
use crate::query::QueryDescriptor;
use crate::types::{Document, Key};

/// Event forwarded from a source to its sink
#[derive(Debug)]
pub enum SourceEvent {
    Snapshot(Vec<Document>),
    /// Terminal: nothing follows
    Failed(LiveError),
}

type Sink = Box<dyn Fn(SourceEvent) + Send + Sync>;

struct SourceShared {
    key: Key,
    cancelled: AtomicBool,
    wake: Notify,
    delivered: AtomicU64,
    dropped: AtomicU64,
    sink: Sink,
}

impl SourceShared {
    /// Forward `event` unless the source was canceled first
    fn deliver(&self, event: SourceEvent) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key = %self.key, "dropping event after cancel");
            return false;
        }
        (self.sink)(event);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Live feed for one key
pub struct ChangeSource {
    shared: Arc<SourceShared>,
    task: JoinHandle<()>,
}

impl ChangeSource {
    /// Start a feed for `query`, forwarding events to `sink`.
    ///
    /// Returns immediately; the listener is opened in a spawned task, so
    /// this must be called within a tokio runtime.
    pub fn open<F>(backend: Arc<dyn DocumentBackend>, key: Key, query: QueryDescriptor, sink: F) -> Self
    where
        F: Fn(SourceEvent) + Send + Sync + 'static,
    {
        let shared = Arc::new(SourceShared {
            key,
            cancelled: AtomicBool::new(false),
            wake: Notify::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            sink: Box::new(sink),
        });
        let task = tokio::spawn(pump(backend, query, shared.clone()));
        Self { shared, task }
    }

    pub fn key(&self) -> &Key {
        &self.shared.key
    }

    /// Stop the feed and close the listener. Idempotent.
    ///
    /// Events that reach the source after this call are dropped.
    pub fn cancel(&self) {
        if !self.shared.cancelled.swap(true, Ordering::AcqRel) {
            tracing::debug!(key = %self.shared.key, "change source canceled");
            self.shared.wake.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Whether the background task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Events forwarded to the sink
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Events dropped because they arrived after cancel
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for ChangeSource {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for ChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSource")
            .field("key", &self.shared.key)
            .field("cancelled", &self.is_cancelled())
            .field("delivered", &self.delivered())
            .finish()
    }
}

async fn pump(backend: Arc<dyn DocumentBackend>, query: QueryDescriptor, shared: Arc<SourceShared>) {
    let opened = tokio::select! {
        biased;
        _ = shared.wake.notified() => return,
        opened = backend.open_listener(&query) => opened,
    };

    let mut listener = match opened {
        Ok(listener) => listener,
        Err(err) => {
            let err = match err {
                LiveError::OpenFailure(msg) => LiveError::OpenFailure(msg),
                other => LiveError::OpenFailure(other.to_string()),
            };
            shared.deliver(SourceEvent::Failed(err));
            return;
        }
    };

    // Canceled while the open was in flight
    if shared.is_cancelled() {
        listener.close();
        return;
    }

    loop {
        let event = tokio::select! {
            biased;
            _ = shared.wake.notified() => break,
            event = listener.recv() => event,
        };

        match event {
            Some(ListenerEvent::Snapshot(docs)) => {
                shared.deliver(SourceEvent::Snapshot(docs));
            }
            Some(ListenerEvent::Error(msg)) => {
                shared.deliver(SourceEvent::Failed(LiveError::DeliveryFailure(msg)));
                break;
            }
            None => {
                shared.deliver(SourceEvent::Failed(LiveError::DeliveryFailure(
                    "listener closed by backend".to_string(),
                )));
                break;
            }
        }
    }

    listener.close();
}

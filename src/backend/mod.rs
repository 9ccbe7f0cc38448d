//! Document database backend abstraction
//!
//! The cache never talks to a database directly. It opens listeners through
//! a [`DocumentBackend`], which a real deployment implements over its
//! database client, and which [`MemoryBackend`] implements in process.

mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;

use crate::error::Result;
use crate::query::QueryDescriptor;
use crate::types::Document;

/// Event pushed by an open listener
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    /// Full current result of the query, in server order
    Snapshot(Vec<Document>),
    /// The listener failed and will not emit again
    Error(String),
}

/// One open listener registration on the backend.
///
/// Events arrive in commit order. Closing is idempotent and also happens on
/// drop.
pub struct Listener {
    events: async_channel::Receiver<ListenerEvent>,
    close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Listener {
    pub fn new(
        events: async_channel::Receiver<ListenerEvent>,
        close: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            events,
            close: Some(Box::new(close)),
        }
    }

    /// Next event, or `None` once the backend stops the listener
    pub async fn recv(&self) -> Option<ListenerEvent> {
        self.events.recv().await.ok()
    }

    /// Remove the registration from the backend
    pub fn close(&mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
        self.events.close();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_none()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("pending", &self.events.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Real-time document database as seen by the cache.
///
/// Opening a listener establishes a remote registration; implementations
/// must deliver snapshots for one listener in commit order and may retry
/// transient transport errors internally, but must report permission and
/// configuration problems as errors.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Open a live listener for `query`.
    ///
    /// Errors here are open failures: the listener was never established.
    async fn open_listener(&self, query: &QueryDescriptor) -> Result<Listener>;

    /// Run `query` once without listening
    async fn fetch(&self, query: &QueryDescriptor) -> Result<Vec<Document>>;

    /// Backend name for diagnostics
    fn name(&self) -> &str;
}

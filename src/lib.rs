//! livedoc - live document queries
//!
//! Subscribes consumers to live documents and collections in a real-time
//! document database. Identical queries are deduplicated onto one listener,
//! late joiners see the latest snapshot immediately, unordered results can
//! be sorted client-side, and collections can be paged forward by cursor.

pub mod accessors;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod normalize;
pub mod orders;
pub mod pager;
pub mod query;
pub mod source;
pub mod types;

pub use accessors::{LiveQueries, LiveQuery, PagedResult, QueryResult};
pub use backend::{DocumentBackend, Listener, ListenerEvent, MemoryBackend};
pub use cache::{ConsumerHandle, Shape, SubscriptionCache};
pub use config::LiveConfig;
pub use error::{ErrorKind, Failure, LiveError, Result};
pub use orders::OrderQueries;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

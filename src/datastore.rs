//! The remote-backed local store the bridge sits on.
//!
//! Query execution, conflict resolution and sync with the backend all live
//! behind [`DataStore`]. The bridge only consumes its observe/save/delete/clear
//! surface.

use crate::connectivity::ConnectivityObserver;
use crate::error::StoreError;
use crate::key::Query;
use crate::model::ModelKind;
use crossbeam_channel::Receiver;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a store-side watcher.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(pub u64);

impl fmt::Debug for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatcherId({})", self.0)
    }
}

/// Full result set for a query, as raw JSON records.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSnapshot {
    pub items: Vec<Value>,
    /// True once the store has reconciled this query with the backend.
    pub is_synced: bool,
}

/// Events pushed by the store to a feed.
#[derive(Clone, Debug)]
pub enum FeedEvent {
    /// The complete current result set.
    Snapshot(RawSnapshot),
    /// The feed failed; no further events follow.
    Failed(StoreError),
}

/// A live observe/query feed.
///
/// Dropping the feed releases the watcher held by the store.
pub struct QueryFeed {
    pub id: WatcherId,
    /// Channel to receive events. Disconnects when the store closes the feed.
    pub receiver: Receiver<FeedEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl QueryFeed {
    pub fn new(id: WatcherId, receiver: Receiver<FeedEvent>) -> Self {
        Self {
            id,
            receiver,
            release: None,
        }
    }

    /// Run `release` when the feed is dropped.
    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }
}

impl fmt::Debug for QueryFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFeed").field("id", &self.id).finish()
    }
}

impl Drop for QueryFeed {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Observe/query capable local store reconciling with a remote backend.
pub trait DataStore: Send + Sync {
    /// Open a push-based feed of full snapshots for `query`.
    ///
    /// Implementations should deliver the current result set promptly and a
    /// new one after every change that affects it.
    fn observe_query(&self, query: &Query) -> Result<QueryFeed, StoreError>;

    /// Upsert a record by id.
    fn save(&self, kind: ModelKind, id: &str, payload: Value) -> Result<(), StoreError>;

    /// Delete a record by id.
    fn delete(&self, kind: ModelKind, id: &str) -> Result<(), StoreError>;

    /// Wipe the local cache, forcing a resync on the next subscribe.
    fn clear(&self) -> Result<(), StoreError>;

    /// Register for network status changes. Stores without a notion of
    /// connectivity ignore this.
    fn add_connectivity_observer(&self, _observer: Arc<dyn ConnectivityObserver>) {}
}

impl<S: DataStore + ?Sized> DataStore for Arc<S> {
    fn observe_query(&self, query: &Query) -> Result<QueryFeed, StoreError> {
        (**self).observe_query(query)
    }

    fn save(&self, kind: ModelKind, id: &str, payload: Value) -> Result<(), StoreError> {
        (**self).save(kind, id, payload)
    }

    fn delete(&self, kind: ModelKind, id: &str) -> Result<(), StoreError> {
        (**self).delete(kind, id)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }

    fn add_connectivity_observer(&self, observer: Arc<dyn ConnectivityObserver>) {
        (**self).add_connectivity_observer(observer)
    }
}

//! In-process [`DataStore`] that pushes full snapshots to its watchers.
//!
//! Stands in for the remote-backed store in tests, benchmarks and demos. Every
//! write re-evaluates the queries of the affected kind and pushes the complete
//! result set to each matching watcher. Writes succeed locally whether or not
//! the store considers itself online.

use crate::config::BridgeConfig;
use crate::connectivity::{ConnectivityObserver, NetworkStatus};
use crate::datastore::{DataStore, FeedEvent, QueryFeed, RawSnapshot, WatcherId};
use crate::error::StoreError;
use crate::key::Query;
use crate::model::{Model, ModelKind};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Default max buffered snapshots per watcher.
const DEFAULT_BUFFER_SIZE: usize = 64;

/// Internal watcher state.
struct Watcher {
    query: Query,
    sender: Sender<FeedEvent>,
    /// Store-side handle on the same channel, used to evict the oldest
    /// queued snapshot when the feed is full.
    backlog: Receiver<FeedEvent>,
}

impl Watcher {
    /// Queue an event. A full feed loses its oldest snapshots instead of the
    /// newest, so a slow reader always catches up to the current result set.
    fn push(&self, id: WatcherId, event: FeedEvent) {
        let mut event = event;
        loop {
            match self.sender.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(returned)) => {
                    if self.backlog.try_recv().is_ok() {
                        debug!(watcher = ?id, "feed full, discarded oldest snapshot");
                    }
                    event = returned;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

type Table = BTreeMap<String, Value>;

struct Inner {
    tables: RwLock<HashMap<ModelKind, Table>>,
    watchers: RwLock<HashMap<WatcherId, Watcher>>,
    next_id: AtomicU64,
    buffer_size: usize,
    synced: RwLock<HashSet<ModelKind>>,
    online: RwLock<bool>,
    observers: Mutex<Vec<Arc<dyn ConnectivityObserver>>>,
    write_error: RwLock<Option<StoreError>>,
    observe_error: RwLock<Option<StoreError>>,
    writes: AtomicU64,
}

/// In-memory local store.
///
/// Cloning is cheap and clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Store whose feeds buffer `config.feed_buffer_size` snapshots.
    pub fn with_config(config: &BridgeConfig) -> Self {
        Self::with_buffer_size(config.feed_buffer_size)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(HashMap::new()),
                watchers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer_size: buffer_size.max(1),
                synced: RwLock::new([ModelKind::Podcast, ModelKind::Episode].into_iter().collect()),
                online: RwLock::new(true),
                observers: Mutex::new(Vec::new()),
                write_error: RwLock::new(None),
                observe_error: RwLock::new(None),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Upsert a typed record.
    pub fn insert<M: Model>(&self, model: &M) -> Result<(), StoreError> {
        self.save(M::KIND, model.id(), serde_json::to_value(model)?)
    }

    /// Typed copy of every record of `M`'s kind.
    pub fn all<M: Model>(&self) -> Result<Vec<M>, StoreError> {
        let tables = self.inner.tables.read();
        let records = tables
            .get(&M::KIND)
            .into_iter()
            .flat_map(|table| table.values())
            .map(|value| serde_json::from_value(value.clone()).map_err(StoreError::from))
            .collect();
        records
    }

    pub fn contains(&self, kind: ModelKind, id: &str) -> bool {
        self.inner
            .tables
            .read()
            .get(&kind)
            .map_or(false, |table| table.contains_key(id))
    }

    pub fn len(&self, kind: ModelKind) -> usize {
        self.inner.tables.read().get(&kind).map_or(0, Table::len)
    }

    /// Number of open feeds.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.read().len()
    }

    /// Number of save/delete calls that reached the store, failed ones included.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Mark `kind` as reconciled (or not) with the backend and re-emit.
    pub fn set_synced(&self, kind: ModelKind, synced: bool) {
        let tables = self.inner.tables.write();
        {
            let mut set = self.inner.synced.write();
            if synced {
                set.insert(kind);
            } else {
                set.remove(&kind);
            }
        }
        self.broadcast(&tables, kind);
    }

    /// Change connectivity and notify observers.
    pub fn set_online(&self, online: bool) {
        {
            let mut current = self.inner.online.write();
            if *current == online {
                return;
            }
            *current = online;
        }
        let status = NetworkStatus::from_active(online);
        let observers = self.inner.observers.lock().clone();
        for observer in observers {
            observer.on_status(status);
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.read()
    }

    /// Make every subsequent save/delete fail with `error` (None to recover).
    pub fn fail_writes(&self, error: Option<StoreError>) {
        *self.inner.write_error.write() = error;
    }

    /// Make every subsequent observe_query fail with `error` (None to recover).
    pub fn fail_observe(&self, error: Option<StoreError>) {
        *self.inner.observe_error.write() = error;
    }

    /// Fail every open feed of `kind` and drop it. Returns how many failed.
    pub fn fail_watchers(&self, kind: ModelKind, error: StoreError) -> usize {
        let mut watchers = self.inner.watchers.write();
        let failed: Vec<WatcherId> = watchers
            .iter()
            .filter(|(_, w)| w.query.kind == kind)
            .map(|(id, _)| *id)
            .collect();

        for id in &failed {
            if let Some(watcher) = watchers.remove(id) {
                watcher.push(*id, FeedEvent::Failed(error.clone()));
            }
        }
        failed.len()
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        match self.inner.write_error.read().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn snapshot(&self, tables: &HashMap<ModelKind, Table>, query: &Query) -> RawSnapshot {
        let items = tables
            .get(&query.kind)
            .into_iter()
            .flat_map(|table| table.values())
            .filter(|record| query.predicate.matches(record))
            .cloned()
            .collect();
        RawSnapshot {
            items,
            is_synced: self.inner.synced.read().contains(&query.kind),
        }
    }

    /// Push fresh snapshots to every watcher of `kind`. Callers hold the
    /// tables lock so emissions stay in write order.
    fn broadcast(&self, tables: &HashMap<ModelKind, Table>, kind: ModelKind) {
        let watchers = self.inner.watchers.read();
        for (id, watcher) in watchers.iter() {
            if watcher.query.kind != kind {
                continue;
            }
            let snapshot = self.snapshot(tables, &watcher.query);
            watcher.push(*id, FeedEvent::Snapshot(snapshot));
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn release_watcher(inner: &Weak<Inner>, id: WatcherId) {
    if let Some(inner) = inner.upgrade() {
        if inner.watchers.write().remove(&id).is_some() {
            debug!(watcher = ?id, "watcher released");
        }
    }
}

impl DataStore for MemoryStore {
    fn observe_query(&self, query: &Query) -> Result<QueryFeed, StoreError> {
        if let Some(error) = self.inner.observe_error.read().clone() {
            return Err(error);
        }

        let id = WatcherId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.inner.buffer_size);

        // Initial snapshot and registration under the same tables lock, so no
        // write can slip in between.
        let tables = self.inner.tables.read();
        let initial = self.snapshot(&tables, query);
        let watcher = Watcher {
            query: query.clone(),
            sender,
            backlog: receiver.clone(),
        };
        watcher.push(id, FeedEvent::Snapshot(initial));
        self.inner.watchers.write().insert(id, watcher);
        drop(tables);

        debug!(watcher = ?id, kind = %query.kind, "watcher registered");
        let inner = Arc::downgrade(&self.inner);
        Ok(QueryFeed::new(id, receiver).on_release(move || release_watcher(&inner, id)))
    }

    fn save(&self, kind: ModelKind, id: &str, payload: Value) -> Result<(), StoreError> {
        self.check_write()?;
        if !payload.is_object() {
            return Err(StoreError::SchemaMismatch(format!(
                "{} {} is not an object",
                kind, id
            )));
        }

        let mut tables = self.inner.tables.write();
        tables.entry(kind).or_default().insert(id.to_string(), payload);
        self.broadcast(&tables, kind);
        Ok(())
    }

    fn delete(&self, kind: ModelKind, id: &str) -> Result<(), StoreError> {
        self.check_write()?;

        let mut tables = self.inner.tables.write();
        let removed = tables.get_mut(&kind).and_then(|table| table.remove(id));
        if removed.is_none() {
            return Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        self.broadcast(&tables, kind);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut tables = self.inner.tables.write();
        tables.clear();
        self.broadcast(&tables, ModelKind::Podcast);
        self.broadcast(&tables, ModelKind::Episode);
        debug!("local data cleared");
        Ok(())
    }

    fn add_connectivity_observer(&self, observer: Arc<dyn ConnectivityObserver>) {
        self.inner.observers.lock().push(observer);
    }
}

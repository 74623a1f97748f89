//! Shared fixtures for integration tests.

#![allow(dead_code)]

use crossbeam_channel::{bounded, Receiver, Sender};
use observe_bridge::{
    Category, DataStore, EpisodeData, FeedEvent, ModelKind, PodcastData, Query, QueryFeed,
    RawSnapshot, StateChange, StoreError, SyncedCollectionKey, Phase, WatcherId,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn podcast(id: &str, name: &str, category: Category) -> PodcastData {
    PodcastData {
        id: id.to_string(),
        name: name.to_string(),
        category,
        author: "Author".to_string(),
        rating: Some(10),
        image: None,
    }
}

pub fn episode(id: &str, podcast_id: &str, title: &str) -> EpisodeData {
    EpisodeData {
        id: id.to_string(),
        date: "01 NOV. 2022".to_string(),
        title: title.to_string(),
        duration: "00:30:00".to_string(),
        description: None,
        podcast_id: Some(podcast_id.to_string()),
    }
}

pub fn snapshot<T: Serialize>(items: &[T]) -> FeedEvent {
    FeedEvent::Snapshot(RawSnapshot {
        items: items
            .iter()
            .map(|item| serde_json::to_value(item).unwrap())
            .collect(),
        is_synced: true,
    })
}

/// Wait for a change of `key` into `phase`, skipping others.
pub fn wait_for(
    changes: &Receiver<StateChange<SyncedCollectionKey>>,
    key: &SyncedCollectionKey,
    phase: Phase,
) -> StateChange<SyncedCollectionKey> {
    loop {
        let change = changes
            .recv_timeout(TIMEOUT)
            .unwrap_or_else(|_| panic!("timed out waiting for {} to reach {:?}", key, phase));
        if &change.key == key && change.phase == phase {
            return change;
        }
    }
}

/// Poll `cond` until it holds, failing after [`TIMEOUT`].
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + TIMEOUT;
    while !cond() {
        assert!(std::time::Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Phases seen for `key` until the channel stays quiet for `quiet`.
pub fn phases_for(
    changes: &Receiver<StateChange<SyncedCollectionKey>>,
    key: &SyncedCollectionKey,
    quiet: Duration,
) -> Vec<Phase> {
    let mut phases = Vec::new();
    while let Ok(change) = changes.recv_timeout(quiet) {
        if &change.key == key {
            phases.push(change.phase);
        }
    }
    phases
}

/// Store whose feeds are driven by hand.
///
/// Every `observe_query` creates a feed whose sender the test can reach by
/// index. Opens and releases are logged in order.
#[derive(Default)]
pub struct ScriptedStore {
    feeds: Mutex<Vec<Sender<FeedEvent>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sender of the `n`th opened feed (0-based).
    pub fn feed(&self, n: usize) -> Sender<FeedEvent> {
        self.feeds.lock()[n].clone()
    }

    /// Drop the store's side of feed `n`, closing it.
    pub fn close(&self, n: usize) {
        let (dead, _) = bounded(1);
        self.feeds.lock()[n] = dead;
    }

    pub fn opened(&self) -> usize {
        self.feeds.lock().len()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Wait until `n` feeds have been opened.
    pub fn wait_opened(&self, n: usize) {
        wait_until("feeds to open", || self.opened() >= n);
    }
}

impl DataStore for ScriptedStore {
    fn observe_query(&self, _query: &Query) -> Result<QueryFeed, StoreError> {
        let (sender, receiver) = bounded(16);
        let n = {
            let mut feeds = self.feeds.lock();
            feeds.push(sender);
            feeds.len() - 1
        };
        self.log.lock().push(format!("open:{}", n));

        let log = Arc::clone(&self.log);
        Ok(QueryFeed::new(WatcherId(n as u64), receiver)
            .on_release(move || log.lock().push(format!("release:{}", n))))
    }

    fn save(&self, _kind: ModelKind, _id: &str, _payload: Value) -> Result<(), StoreError> {
        Ok(())
    }

    fn delete(&self, _kind: ModelKind, _id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

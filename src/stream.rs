//! Lazy, cancellable snapshot sequence over a store feed.

use crate::datastore::{DataStore, FeedEvent, QueryFeed, RawSnapshot};
use crate::error::{BridgeError, Result};
use crate::key::Query;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Complete, filter-scoped result set at one point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    /// Informational: the store has reconciled this query at least once.
    pub is_synced: bool,
}

impl<T> Snapshot<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Snapshot<U> {
        Snapshot {
            items: self.items.into_iter().map(f).collect(),
            is_synced: self.is_synced,
        }
    }
}

/// Shared cancellation flag that also wakes blocked readers.
///
/// Cancelling drops the only sender of an internal channel, so every
/// `select!` waiting on [`CancelHandle::signal`] returns immediately.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    sender: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, signal) = bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                sender: Mutex::new(Some(sender)),
                signal,
            }),
        }
    }

    /// Cancel. Returns false if already cancelled.
    pub fn cancel(&self) -> bool {
        self.inner.sender.lock().take().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    /// Disconnects once cancelled.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns a push-based [`QueryFeed`] into a pull-based sequence of decoded
/// snapshots.
///
/// - Only the newest queued snapshot is yielded; older queued ones are skipped.
/// - After cancellation nothing more is yielded, queued snapshots included.
/// - A store failure or undecodable record is yielded once as an error, then
///   the stream is exhausted.
/// - The stream is not rewindable; a fresh subscription needs a fresh stream.
pub struct ObserveQueryStream<T> {
    label: String,
    feed: Option<QueryFeed>,
    cancel: CancelHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ObserveQueryStream<T> {
    /// Open a feed for `query` and wrap it.
    pub fn open(
        store: &dyn DataStore,
        label: impl Into<String>,
        query: &Query,
        cancel: CancelHandle,
    ) -> Result<Self> {
        let label = label.into();
        let feed = store
            .observe_query(query)
            .map_err(|e| BridgeError::Subscription {
                key: label.clone(),
                reason: e.to_string(),
            })?;
        debug!(key = %label, watcher = ?feed.id, "observe feed opened");
        Ok(Self::from_feed(label, feed, cancel))
    }

    pub fn from_feed(label: impl Into<String>, feed: QueryFeed, cancel: CancelHandle) -> Self {
        Self {
            label: label.into(),
            feed: Some(feed),
            cancel,
            _marker: PhantomData,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// True once the stream will yield nothing more.
    pub fn is_terminated(&self) -> bool {
        self.feed.is_none()
    }

    /// Non-blocking pull. `None` means nothing is ready or the stream ended;
    /// check [`is_terminated`](Self::is_terminated) to tell them apart.
    pub fn try_next(&mut self) -> Option<Result<Snapshot<T>>> {
        if self.check_cancelled() {
            return None;
        }
        let received = self.feed.as_ref()?.receiver.try_recv();
        match received {
            Ok(event) => self.accept(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.closed_by_store(),
        }
    }

    /// Pull with a bounded wait. Same `None` semantics as `try_next`.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Result<Snapshot<T>>> {
        if self.check_cancelled() {
            return None;
        }
        let feed = self.feed.as_ref()?.receiver.clone();
        let signal = self.cancel.signal().clone();

        let received = select! {
            recv(feed) -> msg => msg.map_err(|_| RecvTimeoutError::Disconnected),
            recv(signal) -> _ => {
                self.finish();
                return None;
            }
            default(timeout) => Err(RecvTimeoutError::Timeout),
        };

        match received {
            Ok(event) => self.accept(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => self.closed_by_store(),
        }
    }

    fn check_cancelled(&mut self) -> bool {
        if self.feed.is_some() && self.cancel.is_cancelled() {
            debug!(key = %self.label, "observe stream cancelled");
            self.finish();
        }
        self.feed.is_none()
    }

    /// Drop the feed, releasing the store watcher.
    fn finish(&mut self) {
        self.feed = None;
    }

    fn closed_by_store(&mut self) -> Option<Result<Snapshot<T>>> {
        debug!(key = %self.label, "observe feed closed by store");
        self.finish();
        None
    }

    fn accept(&mut self, first: FeedEvent) -> Option<Result<Snapshot<T>>> {
        let event = match &self.feed {
            Some(feed) => latest(first, &feed.receiver),
            None => return None,
        };

        // A cancel that raced with the receive wins.
        if self.check_cancelled() {
            return None;
        }

        match event {
            FeedEvent::Snapshot(raw) => match decode(raw) {
                Ok(snapshot) => Some(Ok(snapshot)),
                Err(e) => {
                    warn!(key = %self.label, error = %e, "undecodable snapshot");
                    Some(Err(self.fail(e.to_string())))
                }
            },
            FeedEvent::Failed(e) => {
                warn!(key = %self.label, error = %e, "observe feed failed");
                Some(Err(self.fail(e.to_string())))
            }
        }
    }

    fn fail(&mut self, reason: String) -> BridgeError {
        self.finish();
        BridgeError::Subscription {
            key: self.label.clone(),
            reason,
        }
    }
}

impl<T: DeserializeOwned> Iterator for ObserveQueryStream<T> {
    type Item = Result<Snapshot<T>>;

    /// Block until a snapshot arrives, the stream is cancelled, or the store
    /// closes or fails the feed.
    fn next(&mut self) -> Option<Self::Item> {
        if self.check_cancelled() {
            return None;
        }
        let feed = self.feed.as_ref()?.receiver.clone();
        let signal = self.cancel.signal().clone();

        let received = select! {
            recv(feed) -> msg => msg,
            recv(signal) -> _ => {
                debug!(key = %self.label, "observe stream cancelled");
                self.finish();
                return None;
            }
        };

        match received {
            Ok(event) => self.accept(event),
            Err(_) => self.closed_by_store(),
        }
    }
}

/// Skip to the newest queued event. A failure is never skipped over.
fn latest(first: FeedEvent, receiver: &Receiver<FeedEvent>) -> FeedEvent {
    let mut event = first;
    while matches!(event, FeedEvent::Snapshot(_)) {
        match receiver.try_recv() {
            Ok(next) => event = next,
            Err(_) => break,
        }
    }
    event
}

fn decode<T: DeserializeOwned>(raw: RawSnapshot) -> std::result::Result<Snapshot<T>, serde_json::Error> {
    let items = raw
        .items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<std::result::Result<Vec<T>, _>>()?;
    Ok(Snapshot {
        items,
        is_synced: raw.is_synced,
    })
}

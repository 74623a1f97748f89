//! At most one live subscription per key.

use crate::error::Result;
use crate::stream::CancelHandle;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Unique identifier for a subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live subscription: a cancel flag plus the worker draining its stream.
///
/// Dropping a subscription cancels it without waiting for the worker.
pub struct Subscription {
    id: SubscriptionId,
    cancel: CancelHandle,
    worker: Option<JoinHandle<()>>,
    /// Disconnects when the worker exits.
    done: Option<Receiver<()>>,
}

impl Subscription {
    /// A subscription with no worker thread of its own.
    pub fn new(id: SubscriptionId, cancel: CancelHandle) -> Self {
        Self {
            id,
            cancel,
            worker: None,
            done: None,
        }
    }

    /// Run `work` on a named thread owned by the subscription.
    pub fn spawn<F>(id: SubscriptionId, cancel: CancelHandle, name: String, work: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = bounded::<()>(0);
        let worker = thread::Builder::new().name(name).spawn(move || {
            let _done = done_tx;
            work();
        })?;

        Ok(Self {
            id,
            cancel,
            worker: Some(worker),
            done: Some(done_rx),
        })
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// True once the worker has exited (stream ended, failed or cancelled).
    /// A subscription without a worker is finished once cancelled.
    pub fn is_finished(&self) -> bool {
        match &self.worker {
            Some(worker) => worker.is_finished(),
            None => self.cancel.is_cancelled(),
        }
    }

    /// Cancel and wait up to `timeout` for the worker to stop.
    fn shutdown(mut self, timeout: Duration) {
        self.cancel.cancel();

        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return,
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }

        let stopped = match self.done.take() {
            Some(done) => !matches!(done.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)),
            None => true,
        };

        if stopped {
            if worker.join().is_err() {
                warn!(id = %self.id, "subscription worker panicked");
            }
        } else {
            warn!(id = %self.id, ?timeout, "subscription worker did not stop in time, detaching");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

type SlotRef = Arc<Mutex<Option<Subscription>>>;

/// Owns the live subscription for each key.
///
/// Each key has its own slot lock, so replacing one key's subscription never
/// waits on another key. An empty slot is only removed from the map while no
/// caller holds a reference to it; otherwise one key could end up with two
/// slots and two live subscriptions.
///
/// A subscription whose worker has exited stays in its slot until replaced or
/// released, but no longer counts as live.
pub struct SubscriptionRegistry<K> {
    slots: Mutex<HashMap<K, SlotRef>>,
    next_id: AtomicU64,
    join_timeout: Duration,
}

impl<K> SubscriptionRegistry<K>
where
    K: Clone + Eq + Hash + fmt::Display,
{
    pub fn new(join_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            join_timeout,
        }
    }

    /// Replace the subscription for `key`.
    ///
    /// Any previous subscription is cancelled and its worker stopped before
    /// `open` runs. `open` receives the new id and a fresh cancel handle; if it
    /// fails the key is left without a subscription.
    pub fn acquire<F>(&self, key: &K, open: F) -> Result<SubscriptionId>
    where
        F: FnOnce(SubscriptionId, CancelHandle) -> Result<Subscription>,
    {
        let slot = self.slot(key);
        let mut current = slot.lock();

        if let Some(previous) = current.take() {
            debug!(key = %key, id = %previous.id(), "cancelling previous subscription");
            previous.shutdown(self.join_timeout);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        match open(id, CancelHandle::new()) {
            Ok(subscription) => {
                debug!(key = %key, id = %id, "subscription acquired");
                *current = Some(subscription);
                Ok(id)
            }
            Err(e) => {
                drop(current);
                self.prune(key, slot);
                Err(e)
            }
        }
    }

    /// Cancel and drop the subscription for `key`. False if there was none.
    pub fn release(&self, key: &K) -> bool {
        let slot = match self.slots.lock().get(key) {
            Some(slot) => Arc::clone(slot),
            None => return false,
        };
        let previous = slot.lock().take();
        let released = match previous {
            Some(subscription) => {
                debug!(key = %key, id = %subscription.id(), "subscription released");
                subscription.shutdown(self.join_timeout);
                true
            }
            None => false,
        };
        self.prune(key, slot);
        released
    }

    /// Release every subscription. Returns how many were registered.
    pub fn release_all(&self) -> usize {
        let slots: Vec<(K, SlotRef)> = self
            .slots
            .lock()
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();

        let mut released = 0;
        for (key, slot) in slots {
            let previous = slot.lock().take();
            if let Some(subscription) = previous {
                debug!(key = %key, id = %subscription.id(), "subscription released");
                subscription.shutdown(self.join_timeout);
                released += 1;
            }
            self.prune(&key, slot);
        }
        released
    }

    /// Id of the live subscription for `key`. `None` once its worker exited.
    pub fn current(&self, key: &K) -> Option<SubscriptionId> {
        let slot = self.slots.lock().get(key).cloned()?;
        let current = slot.lock();
        current
            .as_ref()
            .filter(|subscription| !subscription.is_finished())
            .map(Subscription::id)
    }

    pub fn is_live(&self, key: &K) -> bool {
        self.current(key).is_some()
    }

    /// Keys with a live subscription.
    pub fn keys(&self) -> Vec<K> {
        let slots: Vec<(K, SlotRef)> = self
            .slots
            .lock()
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();
        slots
            .into_iter()
            .filter(|(_, slot)| {
                slot.lock()
                    .as_ref()
                    .map_or(false, |subscription| !subscription.is_finished())
            })
            .map(|(key, _)| key)
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.keys().len()
    }

    /// Number of keys with a slot, live or not.
    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    fn slot(&self, key: &K) -> SlotRef {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Drop `key`'s slot if it is empty and `slot` is the only reference
    /// outside the map. New references are only handed out under the map
    /// lock, so none can appear while it is held.
    fn prune(&self, key: &K, slot: SlotRef) {
        let mut slots = self.slots.lock();
        if Arc::strong_count(&slot) != 2 {
            return;
        }
        let empty = slot.try_lock().map_or(false, |current| current.is_none());
        if empty && slots.get(key).map_or(false, |mapped| Arc::ptr_eq(mapped, &slot)) {
            slots.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use std::sync::atomic::AtomicUsize;

    fn registry() -> SubscriptionRegistry<String> {
        SubscriptionRegistry::new(Duration::from_secs(1))
    }

    /// Worker that blocks until cancelled, counting how many are alive.
    fn open_counted(
        alive: &Arc<AtomicUsize>,
    ) -> impl FnOnce(SubscriptionId, CancelHandle) -> Result<Subscription> {
        let alive = Arc::clone(alive);
        move |id, cancel| {
            let signal = cancel.signal().clone();
            alive.fetch_add(1, Ordering::SeqCst);
            Subscription::spawn(id, cancel, format!("test-{}", id), move || {
                let _ = signal.recv();
                alive.fetch_sub(1, Ordering::SeqCst);
            })
        }
    }

    #[test]
    fn test_acquire_replaces_and_stops_previous() {
        let registry = registry();
        let alive = Arc::new(AtomicUsize::new(0));
        let key = "k".to_string();

        let first = registry.acquire(&key, open_counted(&alive)).unwrap();
        assert_eq!(alive.load(Ordering::SeqCst), 1);

        let second = registry.acquire(&key, open_counted(&alive)).unwrap();
        assert_ne!(first, second);
        assert_eq!(alive.load(Ordering::SeqCst), 1);
        assert_eq!(registry.current(&key), Some(second));
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_previous_stopped_before_open_runs() {
        let registry = registry();
        let alive = Arc::new(AtomicUsize::new(0));
        let key = "k".to_string();
        registry.acquire(&key, open_counted(&alive)).unwrap();

        let seen = Arc::clone(&alive);
        registry
            .acquire(&key, move |id, cancel| {
                assert_eq!(seen.load(Ordering::SeqCst), 0);
                Ok(Subscription::new(id, cancel))
            })
            .unwrap();
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = registry();
        let alive = Arc::new(AtomicUsize::new(0));
        let key = "k".to_string();

        assert!(!registry.release(&key));
        registry.acquire(&key, open_counted(&alive)).unwrap();
        assert!(registry.release(&key));
        assert!(!registry.release(&key));
        assert_eq!(alive.load(Ordering::SeqCst), 0);
        assert!(!registry.is_live(&key));
    }

    #[test]
    fn test_release_all() {
        let registry = registry();
        let alive = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b", "c"] {
            registry.acquire(&key.to_string(), open_counted(&alive)).unwrap();
        }
        assert_eq!(alive.load(Ordering::SeqCst), 3);

        assert_eq!(registry.release_all(), 3);
        assert_eq!(alive.load(Ordering::SeqCst), 0);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_failed_open_leaves_key_empty() {
        let registry = registry();
        let alive = Arc::new(AtomicUsize::new(0));
        let key = "k".to_string();
        registry.acquire(&key, open_counted(&alive)).unwrap();

        let result = registry.acquire(&key, |_, _| Err(BridgeError::Shutdown));
        assert!(result.is_err());
        assert!(!registry.is_live(&key));
        assert_eq!(alive.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_acquire_keeps_one_live() {
        let registry = Arc::new(registry());
        let alive = Arc::new(AtomicUsize::new(0));
        let key = "k".to_string();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let alive = Arc::clone(&alive);
                let key = key.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        registry.acquire(&key, open_counted(&alive)).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(registry.live_count(), 1);
        assert_eq!(alive.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_subscription_cancels() {
        let cancel = CancelHandle::new();
        let subscription = Subscription::new(SubscriptionId(1), cancel.clone());
        assert!(!subscription.is_finished());

        drop(subscription);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_exited_worker_is_not_live() {
        let registry = registry();
        let key = "k".to_string();

        registry
            .acquire(&key, |id, cancel| {
                Subscription::spawn(id, cancel, "test-exit".to_string(), || {})
            })
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while registry.is_live(&key) {
            assert!(std::time::Instant::now() < deadline, "worker never exited");
            thread::sleep(Duration::from_millis(2));
        }
        assert!(registry.keys().is_empty());
        assert_eq!(registry.current(&key), None);

        // Still releasable, and a new acquire replaces it.
        let alive = Arc::new(AtomicUsize::new(0));
        let id = registry.acquire(&key, open_counted(&alive)).unwrap();
        assert_eq!(registry.current(&key), Some(id));
    }

    #[test]
    fn test_empty_slots_pruned() {
        let registry = registry();
        let alive = Arc::new(AtomicUsize::new(0));

        for n in 0..10 {
            let key = format!("k{}", n);
            registry.acquire(&key, open_counted(&alive)).unwrap();
            assert!(registry.release(&key));
        }
        assert_eq!(registry.slot_count(), 0);

        registry.acquire(&"a".to_string(), open_counted(&alive)).unwrap();
        let _ = registry.acquire(&"b".to_string(), |_, _| Err(BridgeError::Shutdown));
        assert_eq!(registry.slot_count(), 1);

        registry.release_all();
        assert_eq!(registry.slot_count(), 0);
    }
}

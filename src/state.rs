//! Per-key view state machine.
//!
//! ```text
//!   NoData ──load──▶ Loading ──snapshot──▶ DataAvailable ◀─┐
//!                      │  ▲                   │    │      snapshot
//!                      │  └──────load─────────┘    └──────┘
//!                    error                          error
//!                      ▼                              │
//!                    Error ◀──────────────────────────┘
//!                      └──load──▶ Loading
//! ```
//!
//! NoData is only re-entered through an explicit reset.

use crate::error::{BridgeError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Load progress and result for one key.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewState<T> {
    NoData,
    Loading,
    DataAvailable {
        data: T,
        /// Informational only; never gates the transition.
        is_synced: bool,
    },
    Error(String),
}

impl<T> Default for ViewState<T> {
    fn default() -> Self {
        ViewState::NoData
    }
}

impl<T> ViewState<T> {
    pub fn phase(&self) -> Phase {
        match self {
            ViewState::NoData => Phase::NoData,
            ViewState::Loading => Phase::Loading,
            ViewState::DataAvailable { .. } => Phase::DataAvailable,
            ViewState::Error(_) => Phase::Error,
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            ViewState::DataAvailable { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            ViewState::DataAvailable { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ViewState::Error(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ViewState<U> {
        match self {
            ViewState::NoData => ViewState::NoData,
            ViewState::Loading => ViewState::Loading,
            ViewState::DataAvailable { data, is_synced } => ViewState::DataAvailable {
                data: f(data),
                is_synced,
            },
            ViewState::Error(reason) => ViewState::Error(reason),
        }
    }

    /// Explicit (re)load request. Valid from every state.
    pub fn begin_loading(&mut self) {
        *self = ViewState::Loading;
    }

    /// Replace the visible data with a fresh snapshot.
    pub fn apply_snapshot(&mut self, data: T, is_synced: bool) -> Result<()> {
        match self.phase() {
            Phase::Loading | Phase::DataAvailable => {
                *self = ViewState::DataAvailable { data, is_synced };
                Ok(())
            }
            from => Err(BridgeError::InvalidTransition {
                from: from.as_str(),
                to: Phase::DataAvailable.as_str(),
            }),
        }
    }

    /// Terminal stream failure. Only a new load leaves this state.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        match self.phase() {
            Phase::Loading | Phase::DataAvailable => {
                *self = ViewState::Error(reason.into());
                Ok(())
            }
            from => Err(BridgeError::InvalidTransition {
                from: from.as_str(),
                to: Phase::Error.as_str(),
            }),
        }
    }

    pub fn reset(&mut self) {
        *self = ViewState::NoData;
    }
}

/// Data-free tag of a [`ViewState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    NoData,
    Loading,
    DataAvailable,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::NoData => "no_data",
            Phase::Loading => "loading",
            Phase::DataAvailable => "data_available",
            Phase::Error => "error",
        }
    }
}

/// Emitted on every accepted transition.
#[derive(Clone, Debug, PartialEq)]
pub struct StateChange<K> {
    pub key: K,
    pub phase: Phase,
    pub generation: u64,
}

/// Fans state changes out to watchers. Disconnected watchers are pruned.
pub struct Notifier<K> {
    watchers: Mutex<Vec<Sender<StateChange<K>>>>,
}

impl<K: Clone> Notifier<K> {
    pub fn new() -> Self {
        Self {
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn watch(&self) -> Receiver<StateChange<K>> {
        let (sender, receiver) = unbounded();
        self.watchers.lock().push(sender);
        receiver
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }

    fn notify(&self, change: StateChange<K>) {
        self.watchers
            .lock()
            .retain(|watcher| watcher.send(change.clone()).is_ok());
    }
}

impl<K: Clone> Default for Notifier<K> {
    fn default() -> Self {
        Self::new()
    }
}

struct Slot<T> {
    state: ViewState<T>,
    generation: u64,
}

/// View states for a family of keys, fenced by generation.
///
/// Every load or reset takes a fresh generation from a table-wide counter.
/// Writers must present the generation they were started with; anything else
/// is dropped. Reset keys lose their slot, and since generations are never
/// reused a writer from before the reset cannot match a later load.
pub struct StateTable<K, T> {
    slots: RwLock<HashMap<K, Slot<T>>>,
    next_generation: AtomicU64,
    notifier: Arc<Notifier<K>>,
}

impl<K, T> StateTable<K, T>
where
    K: Clone + Eq + Hash + std::fmt::Display,
    T: Clone,
{
    pub fn new(notifier: Arc<Notifier<K>>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            notifier,
        }
    }

    /// Current state; `NoData` for keys never loaded.
    pub fn get(&self, key: &K) -> ViewState<T> {
        self.slots
            .read()
            .get(key)
            .map(|slot| slot.state.clone())
            .unwrap_or_default()
    }

    pub fn generation(&self, key: &K) -> u64 {
        self.slots.read().get(key).map_or(0, |slot| slot.generation)
    }

    pub fn keys(&self) -> Vec<K> {
        self.slots.read().keys().cloned().collect()
    }

    /// Enter Loading and return the new generation.
    pub fn begin_loading(&self, key: &K) -> u64 {
        let mut slots = self.slots.write();
        let generation = self.next_generation();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
            state: ViewState::NoData,
            generation,
        });
        slot.generation = generation;
        slot.state.begin_loading();
        self.notifier.notify(StateChange {
            key: key.clone(),
            phase: Phase::Loading,
            generation,
        });
        generation
    }

    /// Apply a snapshot. Returns `Ok(false)` if `generation` is stale.
    pub fn apply_snapshot(&self, key: &K, generation: u64, data: T, is_synced: bool) -> Result<bool> {
        self.transition(key, generation, |state| state.apply_snapshot(data, is_synced))
    }

    /// Record a terminal failure. Returns `Ok(false)` if `generation` is stale.
    pub fn fail(&self, key: &K, generation: u64, reason: impl Into<String>) -> Result<bool> {
        let reason = reason.into();
        self.transition(key, generation, |state| state.fail(reason))
    }

    /// Force a key back to NoData, fencing any writer still running.
    pub fn reset(&self, key: &K) {
        let mut slots = self.slots.write();
        if slots.remove(key).is_some() {
            self.notify_reset(key);
        }
    }

    /// Reset every known key. Returns the keys that were reset.
    pub fn reset_all(&self) -> Vec<K> {
        let mut slots = self.slots.write();
        let keys: Vec<K> = slots.drain().map(|(key, _)| key).collect();
        for key in &keys {
            self.notify_reset(key);
        }
        keys
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    fn notify_reset(&self, key: &K) {
        self.notifier.notify(StateChange {
            key: key.clone(),
            phase: Phase::NoData,
            generation: self.next_generation(),
        });
    }

    fn transition<F>(&self, key: &K, generation: u64, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut ViewState<T>) -> Result<()>,
    {
        let mut slots = self.slots.write();
        let slot = match slots.get_mut(key) {
            Some(slot) if slot.generation == generation => slot,
            current => {
                debug!(
                    key = %key,
                    generation,
                    current = current.map_or(0, |s| s.generation),
                    "dropping update from stale subscription"
                );
                return Ok(false);
            }
        };

        apply(&mut slot.state)?;
        self.notifier.notify(StateChange {
            key: key.clone(),
            phase: slot.state.phase(),
            generation,
        });
        Ok(true)
    }
}

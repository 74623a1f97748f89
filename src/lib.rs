//! # Observe Bridge
//!
//! Live, local-first views over a remote-backed store.
//!
//! ## Core Concepts
//!
//! - **Keys**: a view is identified by a category or a parent podcast id
//! - **Subscriptions**: at most one live observe/query feed per key
//! - **Snapshots**: every emission is the complete current result set
//! - **View states**: NoData, Loading, DataAvailable, Error per key
//! - **Mutations**: fire-and-forget writes, visible through the next snapshot
//!
//! ## Example
//!
//! ```ignore
//! use observe_bridge::{Category, MemoryStore, SyncBridge, ViewState};
//! use std::sync::Arc;
//!
//! let bridge = SyncBridge::new(Arc::new(MemoryStore::new()))?;
//! let changes = bridge.watch();
//!
//! bridge.load_podcasts(Category::Technology)?;
//! while let Ok(change) = changes.recv() {
//!     if let ViewState::DataAvailable { data, .. } = bridge.podcasts(Category::Technology) {
//!         println!("{} podcasts", data.len());
//!     }
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod connectivity;
pub mod datastore;
pub mod error;
pub mod key;
pub mod memory;
pub mod model;
pub mod mutation;
pub mod registry;
pub mod state;
pub mod stream;

// Re-exports
pub use bridge::{Collection, SyncBridge};
pub use config::{BridgeConfig, SEED_ID_MAX_LEN};
pub use connectivity::{ConnectivityObserver, NetworkStatus, NetworkStatusTracker};
pub use datastore::{DataStore, FeedEvent, QueryFeed, RawSnapshot, WatcherId};
pub use error::{BridgeError, Result, StoreError};
pub use key::{Predicate, Query, SyncedCollectionKey};
pub use memory::MemoryStore;
pub use model::{
    Category, Episode, EpisodeData, EpisodeDraft, Model, ModelKind, Podcast, PodcastData,
};
pub use mutation::{Mutation, MutationCoordinator, MutationTicket};
pub use registry::{Subscription, SubscriptionId, SubscriptionRegistry};
pub use state::{Notifier, Phase, StateChange, StateTable, ViewState};
pub use stream::{CancelHandle, ObserveQueryStream, Snapshot};

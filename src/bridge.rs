//! The presentation-facing bridge tying store, registry and view states together.

use crate::config::BridgeConfig;
use crate::connectivity::{NetworkStatus, NetworkStatusTracker};
use crate::datastore::DataStore;
use crate::error::Result;
use crate::key::SyncedCollectionKey;
use crate::model::{Category, Episode, EpisodeData, EpisodeDraft, Model, ModelKind, Podcast, PodcastData};
use crate::mutation::{Mutation, MutationCoordinator, MutationTicket};
use crate::registry::{Subscription, SubscriptionId, SubscriptionRegistry};
use crate::state::{Notifier, StateChange, StateTable, ViewState};
use crate::stream::ObserveQueryStream;
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

type Table<V> = StateTable<SyncedCollectionKey, Vec<V>>;

/// Projected result set of one key.
#[derive(Clone, Debug, PartialEq)]
pub enum Collection {
    Podcasts(Vec<Podcast>),
    Episodes(Vec<Episode>),
}

impl Collection {
    pub fn len(&self) -> usize {
        match self {
            Collection::Podcasts(items) => items.len(),
            Collection::Episodes(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps live, per-key views over the store for the presentation layer.
///
/// Construct one per application and share it. Each loaded key gets its own
/// subscription and worker; reloading a key replaces both. Writes go through
/// [`request_mutation`](Self::request_mutation) and only become visible when
/// the store pushes the next snapshot.
pub struct SyncBridge {
    store: Arc<dyn DataStore>,
    config: BridgeConfig,
    registry: SubscriptionRegistry<SyncedCollectionKey>,
    notifier: Arc<Notifier<SyncedCollectionKey>>,
    podcasts: Arc<Table<Podcast>>,
    episodes: Arc<Table<Episode>>,
    mutations: MutationCoordinator,
    network: Arc<NetworkStatusTracker>,
    /// Loads hold this shared; reload-all holds it exclusively so no load can
    /// land between releasing subscriptions and resetting views.
    reload_gate: RwLock<()>,
}

impl SyncBridge {
    pub fn new(store: Arc<dyn DataStore>) -> Result<Self> {
        Self::with_config(store, BridgeConfig::default())
    }

    pub fn with_config(store: Arc<dyn DataStore>, config: BridgeConfig) -> Result<Self> {
        let network = Arc::new(NetworkStatusTracker::new());
        store.add_connectivity_observer(network.clone());

        let notifier = Arc::new(Notifier::new());
        let mutations = MutationCoordinator::new(Arc::clone(&store), &config)?;

        Ok(Self {
            registry: SubscriptionRegistry::new(config.join_timeout),
            podcasts: Arc::new(StateTable::new(Arc::clone(&notifier))),
            episodes: Arc::new(StateTable::new(Arc::clone(&notifier))),
            notifier,
            mutations,
            network,
            store,
            config,
            reload_gate: RwLock::new(()),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn categories(&self) -> &'static [Category] {
        &Category::ALL
    }

    // --- Loading ---

    /// Enter Loading for `key` and (re)open its subscription.
    ///
    /// Returns once the subscription is established, not once data arrives.
    /// Any previous subscription for the key is stopped first.
    pub fn request_load(&self, key: SyncedCollectionKey) -> Result<SubscriptionId> {
        info!(key = %key, "loading");
        let _gate = self.reload_gate.read();
        match key {
            SyncedCollectionKey::Category(_) => self.open::<PodcastData, Podcast>(&key, &self.podcasts),
            SyncedCollectionKey::Podcast(_) => self.open::<EpisodeData, Episode>(&key, &self.episodes),
        }
    }

    pub fn load_podcasts(&self, category: Category) -> Result<SubscriptionId> {
        self.request_load(SyncedCollectionKey::Category(category))
    }

    pub fn load_episodes(&self, podcast_id: impl Into<String>) -> Result<SubscriptionId> {
        self.request_load(SyncedCollectionKey::Podcast(podcast_id.into()))
    }

    fn open<M, V>(&self, key: &SyncedCollectionKey, table: &Arc<Table<V>>) -> Result<SubscriptionId>
    where
        M: Model,
        V: From<M> + Clone + Send + Sync + 'static,
    {
        let store = Arc::clone(&self.store);
        let table = Arc::clone(table);

        self.registry.acquire(key, |id, cancel| {
            let generation = table.begin_loading(key);

            let stream = ObserveQueryStream::<M>::open(
                store.as_ref(),
                key.to_string(),
                &key.query(),
                cancel.clone(),
            );
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(key = %key, error = %e, "could not open subscription");
                    let _ = table.fail(key, generation, e.to_string());
                    return Err(e);
                }
            };

            let worker_key = key.clone();
            let worker_table = Arc::clone(&table);
            let spawned = Subscription::spawn(id, cancel, format!("observe-{}", key), move || {
                drive(worker_key, generation, stream, worker_table)
            });
            if let Err(e) = &spawned {
                let _ = table.fail(key, generation, e.to_string());
            }
            spawned
        })
    }

    /// Stop the subscription for `key`, keeping its last state.
    ///
    /// Closing a podcast view does not close its episode views; each key
    /// must be closed on its own.
    pub fn close(&self, key: &SyncedCollectionKey) -> bool {
        self.registry.release(key)
    }

    /// Cancel every subscription and reset every view to NoData.
    /// Returns how many subscriptions were live.
    pub fn request_reload_all(&self) -> usize {
        let _gate = self.reload_gate.write();
        let released = self.registry.release_all();
        let podcasts = self.podcasts.reset_all().len();
        let episodes = self.episodes.reset_all().len();
        info!(released, views = podcasts + episodes, "reload all");
        released
    }

    /// Whether `key` has a subscription still draining its stream. False once
    /// the stream failed or the store closed it.
    pub fn is_live(&self, key: &SyncedCollectionKey) -> bool {
        self.registry.is_live(key)
    }

    pub fn live_keys(&self) -> Vec<SyncedCollectionKey> {
        self.registry.keys()
    }

    // --- Reading ---

    pub fn current_state(&self, key: &SyncedCollectionKey) -> ViewState<Collection> {
        match key {
            SyncedCollectionKey::Category(_) => self.podcasts.get(key).map(Collection::Podcasts),
            SyncedCollectionKey::Podcast(_) => self.episodes.get(key).map(Collection::Episodes),
        }
    }

    pub fn podcasts(&self, category: Category) -> ViewState<Vec<Podcast>> {
        self.podcasts.get(&SyncedCollectionKey::Category(category))
    }

    pub fn episodes(&self, podcast_id: &str) -> ViewState<Vec<Episode>> {
        self.episodes
            .get(&SyncedCollectionKey::Podcast(podcast_id.to_string()))
    }

    /// Receive every accepted state transition from now on.
    pub fn watch(&self) -> Receiver<StateChange<SyncedCollectionKey>> {
        self.notifier.watch()
    }

    /// Last connectivity change reported by the store, if any.
    pub fn network_status(&self) -> Option<NetworkStatus> {
        self.network.last()
    }

    // --- Writing ---

    /// Queue a write. View states are left alone; the store's next snapshot
    /// carries the effect.
    pub fn request_mutation(&self, mutation: Mutation) -> Result<MutationTicket> {
        self.mutations.submit(mutation)
    }

    /// Create a new episode under `podcast_id`. The ticket carries its id.
    pub fn add_episode(&self, podcast_id: &str, draft: EpisodeDraft) -> Result<MutationTicket> {
        let record = draft.into_record(podcast_id);
        debug!(podcast = podcast_id, episode = %record.id, title = %record.title, "adding episode");
        self.request_mutation(Mutation::save(&record)?)
    }

    pub fn delete_episode(&self, episode_id: &str) -> Result<MutationTicket> {
        self.request_mutation(Mutation::delete_id(ModelKind::Episode, episode_id))
    }

    pub fn save_podcast(&self, podcast: &Podcast) -> Result<MutationTicket> {
        self.request_mutation(Mutation::save(&PodcastData::from(podcast))?)
    }

    /// Wipe the store's local cache. Open subscriptions stay open and pick up
    /// whatever the store emits next.
    pub fn clear_local_data(&self) -> Result<()> {
        info!("clearing local data");
        self.store.clear()?;
        Ok(())
    }
}

impl Drop for SyncBridge {
    fn drop(&mut self) {
        self.registry.release_all();
    }
}

/// Subscription worker: apply each snapshot until cancelled, superseded,
/// failed, or closed by the store.
fn drive<M, V>(
    key: SyncedCollectionKey,
    generation: u64,
    stream: ObserveQueryStream<M>,
    table: Arc<Table<V>>,
) where
    M: Model,
    V: From<M> + Clone,
{
    for result in stream {
        match result {
            Ok(snapshot) => {
                let is_synced = snapshot.is_synced;
                let data = snapshot.map(V::from).items;
                let count = data.len();
                match table.apply_snapshot(&key, generation, data, is_synced) {
                    Ok(true) => debug!(key = %key, count, is_synced, "snapshot applied"),
                    Ok(false) => {
                        debug!(key = %key, generation, "subscription superseded");
                        return;
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "snapshot rejected");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "subscription failed");
                let _ = table.fail(&key, generation, e.to_string());
                return;
            }
        }
    }
    debug!(key = %key, generation, "observe loop exited");
}

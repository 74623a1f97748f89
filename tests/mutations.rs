//! Mutation coordinator tests through the bridge.

mod common;

use common::*;
use observe_bridge::{
    BridgeConfig, BridgeError, EpisodeDraft, MemoryStore, ModelKind, Mutation, Phase, StoreError,
    SyncBridge, SyncedCollectionKey, ViewState,
};
use std::sync::Arc;
use std::time::Duration;

fn titles(bridge: &SyncBridge, podcast_id: &str) -> Vec<String> {
    bridge
        .episodes(podcast_id)
        .into_data()
        .unwrap_or_default()
        .into_iter()
        .map(|e| e.title)
        .collect()
}

fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert(&episode("001-001", "001", "Air Caraibes")).unwrap();
    store.insert(&episode("001-002", "001", "Quoi de neuf ?")).unwrap();
    store
}

#[test]
fn test_added_episode_arrives_through_snapshot() {
    init_tracing();
    let store = seeded();
    let bridge = SyncBridge::new(Arc::new(store.clone())).unwrap();
    let changes = bridge.watch();
    let key = SyncedCollectionKey::podcast("001");

    bridge.request_load(key.clone()).unwrap();
    wait_for(&changes, &key, Phase::DataAvailable);
    assert_eq!(titles(&bridge, "001").len(), 2);

    let ticket = bridge
        .add_episode(
            "001",
            EpisodeDraft::new("[NEW] lorem ipsum")
                .with_date("19 OCT. 2026")
                .with_duration("10:30:00")
                .with_description("generated"),
        )
        .unwrap();
    let new_id = ticket.id().to_string();
    ticket.wait().unwrap();

    wait_for(&changes, &key, Phase::DataAvailable);
    assert!(titles(&bridge, "001").contains(&"[NEW] lorem ipsum".to_string()));
    assert!(store.contains(ModelKind::Episode, &new_id));
}

#[test]
fn test_delete_with_no_subscription_leaves_state() {
    init_tracing();
    let store = MemoryStore::new();
    store
        .insert(&episode("a1b2c3d4-long", "002", "Deletable"))
        .unwrap();
    let bridge = SyncBridge::new(Arc::new(store.clone())).unwrap();
    let changes = bridge.watch();
    let key = SyncedCollectionKey::podcast("002");

    bridge.request_load(key.clone()).unwrap();
    wait_for(&changes, &key, Phase::DataAvailable);
    bridge.close(&key);

    bridge.delete_episode("a1b2c3d4-long").unwrap().wait().unwrap();

    assert!(!store.contains(ModelKind::Episode, "a1b2c3d4-long"));
    assert_eq!(titles(&bridge, "002"), vec!["Deletable"]);

    // A fresh subscription picks up the effect.
    bridge.request_load(key.clone()).unwrap();
    wait_for(&changes, &key, Phase::DataAvailable);
    assert!(titles(&bridge, "002").is_empty());
}

#[test]
fn test_mutation_on_unloaded_key_keeps_no_data() {
    init_tracing();
    let store = MemoryStore::new();
    let bridge = SyncBridge::new(Arc::new(store.clone())).unwrap();

    bridge
        .add_episode("003", EpisodeDraft::new("Unseen"))
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(bridge.episodes("003"), ViewState::NoData);
    assert_eq!(store.len(ModelKind::Episode), 1);
}

#[test]
fn test_delete_guard_skips_seed_records() {
    init_tracing();
    let store = seeded();
    let bridge = SyncBridge::new(Arc::new(store.clone())).unwrap();
    let writes = store.write_count();

    let result = bridge.delete_episode("001-001");
    assert!(matches!(result, Err(BridgeError::ProtectedRecord(_))));

    let result = bridge.request_mutation(Mutation::delete_id(ModelKind::Podcast, "001"));
    assert!(matches!(result, Err(BridgeError::ProtectedRecord(_))));

    assert_eq!(store.write_count(), writes);
    assert!(store.contains(ModelKind::Episode, "001-001"));
}

#[test]
fn test_guard_length_is_configurable() {
    init_tracing();
    let store = seeded();
    let config = BridgeConfig {
        min_deletable_id_len: 4,
        ..Default::default()
    };
    let bridge = SyncBridge::with_config(Arc::new(store.clone()), config).unwrap();

    bridge.delete_episode("001-001").unwrap().wait().unwrap();
    assert!(!store.contains(ModelKind::Episode, "001-001"));
}

#[test]
fn test_failed_write_reported_and_view_unchanged() {
    init_tracing();
    let store = seeded();
    let bridge = SyncBridge::new(Arc::new(store.clone())).unwrap();
    let changes = bridge.watch();
    let key = SyncedCollectionKey::podcast("001");

    bridge.request_load(key.clone()).unwrap();
    wait_for(&changes, &key, Phase::DataAvailable);
    let before = bridge.episodes("001");

    store.fail_writes(Some(StoreError::Rejected("conditional check failed".into())));
    let err = bridge
        .add_episode("001", EpisodeDraft::new("Rejected"))
        .unwrap()
        .wait()
        .unwrap_err();
    assert!(matches!(err, BridgeError::Mutation { op: "save", .. }));

    assert!(phases_for(&changes, &key, Duration::from_millis(50)).is_empty());
    assert_eq!(bridge.episodes("001"), before);
}

#[test]
fn test_delete_of_missing_record_reported() {
    init_tracing();
    let bridge = SyncBridge::new(Arc::new(MemoryStore::new())).unwrap();

    let err = bridge
        .delete_episode("not-there-anymore")
        .unwrap()
        .wait()
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Mutation {
            source: StoreError::NotFound { .. },
            ..
        }
    ));
}

#[test]
fn test_concurrent_mutations_with_open_subscription() {
    init_tracing();
    let store = MemoryStore::new();
    let bridge = Arc::new(SyncBridge::new(Arc::new(store.clone())).unwrap());
    let changes = bridge.watch();
    let key = SyncedCollectionKey::podcast("005");

    bridge.request_load(key.clone()).unwrap();
    wait_for(&changes, &key, Phase::DataAvailable);

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let bridge = Arc::clone(&bridge);
            std::thread::spawn(move || {
                let tickets: Vec<_> = (0..5)
                    .map(|n| {
                        bridge
                            .add_episode("005", EpisodeDraft::new(format!("t{}-{}", t, n)))
                            .unwrap()
                    })
                    .collect();
                for ticket in tickets {
                    ticket.wait().unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let deadline = std::time::Instant::now() + TIMEOUT;
    while titles(&bridge, "005").len() < 20 {
        assert!(std::time::Instant::now() < deadline, "episodes never arrived");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_save_podcast_round_trips_through_view() {
    init_tracing();
    let store = MemoryStore::new();
    let bridge = SyncBridge::new(Arc::new(store.clone())).unwrap();
    let changes = bridge.watch();
    let key = SyncedCollectionKey::category(observe_bridge::Category::Comedy);

    bridge.request_load(key.clone()).unwrap();
    wait_for(&changes, &key, Phase::DataAvailable);

    let p = observe_bridge::Podcast::from(podcast(
        "006",
        "Le billet",
        observe_bridge::Category::Comedy,
    ));
    bridge.save_podcast(&p).unwrap().wait().unwrap();

    wait_for(&changes, &key, Phase::DataAvailable);
    assert_eq!(
        bridge.podcasts(observe_bridge::Category::Comedy).into_data(),
        Some(vec![p])
    );
}

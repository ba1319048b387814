//! End-to-end pairing tests
//!
//! Every scenario runs against both backends. Several `PairingEngine`s share
//! one store to stand in for several server instances.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use futures::future::join_all;
use pairline_core::prelude::*;
use pairline_core::{DatabaseConfig, ExpiryReaper, ManualClock, ReaperConfig};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const INSTANCES: usize = 3;

/// Helper to create an on-disk SQLite store with a real connection pool
async fn create_sqlite_store() -> (Arc<dyn EntryStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("queue.db");
    let store = SqliteEntryStore::connect(&DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", db_path.display()),
        max_connections: 8,
        ..Default::default()
    })
    .await
    .expect("Failed to create test database");
    (Arc::new(store), temp_dir)
}

fn instances(store: &Arc<dyn EntryStore>, clock: Arc<dyn Clock>) -> Vec<Arc<PairingEngine>> {
    (0..INSTANCES)
        .map(|_| {
            Arc::new(PairingEngine::new(
                store.clone(),
                clock.clone(),
                QueueConfig::default(),
            ))
        })
        .collect()
}

/// Read every user's settled state and check pair symmetry
async fn assert_pairs_consistent(store: &Arc<dyn EntryStore>, users: &[String]) -> HashMap<String, (String, String)> {
    let mut pairs = HashMap::new();
    for user in users {
        let Some(entry) = store.get(user).await.unwrap() else {
            continue;
        };
        if entry.status != QueueStatus::Matched {
            continue;
        }
        let partner_id = entry.matched_with.clone().unwrap();
        let call_id = entry.call_id.clone().unwrap();
        assert_ne!(&partner_id, user, "{} matched with itself", user);

        let partner = store
            .get(&partner_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("{} matched to missing {}", user, partner_id));
        assert!(
            partner.is_matched_to(user, &call_id),
            "{} -> {} ({}) not mirrored: {:?}",
            user,
            partner_id,
            call_id,
            partner
        );
        pairs.insert(user.clone(), (partner_id, call_id));
    }
    pairs
}

async fn concurrent_joins_pair_everyone(store: Arc<dyn EntryStore>) {
    let engines = instances(&store, Arc::new(SystemClock));
    let users: Vec<String> = (0..24).map(|i| format!("user-{:02}", i)).collect();

    let joins = users.iter().enumerate().map(|(i, user)| {
        let engine = engines[i % INSTANCES].clone();
        let user = user.clone();
        tokio::spawn(async move { engine.join(&user).await })
    });
    for result in join_all(joins).await {
        result.unwrap().unwrap();
    }

    // every request has finished, so nothing may still hold a claim
    assert_eq!(store.stats().await.unwrap().claiming, 0);

    // simultaneous waiters are healed by polling
    for _ in 0..2 {
        let polls = users.iter().enumerate().map(|(i, user)| {
            let engine = engines[(i + 1) % INSTANCES].clone();
            let user = user.clone();
            tokio::spawn(async move { engine.status(&user).await })
        });
        for result in join_all(polls).await {
            result.unwrap().unwrap();
        }
    }
    for user in &users {
        engines[0].status(user).await.unwrap();
    }

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.claiming, 0);
    assert_eq!(stats.waiting, 0, "even population should fully pair: {:?}", stats);

    let pairs = assert_pairs_consistent(&store, &users).await;
    assert_eq!(pairs.len(), users.len());
}

async fn same_user_joining_everywhere(store: Arc<dyn EntryStore>) {
    let engines = instances(&store, Arc::new(SystemClock));
    engines[0].join("bob").await.unwrap();

    let joins = (0..8).map(|i| {
        let engine = engines[i % INSTANCES].clone();
        tokio::spawn(async move { engine.join("alice").await })
    });
    for result in join_all(joins).await {
        let response = result.unwrap().unwrap();
        if let Some(partner) = response.matched_with() {
            assert_eq!(partner, "bob");
        }
    }

    let alice = engines[1].status("alice").await.unwrap();
    let bob = engines[2].status("bob").await.unwrap();
    assert_eq!(alice.matched_with(), Some("bob"));
    assert_eq!(bob.matched_with(), Some("alice"));
    assert_eq!(alice.call_id(), bob.call_id());
    assert_eq!(store.stats().await.unwrap().total(), 2);
}

async fn churn_leaves_no_orphans(store: Arc<dyn EntryStore>) {
    let engines = instances(&store, Arc::new(SystemClock));
    let users: Vec<String> = (0..16).map(|i| format!("churn-{:02}", i)).collect();

    let work = users.iter().enumerate().map(|(i, user)| {
        let engine = engines[i % INSTANCES].clone();
        let user = user.clone();
        tokio::spawn(async move {
            for round in 0..4 {
                engine.join(&user).await?;
                engine.status(&user).await?;
                if (i + round) % 3 == 0 {
                    engine.leave(&user).await?;
                }
            }
            Ok::<_, MatchmakingError>(())
        })
    });
    for result in join_all(work).await {
        result.unwrap().unwrap();
    }

    assert_eq!(store.stats().await.unwrap().claiming, 0);

    // a Matched row may point at a partner that left; polling must clear it
    for user in &users {
        engines[0].status(user).await.unwrap();
    }
    assert_pairs_consistent(&store, &users).await;
}

async fn scenario_leave_then_requeue(store: Arc<dyn EntryStore>) {
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(t0));
    let engines = instances(&store, clock.clone());

    assert!(!engines[0].join("alice").await.unwrap().is_matched());
    clock.advance(Duration::seconds(2));
    let bob = engines[1].join("bob").await.unwrap();
    assert_eq!(bob.matched_with(), Some("alice"));

    let alice = engines[2].status("alice").await.unwrap();
    assert_eq!(alice.call_id(), bob.call_id());

    assert_eq!(engines[0].leave("alice").await.unwrap(), LeaveResponse::LeftQueue);
    let bob = engines[1].status("bob").await.unwrap();
    assert_eq!(bob.status(), Some(QueueStatus::Waiting));

    clock.advance(Duration::seconds(1));
    let carol = engines[2].join("carol").await.unwrap();
    assert_eq!(carol.matched_with(), Some("bob"));
}

async fn scenario_wait_window_bounds_lifetime(store: Arc<dyn EntryStore>) {
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(t0));
    let engines = instances(&store, clock.clone());
    let reaper = ExpiryReaper::new(store.clone(), clock.clone(), &QueueConfig::default(), &ReaperConfig::default());

    engines[0].join("alice").await.unwrap();
    engines[0].join("bob").await.unwrap();
    engines[0].join("carol").await.unwrap();
    store.claim_entry("carol", "dave", t0).await.unwrap();

    clock.advance(Duration::minutes(2));
    let report = reaper.run_once().await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(report.released_claims, 1);

    clock.advance(Duration::minutes(3));
    let report = reaper.run_once().await.unwrap();
    assert_eq!(report.expired, 3);
    assert_eq!(store.stats().await.unwrap().total(), 0);
    assert_eq!(engines[2].status("carol").await.unwrap(), StatusResponse::NotInQueue);

    // after expiry a fresh join starts over
    let alice = engines[1].join("alice").await.unwrap();
    assert!(!alice.is_matched());
    assert_eq!(alice.entry().created_at, clock.now());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_pair_everyone_memory() {
    concurrent_joins_pair_everyone(Arc::new(MemoryEntryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_pair_everyone_sqlite() {
    let (store, _temp_dir) = create_sqlite_store().await;
    concurrent_joins_pair_everyone(store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_joining_everywhere_memory() {
    same_user_joining_everywhere(Arc::new(MemoryEntryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_joining_everywhere_sqlite() {
    let (store, _temp_dir) = create_sqlite_store().await;
    same_user_joining_everywhere(store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_churn_leaves_no_orphans_memory() {
    churn_leaves_no_orphans(Arc::new(MemoryEntryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_churn_leaves_no_orphans_sqlite() {
    let (store, _temp_dir) = create_sqlite_store().await;
    churn_leaves_no_orphans(store).await;
}

#[tokio::test]
async fn test_leave_then_requeue_memory() {
    scenario_leave_then_requeue(Arc::new(MemoryEntryStore::new())).await;
}

#[tokio::test]
async fn test_leave_then_requeue_sqlite() {
    let (store, _temp_dir) = create_sqlite_store().await;
    scenario_leave_then_requeue(store).await;
}

#[tokio::test]
async fn test_wait_window_bounds_lifetime_memory() {
    scenario_wait_window_bounds_lifetime(Arc::new(MemoryEntryStore::new())).await;
}

#[tokio::test]
async fn test_wait_window_bounds_lifetime_sqlite() {
    let (store, _temp_dir) = create_sqlite_store().await;
    scenario_wait_window_bounds_lifetime(store).await;
}

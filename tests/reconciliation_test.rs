//! End-to-end write reconciliation against the in-memory store

use std::sync::Arc;
use std::time::Duration;

use mentor_sdk::entity::{CREATED_AT, TTL_SECONDS, WALLET};
use mentor_sdk::store::WriteScript;
use mentor_sdk::{
    resolve, AttributeFilter, IdempotencyKey, ListOptions, LogicalKey, ManualClock, MemoryStore,
    PollConfig, ReconcileStatus, Reconciler, RecordKind, RecordReader, SdkConfig, SdkError,
    WriteRequest,
};

const T0: i64 = 1_700_000_000_000;
const WALLET_A: &str = "0x00000000000000000000000000000000000000aa";

fn sdk_config(max_attempts: u32) -> SdkConfig {
    SdkConfig {
        poll: PollConfig {
            interval_ms: 1000,
            max_duration_ms: 60_000,
            max_attempts,
        },
        ..Default::default()
    }
}

fn profile_update(display_name: &str) -> WriteRequest {
    WriteRequest::new(
        LogicalKey::profile(WALLET_A).unwrap(),
        IdempotencyKey::new([WALLET_A, "profile"]),
    )
    .with_attribute("displayName", display_name)
}

#[tokio::test(start_paused = true)]
async fn test_profile_update_supersedes_earlier_version() {
    let store = Arc::new(MemoryStore::with_index_lag(1));
    let clock = Arc::new(ManualClock::new(T0));
    let reconciler = Reconciler::new(store.clone(), sdk_config(10), clock.clone()).unwrap();

    // t=0: first version
    let first = reconciler.track_write(profile_update("Ada")).unwrap();
    assert_eq!(first.wait().await.unwrap().status, ReconcileStatus::Indexed);

    // t=5000ms: update with a later createdAt
    clock.set(T0 + 5_000);
    let second = reconciler.track_write(profile_update("Ada Lovelace")).unwrap();
    let indexed = second.wait().await.unwrap();
    assert_eq!(indexed.written_at_ms, Some(T0 + 5_000));

    let profiles: Vec<_> = store
        .entities()
        .await
        .into_iter()
        .filter(|e| e.attribute("type") == Some("profile"))
        .collect();
    assert_eq!(profiles.len(), 2);
    assert_eq!(profiles[0].attribute(TTL_SECONDS), Some("31536000"));

    let current = resolve(RecordKind::Profile, &profiles).unwrap();
    assert_eq!(current.attribute("displayName"), Some("Ada Lovelace"));
    assert_eq!(current.attribute(CREATED_AT), Some("2023-11-14T22:13:25.000Z"));

    // t=10000ms: listing shows only the update
    clock.set(T0 + 10_000);
    let reader = RecordReader::new(store.clone(), clock.clone());
    let listed = reader
        .list(
            RecordKind::Profile,
            &[AttributeFilter::eq(WALLET, WALLET_A)],
            ListOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].key, current.key);
    assert_eq!(listed[0].attribute("displayName"), Some("Ada Lovelace"));
}

#[tokio::test(start_paused = true)]
async fn test_receipt_timeout_with_only_tx_reference() {
    let store = Arc::new(MemoryStore::with_index_lag(2));
    store
        .script([WriteScript::ReceiptTimeout {
            with_entity_key: false,
            with_tx_reference: true,
        }])
        .await;
    let reconciler =
        Reconciler::new(store.clone(), sdk_config(10), Arc::new(ManualClock::new(T0))).unwrap();

    let handle = reconciler.track_write(profile_update("Ada")).unwrap();
    let mut updates = handle.subscribe();
    let mut statuses = vec![updates.borrow_and_update().status];
    while updates.changed().await.is_ok() {
        let record = updates.borrow_and_update().clone();
        if statuses.last() != Some(&record.status) {
            statuses.push(record.status);
        }
        if record.status == ReconcileStatus::Submitted {
            assert!(record.entity_key.is_none());
            assert!(record.tx_reference.is_some());
        }
        if record.status.is_terminal() {
            break;
        }
    }
    assert_eq!(
        statuses,
        vec![
            ReconcileStatus::Pending,
            ReconcileStatus::Submitted,
            ReconcileStatus::Indexed
        ]
    );

    let record = handle.snapshot();
    let written = store
        .entities()
        .await
        .into_iter()
        .find(|e| e.attribute("type") == Some("profile"))
        .unwrap();
    assert_eq!(record.entity_key.as_deref(), Some(written.key.as_str()));
    assert_eq!(record.tx_reference, written.tx_reference);
    assert_eq!(record.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_resolves_within_lag_plus_one_and_respects_ceiling() {
    let max_attempts = 6;
    for lag in 0..10u64 {
        let store = Arc::new(MemoryStore::with_index_lag(lag));
        let reconciler = Reconciler::new(
            store.clone(),
            sdk_config(max_attempts),
            Arc::new(ManualClock::new(T0)),
        )
        .unwrap();

        let handle = reconciler.track_write(profile_update("Ada")).unwrap();
        let outcome = handle.wait().await;

        if lag < max_attempts as u64 {
            let record = outcome.unwrap();
            assert_eq!(record.status, ReconcileStatus::Indexed);
            assert!(record.attempts as u64 <= lag + 1);
        } else {
            assert!(matches!(outcome, Err(SdkError::PollTimeout { .. })));
        }
        assert!(store.query_count() <= max_attempts as u64);
    }
}

#[tokio::test(start_paused = true)]
async fn test_release_issues_no_further_queries() {
    let store = Arc::new(MemoryStore::with_index_lag(1_000));
    let reconciler =
        Reconciler::new(store.clone(), sdk_config(1_000), Arc::new(ManualClock::new(T0))).unwrap();

    let handle = reconciler.track_write(profile_update("Ada")).unwrap();
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(store.query_count(), 3);

    reconciler.release(&handle.idempotency_key());
    let after_release = store.query_count();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(store.query_count(), after_release);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_write_offers_retry() {
    let store = Arc::new(MemoryStore::immediate());
    store
        .script([WriteScript::Reject("nonce too low".into())])
        .await;
    let reconciler =
        Reconciler::new(store.clone(), sdk_config(5), Arc::new(ManualClock::new(T0))).unwrap();

    let handle = reconciler.track_write(profile_update("Ada")).unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(err.user_message().contains("try again"));
    assert_eq!(handle.status(), ReconcileStatus::Error);
    assert_eq!(store.query_count(), 0);

    let retried = reconciler.retry(&handle.idempotency_key()).unwrap();
    assert_eq!(retried.wait().await.unwrap().status, ReconcileStatus::Indexed);
}

#[tokio::test(start_paused = true)]
async fn test_trackers_poll_independently() {
    const WALLET_B: &str = "0x00000000000000000000000000000000000000bb";
    let store = Arc::new(MemoryStore::with_index_lag(2));
    let reconciler =
        Reconciler::new(store.clone(), sdk_config(10), Arc::new(ManualClock::new(T0))).unwrap();

    // A polls at 1s, 2s, ...; B starts half an interval later
    let a = reconciler.track_write(profile_update("Ada")).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let b = reconciler
        .track_write(
            WriteRequest::new(
                LogicalKey::profile(WALLET_B).unwrap(),
                IdempotencyKey::new([WALLET_B, "profile"]),
            )
            .with_attribute("displayName", "Grace"),
        )
        .unwrap();

    // Reads interleave: A at 1s, B at 1.5s, A at 2s sees its write
    tokio::time::sleep(Duration::from_millis(1_700)).await;
    assert_eq!(a.status(), ReconcileStatus::Indexed);
    assert_eq!(b.status(), ReconcileStatus::Submitted);
    assert_eq!(b.snapshot().attempts, 1);

    let b_record = b.wait().await.unwrap();
    assert_eq!(b_record.status, ReconcileStatus::Indexed);
    assert_eq!(a.snapshot().attempts, 2);
    assert_eq!(b_record.attempts, 2);
    assert_eq!(store.query_count(), 4);
    assert_ne!(a.snapshot().entity_key, b_record.entity_key);
}

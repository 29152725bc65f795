//! End-to-end runs of the loops against the in-memory store and transport.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use courier_core::app::{App, AppBuilder, Cycle, Schedule};
use courier_core::config::CourierConfig;
use courier_core::domain::{
    CourierError, FetchResult, KeyScheme, StoreError, TokenKey, TokenRecord, TokenState,
};
use courier_core::impls::{InMemoryTokenStore, InMemoryTransport};
use courier_core::ports::{Clock, FixedClock, TokenStore, TransportConfig};

const SOURCE: &str = "eth";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

struct Harness {
    store: InMemoryTokenStore,
    transport: InMemoryTransport,
    clock: Arc<FixedClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_transport(TransportConfig::new("mem://tokens.fifo", "local"))
    }

    fn with_transport(config: TransportConfig) -> Self {
        Self {
            store: InMemoryTokenStore::new(),
            transport: InMemoryTransport::new(config),
            clock: Arc::new(FixedClock::new(t0())),
        }
    }

    fn config(&self) -> CourierConfig {
        CourierConfig::new(SOURCE, self.transport.config().clone())
    }

    fn app(&self) -> App {
        self.app_with(self.config())
    }

    fn app_with(&self, config: CourierConfig) -> App {
        AppBuilder::new()
            .config(config)
            .store(Arc::new(self.store.clone()))
            .transport(Arc::new(self.transport.clone()))
            .clock(self.clock.clone())
            .build()
            .unwrap()
    }

    async fn seed(&self, contract: &str, token: &str, token_type: &str) -> TokenKey {
        let key = TokenKey::new(contract, token);
        self.store
            .insert(TokenRecord::new(key.clone(), SOURCE, token_type))
            .await
            .unwrap();
        key
    }

    async fn state(&self, key: &TokenKey) -> TokenState {
        TokenState::of(&self.store.get(key).await.unwrap())
    }
}

#[tokio::test]
async fn new_token_is_published_once_and_committed() {
    let h = Harness::new();
    let key = h.seed("0xABC", "1", "ERC1155").await;

    let report = h.app().ingestion.run_once().await.unwrap();

    assert_eq!((report.selected, report.published, report.committed), (1, 1, 1));
    let messages = h.transport.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "0xABC1");
    assert_eq!(messages[0].deduplication_id, "0xABC1");
    assert_eq!(messages[0].group_id, "0xABC");
    assert_eq!(
        messages[0].body,
        r#"{"contractAddress":"0xABC","tokenId":"1","contractType":"ERC1155"}"#
    );

    let record = h.store.get(&key).await.unwrap();
    assert_eq!(record.sent_at, Some(t0()));
    assert_eq!(record.processing_sent_at, None);
    assert_eq!(record.lease_owner, None);
}

#[tokio::test]
async fn committed_token_is_not_ingested_again() {
    let h = Harness::new();
    h.seed("0xABC", "1", "ERC721").await;
    let app = h.app();

    app.ingestion.run_once().await.unwrap();
    h.clock.advance(Duration::seconds(3));
    let second = app.ingestion.run_once().await.unwrap();

    assert!(second.is_idle());
    assert_eq!(h.transport.messages().await.len(), 1);
}

#[tokio::test]
async fn refresh_republishes_and_keeps_metadata() {
    let h = Harness::new();
    let key = TokenKey::new("0xABC", "7");
    let mut record = TokenRecord::new(key.clone(), SOURCE, "ERC721");
    record.sent_at = Some(t0());
    record.sent_for_media_at = Some(t0() + Duration::hours(1));
    h.store.insert(record).await.unwrap();
    let app = h.app();
    h.store
        .upsert_fetch_result(
            &key,
            FetchResult::Fetched {
                metadata: json!({"x": 1}),
                external_domain_view_url: Some("https://view.example/0xABC/7".into()),
                alternative_media_files: None,
            },
        )
        .await
        .unwrap();
    h.store.request_refresh(&key).await.unwrap();
    let before = h.store.get(&key).await.unwrap();
    assert!(before.need_to_refresh);
    assert_eq!(before.sent_for_media_at, Some(t0() + Duration::hours(1)));

    let report = app.refresh.run_once().await.unwrap();

    assert_eq!(report.committed, 1);
    let record = h.store.get(&key).await.unwrap();
    assert!(!record.need_to_refresh);
    assert_eq!(record.sent_at, Some(t0()));
    assert!(record.sent_for_media_at.is_none());
    assert_eq!(record.metadata, Some(json!({"x": 1})));
    assert_eq!(
        record.external_domain_view_url.as_deref(),
        Some("https://view.example/0xABC/7")
    );
    assert_eq!(TokenState::of(&record), TokenState::Fetched);
    assert_eq!(h.transport.messages().await[0].id, "0xABC7");
}

#[tokio::test]
async fn partial_batch_failure_commits_only_delivered_messages() {
    let h = Harness::new();
    let keys = [
        h.seed("0xABC", "1", "ERC721").await,
        h.seed("0xABC", "2", "ERC721").await,
        h.seed("0xABC", "3", "ERC721").await,
    ];
    h.transport.fail_message("0xABC2").await;
    let app = h.app();

    let report = app.ingestion.run_once().await.unwrap();

    assert_eq!(report.published, 2);
    assert_eq!(report.failed, vec![keys[1].clone()]);
    assert_eq!(h.state(&keys[0]).await, TokenState::AwaitingFetch);
    assert_eq!(h.state(&keys[1]).await, TokenState::Leased);
    assert_eq!(h.state(&keys[2]).await, TokenState::AwaitingFetch);

    // Still leased: the next firing does not pick it up.
    h.transport.heal_message("0xABC2").await;
    assert!(app.ingestion.run_once().await.unwrap().is_idle());
}

#[tokio::test]
async fn stuck_lease_is_reclaimed_and_republished() {
    let h = Harness::new();
    let key = h.seed("0xABC", "2", "ERC721").await;
    h.transport.fail_message("0xABC2").await;
    let app = h.app();
    app.ingestion.run_once().await.unwrap();
    h.transport.heal_message("0xABC2").await;

    // Younger than the lease timeout: left alone.
    h.clock.advance(Duration::minutes(4));
    assert!(app.reaper.run_once().await.unwrap().is_idle());
    assert_eq!(h.state(&key).await, TokenState::Leased);

    h.clock.advance(Duration::minutes(2));
    let reaped = app.reaper.run_once().await.unwrap();
    assert_eq!(reaped.committed, 1);
    assert_eq!(h.state(&key).await, TokenState::Unclaimed);

    let report = app.ingestion.run_once().await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(h.state(&key).await, TokenState::AwaitingFetch);
    assert_eq!(h.transport.messages().await.len(), 1);
}

#[tokio::test]
async fn commit_failure_leaves_lease_until_reaper_runs() {
    let h = Harness::new();
    let key = h.seed("0xABC", "1", "ERC721").await;
    h.store.fail_next_commit().await;
    let app = h.app();

    let err = app.ingestion.run_once().await.unwrap_err();
    assert!(matches!(err, CourierError::Store(StoreError::Unavailable(_))));
    assert_eq!(h.state(&key).await, TokenState::Leased);
    assert_eq!(h.transport.messages().await.len(), 1);

    h.clock.advance(Duration::minutes(6));
    app.reaper.run_once().await.unwrap();
    app.ingestion.run_once().await.unwrap();

    // Republished inside the dedup window: acknowledged, not duplicated.
    assert_eq!(h.state(&key).await, TokenState::AwaitingFetch);
    assert_eq!(h.transport.messages().await.len(), 1);
    assert_eq!(h.transport.batch_count().await, 2);
}

#[tokio::test]
async fn resync_restamps_until_fetch_succeeds() {
    let h = Harness::with_transport(
        TransportConfig::new("mem://tokens.fifo", "local").with_dedup_window(StdDuration::ZERO),
    );
    let key = h.seed("0xABC", "9", "ERC1155").await;
    let app = h.app();
    app.ingestion.run_once().await.unwrap();
    h.store
        .upsert_fetch_result(&key, FetchResult::failed("gateway timeout"))
        .await
        .unwrap();
    assert_eq!(h.state(&key).await, TokenState::FetchFailed);

    for day in 1..=3 {
        h.clock.advance(Duration::days(1));
        let report = app.resync.run_once().await.unwrap();
        assert_eq!(report.committed, 1, "day {day}");
        assert_eq!(h.store.get(&key).await.unwrap().sent_at, Some(h.clock.now()));
    }

    h.store
        .upsert_fetch_result(&key, FetchResult::fetched(json!({"name": "nine"})))
        .await
        .unwrap();
    assert!(app.resync.run_once().await.unwrap().is_idle());
    assert_eq!(h.transport.messages().await.len(), 4);
}

#[tokio::test]
async fn two_instances_never_publish_the_same_token() {
    let h = Harness::new();
    for token in 1..=50 {
        h.seed("0xABC", &token.to_string(), "ERC721").await;
    }
    let mut config = h.config();
    config.ingestion_limit = 10;
    let a = h.app_with(config.clone());
    let b = h.app_with(config);
    assert_ne!(a.instance_id, b.instance_id);

    for _ in 0..5 {
        let (ra, rb) = tokio::join!(a.ingestion.run_once(), b.ingestion.run_once());
        ra.unwrap();
        rb.unwrap();
    }

    let messages = h.transport.messages().await;
    let mut ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 50);
    assert_eq!(h.transport.batch_count().await, 5);
    assert_eq!(h.store.counts(SOURCE).await.unwrap().awaiting_fetch, 50);
}

#[tokio::test]
async fn selection_failure_aborts_without_side_effects() {
    let h = Harness::new();
    let key = h.seed("0xABC", "1", "ERC721").await;
    h.store.set_unavailable(true).await;
    let app = h.app();

    let cycles: [Arc<dyn Cycle>; 4] = [
        app.ingestion.clone(),
        app.refresh.clone(),
        app.resync.clone(),
        app.reaper.clone(),
    ];
    for cycle in cycles {
        let err = cycle.run_once().await.unwrap_err();
        assert!(matches!(err, CourierError::Store(_)), "{}", cycle.name());
    }

    h.store.set_unavailable(false).await;
    assert_eq!(h.state(&key).await, TokenState::Unclaimed);
    assert_eq!(h.transport.batch_count().await, 0);
}

#[tokio::test]
async fn delimited_keys_keep_colliding_pairs_apart() {
    let h = Harness::new();
    h.seed("0xAB", "C1", "ERC721").await;
    h.seed("0xABC", "1", "ERC721").await;
    let mut config = h.config();
    config.key_scheme = KeyScheme::Delimited;

    h.app_with(config).ingestion.run_once().await.unwrap();

    let ids: Vec<String> = h.transport.messages().await.into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["0xAB:C1", "0xABC:1"]);
}

#[tokio::test]
async fn scheduler_drives_ingestion_until_shutdown() {
    let h = Harness::new();
    for token in 1..=3 {
        h.seed("0xBEEF", &token.to_string(), "ERC721").await;
    }
    let mut config = h.config();
    config.ingestion = Schedule::every(StdDuration::from_millis(10));
    let app = h.app_with(config);

    let scheduler = app.start();
    tokio::time::sleep(StdDuration::from_millis(150)).await;
    scheduler.shutdown_and_join().await;

    let counts = h.store.counts(SOURCE).await.unwrap();
    assert_eq!(counts.awaiting_fetch, 3);
    assert_eq!(counts.leased, 0);
    let ids: Vec<String> = h
        .transport
        .messages_in_group("0xBEEF")
        .await
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["0xBEEF1", "0xBEEF2", "0xBEEF3"]);
}

#[tokio::test]
async fn huge_lease_timeout_keeps_reaper_idle() {
    let h = Harness::new();
    let key = h.seed("0xABC", "1", "ERC721").await;
    h.transport.fail_message("0xABC1").await;
    let config = CourierConfig::from_lookup(|name| match name {
        "COURIER_SOURCE" => Some(SOURCE.to_string()),
        "AWS_QUEUE_URL" => Some("mem://tokens.fifo".to_string()),
        "COURIER_LEASE_TIMEOUT_SECS" => Some("10000000000000".to_string()),
        _ => None,
    })
    .unwrap();
    let app = h.app_with(config);
    app.ingestion.run_once().await.unwrap();

    let reaper = app.reaper.clone();
    let report = tokio::spawn(async move { reaper.run_once().await })
        .await
        .expect("reaper cycle must not panic")
        .unwrap();

    assert!(report.is_idle());
    assert_eq!(h.state(&key).await, TokenState::Leased);
}

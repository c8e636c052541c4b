/// Integration tests for the log store against the in-memory backend
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use log_aggregator::error::StoreError;
use log_aggregator::models::{LogRecord, LogView};
use log_aggregator::storage::log_store::{index_key, record_key};
use log_aggregator::storage::{InMemoryBackend, LogStore};
use std::sync::Arc;
use std::time::Duration;

const RETENTION: Duration = Duration::from_secs(3600);

fn setup() -> (LogStore, Arc<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::new());
    let store = LogStore::new(backend.clone(), RETENTION);
    (store, backend)
}

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

#[tokio::test]
async fn test_put_then_query_returns_record() {
    let (store, _backend) = setup();

    let id = store
        .put(&LogRecord::new("auth", ts("2024-01-01T00:00:00Z"), "login ok"))
        .await
        .unwrap();
    assert!(!id.is_empty());

    let logs = store
        .query(
            "auth",
            Some(ts("2023-12-31T00:00:00Z")),
            Some(ts("2024-01-02T00:00:00Z")),
        )
        .await
        .unwrap();

    assert_eq!(
        logs,
        vec![LogView {
            event_time: ts("2024-01-01T00:00:00Z"),
            message: "login ok".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_out_of_order_ingest_is_returned_sorted() {
    let (store, _backend) = setup();
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    for offset in [5i64, 1, 4, 0, 3, 2] {
        let event_time = base + ChronoDuration::seconds(offset);
        store
            .put(&LogRecord::new("api", event_time, format!("event {}", offset)))
            .await
            .unwrap();
    }

    let logs = store.query("api", None, None).await.unwrap();
    let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(
        messages,
        vec!["event 0", "event 1", "event 2", "event 3", "event 4", "event 5"]
    );
    assert!(logs.windows(2).all(|w| w[0].event_time <= w[1].event_time));
}

#[tokio::test]
async fn test_unknown_service_returns_empty() {
    let (store, _backend) = setup();
    store
        .put(&LogRecord::new("auth", ts("2024-01-01T00:00:00Z"), "login ok"))
        .await
        .unwrap();

    let logs = store.query("unknown-service", None, None).await.unwrap();
    assert!(logs.is_empty());
}

#[tokio::test]
async fn test_inverted_range_returns_empty() {
    let (store, _backend) = setup();
    store
        .put(&LogRecord::new("auth", ts("2024-01-01T00:00:00Z"), "login ok"))
        .await
        .unwrap();

    let logs = store
        .query(
            "auth",
            Some(ts("2024-01-02T00:00:00Z")),
            Some(ts("2023-12-31T00:00:00Z")),
        )
        .await
        .unwrap();
    assert!(logs.is_empty());
}

#[tokio::test]
async fn test_bounds_are_inclusive_and_open_ended() {
    let (store, _backend) = setup();
    for (time, msg) in [
        ("2024-01-01T00:00:00Z", "a"),
        ("2024-01-01T00:00:10Z", "b"),
        ("2024-01-01T00:00:20Z", "c"),
    ] {
        store.put(&LogRecord::new("svc", ts(time), msg)).await.unwrap();
    }

    let messages = |logs: Vec<LogView>| logs.into_iter().map(|l| l.message).collect::<Vec<_>>();

    let exact = store
        .query(
            "svc",
            Some(ts("2024-01-01T00:00:10Z")),
            Some(ts("2024-01-01T00:00:10Z")),
        )
        .await
        .unwrap();
    assert_eq!(messages(exact), vec!["b"]);

    let from_only = store
        .query("svc", Some(ts("2024-01-01T00:00:10Z")), None)
        .await
        .unwrap();
    assert_eq!(messages(from_only), vec!["b", "c"]);

    let to_only = store
        .query("svc", None, Some(ts("2024-01-01T00:00:10Z")))
        .await
        .unwrap();
    assert_eq!(messages(to_only), vec!["a", "b"]);
}

#[tokio::test]
async fn test_identical_event_times_are_both_kept() {
    let (store, _backend) = setup();
    let event_time = ts("2024-01-01T00:00:00Z");

    let first = store
        .put(&LogRecord::new("auth", event_time, "first"))
        .await
        .unwrap();
    let second = store
        .put(&LogRecord::new("auth", event_time, "second"))
        .await
        .unwrap();
    assert_ne!(first, second);

    let logs = store.query("auth", None, None).await.unwrap();
    assert_eq!(logs.len(), 2);
    let mut messages: Vec<_> = logs.into_iter().map(|l| l.message).collect();
    messages.sort();
    assert_eq!(messages, vec!["first", "second"]);
}

#[tokio::test]
async fn test_services_are_isolated() {
    let (store, _backend) = setup();
    store
        .put(&LogRecord::new("auth", ts("2024-01-01T00:00:00Z"), "auth event"))
        .await
        .unwrap();
    store
        .put(&LogRecord::new("billing", ts("2024-01-01T00:00:00Z"), "billing event"))
        .await
        .unwrap();

    let logs = store.query("billing", None, None).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "billing event");
}

#[tokio::test]
async fn test_rejected_batch_leaves_no_partial_state() {
    let (store, backend) = setup();

    backend.set_unavailable(true);
    let result = store
        .put(&LogRecord::new("auth", ts("2024-01-01T00:00:00Z"), "lost").with_id("lost-id"))
        .await;
    assert!(matches!(result, Err(StoreError::Unavailable(_))));

    backend.set_unavailable(false);
    assert!(!backend.contains_key(&record_key("lost-id")));
    assert!(!backend.contains_key(&index_key("auth")));
    assert!(store.query("auth", None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_record_evicted_between_scan_and_fetch_is_omitted() {
    let (store, backend) = setup();
    store
        .put(&LogRecord::new("auth", ts("2024-01-01T00:00:00Z"), "kept").with_id("kept"))
        .await
        .unwrap();
    store
        .put(&LogRecord::new("auth", ts("2024-01-01T00:00:01Z"), "gone").with_id("gone"))
        .await
        .unwrap();

    // The index still names "gone" but its record is no longer there
    backend.evict(&record_key("gone"));

    let logs = store.query("auth", None, None).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "kept");
}

#[tokio::test]
async fn test_sub_second_event_times_round_trip() {
    let (store, _backend) = setup();
    let early = ts("2024-01-01T00:00:00.000000100Z");
    let late = ts("2024-01-01T00:00:00.900Z");

    store.put(&LogRecord::new("svc", late, "late")).await.unwrap();
    store.put(&LogRecord::new("svc", early, "early")).await.unwrap();

    let logs = store.query("svc", None, None).await.unwrap();
    assert_eq!(logs[0].event_time, early);
    assert_eq!(logs[1].event_time, late);
}

#[tokio::test]
async fn test_event_times_sharing_an_index_score_stay_ordered() {
    let (store, _backend) = setup();
    let base = ts("2024-01-01T00:00:00Z");

    // 100 ns apart, inserted newest first, ids ordered against event time
    for (offset, id) in [(300, "a"), (200, "b"), (100, "c"), (0, "d")] {
        let event_time = base + ChronoDuration::nanoseconds(offset);
        store
            .put(&LogRecord::new("svc", event_time, format!("+{}ns", offset)).with_id(id))
            .await
            .unwrap();
    }

    let logs = store.query("svc", None, None).await.unwrap();
    let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["+0ns", "+100ns", "+200ns", "+300ns"]);

    let window = store
        .query(
            "svc",
            Some(base + ChronoDuration::nanoseconds(100)),
            Some(base + ChronoDuration::nanoseconds(200)),
        )
        .await
        .unwrap();
    let messages: Vec<&str> = window.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["+100ns", "+200ns"]);
}

#[tokio::test]
async fn test_unindexable_event_time_is_rejected() {
    let (store, backend) = setup();
    let far_future = Utc.with_ymd_and_hms(2400, 1, 1, 0, 0, 0).unwrap();
    let far_past = Utc.with_ymd_and_hms(1500, 1, 1, 0, 0, 0).unwrap();

    for event_time in [far_future, far_past] {
        let result = store.put(&LogRecord::new("svc", event_time, "m")).await;
        assert!(matches!(result, Err(StoreError::InvalidRecord(_))));
    }
    assert_eq!(backend.key_count(), 0);
}

#[tokio::test]
async fn test_out_of_range_query_bounds_saturate() {
    let (store, _backend) = setup();
    store
        .put(&LogRecord::new("svc", ts("2024-01-01T00:00:00Z"), "m"))
        .await
        .unwrap();

    let far_past = Utc.with_ymd_and_hms(1500, 1, 1, 0, 0, 0).unwrap();
    let far_future = Utc.with_ymd_and_hms(2400, 1, 1, 0, 0, 0).unwrap();

    let all = store
        .query("svc", Some(far_past), Some(far_future))
        .await
        .unwrap();
    assert_eq!(all.len(), 1);

    let none = store.query("svc", Some(far_future), None).await.unwrap();
    assert!(none.is_empty());

    let none = store.query("svc", None, Some(far_past)).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_record_and_index_expire_together() {
    let (store, backend) = setup();
    let id = store
        .put(&LogRecord::new("auth", ts("2024-01-01T00:00:00Z"), "login ok"))
        .await
        .unwrap();

    tokio::time::advance(RETENTION - Duration::from_secs(1)).await;
    assert!(backend.contains_key(&record_key(&id)));
    assert!(backend.contains_key(&index_key("auth")));
    assert_eq!(store.query("auth", None, None).await.unwrap().len(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!backend.contains_key(&record_key(&id)));
    assert!(!backend.contains_key(&index_key("auth")));
    assert!(store.query("auth", None, None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_index_expiry_is_refreshed_by_new_records() {
    let (store, backend) = setup();
    let old = store
        .put(&LogRecord::new("auth", ts("2024-01-01T00:00:00Z"), "old"))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(1800)).await;
    store
        .put(&LogRecord::new("auth", ts("2024-01-01T00:00:01Z"), "new"))
        .await
        .unwrap();

    // The old record's own TTL runs out; the index lives on with the newer member
    tokio::time::advance(Duration::from_secs(1801)).await;
    assert!(!backend.contains_key(&record_key(&old)));
    assert!(backend.contains_key(&index_key("auth")));

    let logs = store.query("auth", None, None).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "new");
}

#[tokio::test]
async fn test_concurrent_puts_are_all_visible() {
    let (store, _backend) = setup();
    let base = ts("2024-01-01T00:00:00Z");

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .put(&LogRecord::new(
                        "load",
                        base + ChronoDuration::milliseconds(i),
                        format!("m{}", i),
                    ))
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let logs = store.query("load", None, None).await.unwrap();
    assert_eq!(logs.len(), 32);
    assert!(logs.windows(2).all(|w| w[0].event_time < w[1].event_time));
}

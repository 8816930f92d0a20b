//! Persistence retry, overflow buffering and exactly-once delivery.

mod common;

use common::{fast_settings, optimal_esp_payload, FlakyStore};
use chrono::Utc;
use motorwatch::core::{AlertCategory, AlertFilter};
use motorwatch::engine;
use std::sync::Arc;

/// Store fails twice within the 3-attempt retry budget, then recovers: the
/// unit lands exactly once and nothing is lost.
#[tokio::test]
async fn test_transient_store_failure_persists_exactly_once() {
    let flaky = Arc::new(FlakyStore::new(2));
    let inner = flaky.inner.clone();
    let (handle, task) = engine::spawn(fast_settings(), flaky);

    handle
        .ingest(optimal_esp_payload(), Utc::now())
        .await
        .expect("ingest");

    assert_eq!(inner.unit_count(), 1, "one unit, no duplicates");

    // Retries stayed within budget: no persistence alert raised.
    let persistence_alerts = handle
        .query_alerts(AlertFilter {
            category: Some(AlertCategory::Persistence),
            ..AlertFilter::default()
        })
        .await
        .expect("alert query");
    assert!(persistence_alerts.is_empty());

    handle.shutdown().await.expect("shutdown");
    task.await.expect("engine task");
}

/// Store stays down past the whole retry budget: the unit parks in the
/// overflow buffer, a critical persistence alert fires, and the next
/// successful write drains the backlog, every unit exactly once.
#[tokio::test]
async fn test_exhausted_retries_park_unit_then_drain_on_recovery() {
    // 5 failures > 3 attempts: the first unit exhausts its budget.
    let flaky = Arc::new(FlakyStore::new(5));
    let inner = flaky.inner.clone();
    let (handle, task) = engine::spawn(fast_settings(), flaky);

    handle
        .ingest(optimal_esp_payload(), Utc::now())
        .await
        .expect("ingest accepted despite store outage");

    assert_eq!(inner.unit_count(), 0);
    let status = handle.status().await.expect("status");
    assert_eq!(status.overflow_len, 1, "unit parked in overflow");

    let persistence_alerts = handle
        .query_alerts(AlertFilter {
            category: Some(AlertCategory::Persistence),
            active_only: true,
            ..AlertFilter::default()
        })
        .await
        .expect("alert query");
    assert_eq!(persistence_alerts.len(), 1);

    // Store has recovered (5 failures consumed: 3 + 2 from the next unit's
    // first attempts)... ingest until the backlog drains.
    let mut drained = false;
    for _ in 0..4 {
        handle
            .ingest(optimal_esp_payload(), Utc::now())
            .await
            .expect("ingest");
        let status = handle.status().await.expect("status");
        if status.overflow_len == 0 {
            drained = true;
            break;
        }
    }
    assert!(drained, "overflow buffer must drain after recovery");

    // No unit lost, none duplicated: parked unit + each later ingest.
    let recent = handle.query_recent(16).await.expect("recent query");
    let persisted = inner.unit_count();
    assert_eq!(persisted, recent.len());
    let mut timestamps: Vec<_> = recent.iter().map(|u| u.reading.timestamp).collect();
    timestamps.sort();
    timestamps.dedup();
    assert_eq!(timestamps.len(), persisted, "duplicate unit detected");

    handle.shutdown().await.expect("shutdown");
    task.await.expect("engine task");
}

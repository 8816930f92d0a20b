//! Shared helpers for the integration test suite.
// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use motorwatch::config::Settings;
use motorwatch::core::{
    AlertFilter, MaintenanceAlert, PipelineUnit, RawPayload, SystemEvent, UnitStore,
};
use motorwatch::data::MemoryStore;
use motorwatch::error::{AppResult, MonitorError};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A push payload at the reference optimal operating point.
pub fn optimal_esp_payload() -> RawPayload {
    RawPayload::esp(&[
        ("VAL1", json!("6.25")),
        ("VAL2", json!("24.0")),
        ("VAL3", json!("2750")),
        ("VAL4", json!("26.0")),
        ("VAL5", json!("45.0")),
        ("VAL7", json!("26.5")),
        ("VAL9", json!("OFF")),
        ("VAL10", json!("OFF")),
        ("VAL11", json!("OFF")),
        ("VAL12", json!("NOR")),
    ])
}

/// A poll payload around 24 V with the motor at roughly 38 °C.
pub fn nominal_plc_payload() -> RawPayload {
    RawPayload::plc(3276, 734)
}

/// A poll payload with the motor overheating at roughly 65 °C.
pub fn hot_plc_payload() -> RawPayload {
    // 65 °C / 0.05175 °C-per-count ≈ 1256 counts.
    RawPayload::plc(3276, 1256)
}

/// Settings tuned so integration tests do not wait on production cadences.
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.sources.push_timeout_secs = 1;
    settings.sources.poll_timeout_secs = 60;
    settings.sources.lost_multiple = 1.0;
    settings.sources.sweep_interval_secs = 1;
    settings.persistence.backoff_ms = 10;
    settings.persistence.op_timeout_ms = 500;
    settings
        .validate()
        .expect("fast test settings must stay valid");
    settings
}

/// Store wrapper that fails the first `failures` unit appends, then recovers.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    remaining_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: Arc::new(MemoryStore::new()),
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl UnitStore for FlakyStore {
    async fn append_unit(&self, unit: &PipelineUnit) -> AppResult<()> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(MonitorError::Persistence("store unavailable".into()));
        }
        self.inner.append_unit(unit).await
    }

    async fn append_events(&self, events: &[SystemEvent]) -> AppResult<()> {
        self.inner.append_events(events).await
    }

    async fn upsert_alerts(&self, alerts: &[MaintenanceAlert]) -> AppResult<()> {
        self.inner.upsert_alerts(alerts).await
    }

    async fn query_recent(&self, max: usize) -> AppResult<Vec<PipelineUnit>> {
        self.inner.query_recent(max).await
    }

    async fn query_alerts(&self, filter: &AlertFilter) -> AppResult<Vec<MaintenanceAlert>> {
        self.inner.query_alerts(filter).await
    }
}

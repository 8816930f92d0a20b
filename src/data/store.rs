//! Durable store implementations behind the [`UnitStore`] seam.
//!
//! [`MemoryStore`] is the in-process append-only store used by the engine
//! and the test suite; a relational backend would implement the same trait.
//! It optionally mirrors every persisted unit to a CSV export file matching
//! the columns the reference installation's spreadsheet tooling expects.

use crate::core::{AlertFilter, MaintenanceAlert, PipelineUnit, SystemEvent, UnitStore};
use crate::error::{AppResult, MonitorError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

// ============================================================================
// CSV Export
// ============================================================================

/// Appends one row per persisted unit to a CSV file.
///
/// The header is written only when the file is created, so restarts keep
/// appending to the same export.
pub struct CsvExporter {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

const CSV_COLUMNS: [&str; 18] = [
    "timestamp",
    "current_a",
    "voltage_v",
    "rpm",
    "ambient_temp_c",
    "humidity_pct",
    "motor_temp_c",
    "plc_voltage_v",
    "power_kw",
    "overall_health_score",
    "electrical_health",
    "thermal_health",
    "mechanical_health",
    "predictive_health",
    "efficiency_score",
    "relay1",
    "relay2",
    "relay3",
];

impl CsvExporter {
    pub fn create(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new().from_writer(file);
        if is_new {
            writer.write_record(CSV_COLUMNS)?;
            writer.flush()?;
        }
        info!(path = %path.display(), "CSV exporter initialized");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn opt(value: Option<f64>) -> String {
        value.map(|v| v.to_string()).unwrap_or_default()
    }

    pub fn append(&self, unit: &PipelineUnit) -> AppResult<()> {
        let health = &unit.health;
        let reading = &unit.reading;
        // The supply-voltage column pair reflects which source measured it.
        let (esp_voltage, plc_voltage) = match reading.source {
            crate::core::SourceId::Esp => (Self::opt(reading.voltage_v), String::new()),
            crate::core::SourceId::Plc => (String::new(), Self::opt(reading.voltage_v)),
        };
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| MonitorError::Persistence("CSV writer lock poisoned".into()))?;
        writer.write_record(&[
            reading.timestamp.to_rfc3339(),
            Self::opt(reading.current_a),
            esp_voltage,
            Self::opt(reading.rpm),
            Self::opt(reading.ambient_temp_c),
            Self::opt(reading.humidity_pct),
            Self::opt(reading.motor_temp_c),
            plc_voltage,
            Self::opt(health.power_kw),
            health.overall.to_string(),
            health.electrical.to_string(),
            health.thermal.to_string(),
            health.mechanical.to_string(),
            health.predictive.to_string(),
            health.efficiency.to_string(),
            format!("{:?}", reading.relays[0]),
            format!("{:?}", reading.relays[1]),
            format!("{:?}", reading.relays[2]),
        ])?;
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| MonitorError::Persistence("CSV writer lock poisoned".into()))?;
        writer.flush()?;
        Ok(())
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

#[derive(Default)]
struct MemoryStoreInner {
    units: Vec<PipelineUnit>,
    events: Vec<SystemEvent>,
    alerts: Vec<MaintenanceAlert>,
    alert_index: HashMap<Uuid, usize>,
}

impl MemoryStoreInner {
    fn upsert_alert(&mut self, alert: &MaintenanceAlert) {
        match self.alert_index.get(&alert.id) {
            Some(&i) => self.alerts[i] = alert.clone(),
            None => {
                self.alert_index.insert(alert.id, self.alerts.len());
                self.alerts.push(alert.clone());
            }
        }
    }
}

/// Append-only in-memory store with an optional CSV mirror.
///
/// `append_unit` takes the inner lock once, so a unit is either fully
/// visible or not at all, which is the atomicity the retry path relies on.
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
    csv: Option<CsvExporter>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner::default()),
            csv: None,
        }
    }

    /// Mirrors persisted units to a CSV export at `path`.
    pub fn with_csv(path: &Path) -> AppResult<Self> {
        Ok(Self {
            inner: Mutex::new(MemoryStoreInner::default()),
            csv: Some(CsvExporter::create(path)?),
        })
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, MemoryStoreInner>> {
        self.inner
            .lock()
            .map_err(|_| MonitorError::Persistence("store lock poisoned".into()))
    }

    /// Total number of persisted units (test observability).
    pub fn unit_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.units.len()).unwrap_or(0)
    }

    /// Total number of persisted events (test observability).
    pub fn event_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.events.len()).unwrap_or(0)
    }

    /// Copies of all persisted events (test observability).
    pub fn events(&self) -> Vec<SystemEvent> {
        self.inner
            .lock()
            .map(|inner| inner.events.clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UnitStore for MemoryStore {
    async fn append_unit(&self, unit: &PipelineUnit) -> AppResult<()> {
        {
            let mut inner = self.lock()?;
            inner.units.push(unit.clone());
            inner.events.extend(unit.events.iter().cloned());
            for alert in &unit.alerts {
                inner.upsert_alert(alert);
            }
        }
        // The CSV mirror is best-effort: failing it after the authoritative
        // write must not trigger a retry, which would duplicate the unit.
        if let Some(csv) = &self.csv {
            if let Err(err) = csv.append(unit) {
                tracing::warn!(error = %err, "CSV mirror write failed");
            }
        }
        Ok(())
    }

    async fn append_events(&self, events: &[SystemEvent]) -> AppResult<()> {
        let mut inner = self.lock()?;
        inner.events.extend(events.iter().cloned());
        Ok(())
    }

    async fn upsert_alerts(&self, alerts: &[MaintenanceAlert]) -> AppResult<()> {
        let mut inner = self.lock()?;
        for alert in alerts {
            inner.upsert_alert(alert);
        }
        Ok(())
    }

    async fn query_recent(&self, max: usize) -> AppResult<Vec<PipelineUnit>> {
        let inner = self.lock()?;
        Ok(inner.units.iter().rev().take(max).cloned().collect())
    }

    async fn query_alerts(&self, filter: &AlertFilter) -> AppResult<Vec<MaintenanceAlert>> {
        let inner = self.lock()?;
        let mut alerts: Vec<MaintenanceAlert> = inner
            .alerts
            .iter()
            .filter(|a| {
                filter.category.map_or(true, |c| a.category == c)
                    && filter.min_severity.map_or(true, |s| a.severity >= s)
                    && (!filter.active_only || !a.acknowledged)
            })
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = filter.limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }

    async fn flush(&self) -> AppResult<()> {
        if let Some(csv) = &self.csv {
            csv.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        AlertCategory, AnomalyVerdict, CategoryIssues, EventKind, HealthScore, RawPayload, Reading,
        RelayState, Severity, SourceId, StatusBand,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn unit() -> PipelineUnit {
        let now = Utc::now();
        PipelineUnit {
            reading: Reading {
                source: SourceId::Esp,
                timestamp: now,
                current_a: Some(6.25),
                voltage_v: Some(24.0),
                rpm: Some(2750.0),
                motor_temp_c: None,
                ambient_temp_c: Some(26.0),
                humidity_pct: Some(45.0),
                heat_index_c: Some(26.5),
                relays: [RelayState::Open; 3],
                raw: RawPayload::Esp { fields: BTreeMap::new() },
            },
            health: HealthScore {
                timestamp: now,
                electrical: 100.0,
                thermal: 100.0,
                mechanical: 100.0,
                predictive: 100.0,
                overall: 100.0,
                band: StatusBand::Excellent,
                efficiency: 100.0,
                power_kw: Some(0.15),
                issues: CategoryIssues::default(),
            },
            verdict: AnomalyVerdict::insufficient_history(now),
            alerts: Vec::new(),
            events: vec![SystemEvent::new(EventKind::BandCrossing, now, "test")],
        }
    }

    fn alert(acknowledged: bool) -> MaintenanceAlert {
        let now = Utc::now();
        MaintenanceAlert {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            category: AlertCategory::Thermal,
            root_cause: "thermal_degraded".into(),
            severity: Severity::Warning,
            message: "Thermal health 50.0%".into(),
            recommended_action: "Improve ventilation".into(),
            confidence: 0.85,
            acknowledged,
            acknowledged_at: acknowledged.then(Utc::now),
        }
    }

    #[tokio::test]
    async fn test_append_and_query_recent() {
        let store = MemoryStore::new();
        store.append_unit(&unit()).await.expect("append");
        store.append_unit(&unit()).await.expect("append");
        let recent = store.query_recent(10).await.expect("query");
        assert_eq!(recent.len(), 2);
        assert_eq!(store.event_count(), 2);
    }

    #[tokio::test]
    async fn test_upsert_alert_by_id_does_not_duplicate() {
        let store = MemoryStore::new();
        let mut a = alert(false);
        store.upsert_alerts(std::slice::from_ref(&a)).await.expect("upsert");
        a.message = "updated".into();
        store.upsert_alerts(std::slice::from_ref(&a)).await.expect("upsert");

        let alerts = store.query_alerts(&AlertFilter::default()).await.expect("query");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "updated");
    }

    #[tokio::test]
    async fn test_alert_filters() {
        let store = MemoryStore::new();
        store
            .upsert_alerts(&[alert(false), alert(true)])
            .await
            .expect("upsert");

        let active = store
            .query_alerts(&AlertFilter { active_only: true, ..AlertFilter::default() })
            .await
            .expect("query");
        assert_eq!(active.len(), 1);

        let critical = store
            .query_alerts(&AlertFilter {
                min_severity: Some(Severity::Critical),
                ..AlertFilter::default()
            })
            .await
            .expect("query");
        assert!(critical.is_empty());
    }

    #[tokio::test]
    async fn test_csv_mirror_writes_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("export.csv");
        let store = MemoryStore::with_csv(&path).expect("store");
        store.append_unit(&unit()).await.expect("append");
        store.flush().await.expect("flush");

        let contents = std::fs::read_to_string(&path).expect("read csv");
        let mut lines = contents.lines();
        assert!(lines.next().expect("header").starts_with("timestamp,"));
        let row = lines.next().expect("data row");
        assert!(row.contains("6.25"));
        assert!(row.contains("2750"));
    }

    #[tokio::test]
    async fn test_csv_header_written_once_across_reopens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("export.csv");
        {
            let store = MemoryStore::with_csv(&path).expect("store");
            store.append_unit(&unit()).await.expect("append");
            store.flush().await.expect("flush");
        }
        {
            let store = MemoryStore::with_csv(&path).expect("store");
            store.append_unit(&unit()).await.expect("append");
            store.flush().await.expect("flush");
        }
        let contents = std::fs::read_to_string(&path).expect("read csv");
        let headers = contents.lines().filter(|l| l.starts_with("timestamp,")).count();
        assert_eq!(headers, 1);
        assert_eq!(contents.lines().count(), 3);
    }
}

//! Core data types and trait seams for the monitoring engine.
//!
//! This module defines the foundational data model for the whole pipeline,
//! plus the trait-based interfaces behind which the external collaborators
//! (durable store, pub/sub sink) live.
//!
//! # Data Flow
//!
//! ```text
//! Source Adapters --[RawPayload]--> Normalizer --[Reading]--> Engine
//!     Engine --[PipelineUnit]--> UnitStore (persist) --> UpdatePublisher (fan-out)
//! ```
//!
//! # Thread Safety
//!
//! All trait seams require `Send + Sync` so they can be shared across the
//! coordinator actor and its timer tasks. Result records (`Reading`,
//! `HealthScore`, `AnomalyVerdict`, ...) are immutable once created; only
//! the coordinator writes to the store.

use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Sources and Raw Payloads
// =============================================================================

/// One of the two independent physical data origins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// ESP-class microcontroller feed (push-paced, irregular).
    Esp,
    /// PLC-class industrial controller feed (poll-paced, fixed interval).
    Plc,
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Esp => write!(f, "esp"),
            SourceId::Plc => write!(f, "plc"),
        }
    }
}

/// Raw register words read from the PLC in one poll cycle.
///
/// `d100` carries the motor supply voltage ADC value, `d102` the motor
/// temperature ADC value. Conversion to engineering units happens in the
/// normalizer, not here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlcRegisters {
    pub d100: u16,
    pub d102: u16,
}

/// Source-tagged raw payload as delivered by an adapter.
///
/// The dynamic shape of the push payload (`VAL1`..`VAL12` keys) never crosses
/// the normalizer boundary; downstream components only ever see a `Reading`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RawPayload {
    Esp {
        fields: BTreeMap<String, serde_json::Value>,
    },
    Plc {
        registers: PlcRegisters,
    },
}

impl RawPayload {
    /// The source that produced this payload.
    pub fn source(&self) -> SourceId {
        match self {
            RawPayload::Esp { .. } => SourceId::Esp,
            RawPayload::Plc { .. } => SourceId::Plc,
        }
    }

    /// Builds an ESP-style push payload from key/value pairs.
    pub fn esp(fields: &[(&str, serde_json::Value)]) -> Self {
        RawPayload::Esp {
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        }
    }

    /// Builds a poll payload from raw register words.
    pub fn plc(d100: u16, d102: u16) -> Self {
        RawPayload::Plc {
            registers: PlcRegisters { d100, d102 },
        }
    }
}

// =============================================================================
// Canonical Reading
// =============================================================================

/// State of one of the three protection/control relays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    Open,
    Closed,
    Unknown,
}

impl Default for RelayState {
    fn default() -> Self {
        RelayState::Unknown
    }
}

/// A single canonical reading produced by the normalizer.
///
/// Immutable once created. Fields a source does not report are `None`:
/// the push source never reports motor temperature, and the poll source only
/// reports motor temperature and supply voltage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reading {
    pub source: SourceId,
    /// UTC timestamp at which the payload was received.
    pub timestamp: DateTime<Utc>,
    pub current_a: Option<f64>,
    pub voltage_v: Option<f64>,
    pub rpm: Option<f64>,
    pub motor_temp_c: Option<f64>,
    pub ambient_temp_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub heat_index_c: Option<f64>,
    pub relays: [RelayState; 3],
    /// The raw payload the reading was derived from.
    pub raw: RawPayload,
}

// =============================================================================
// Fused Snapshot
// =============================================================================

/// Versioned fusion of the latest values from both sources.
///
/// Owned and mutated only by the coordinator; query and publish paths read
/// copies. The version counter increments on every applied reading so
/// subscribers can detect staleness.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub current_a: Option<f64>,
    pub esp_voltage_v: Option<f64>,
    pub plc_voltage_v: Option<f64>,
    pub rpm: Option<f64>,
    pub motor_temp_c: Option<f64>,
    pub ambient_temp_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub heat_index_c: Option<f64>,
    pub relays: [RelayState; 3],
}

impl Snapshot {
    /// Merges a reading into the snapshot, overwriting only the fields the
    /// reading actually carries.
    pub fn apply(&mut self, reading: &Reading) {
        self.version += 1;
        self.updated_at = Some(reading.timestamp);
        match reading.source {
            SourceId::Esp => {
                self.current_a = reading.current_a;
                self.esp_voltage_v = reading.voltage_v;
                self.rpm = reading.rpm;
                self.ambient_temp_c = reading.ambient_temp_c;
                self.humidity_pct = reading.humidity_pct;
                self.heat_index_c = reading.heat_index_c;
                self.relays = reading.relays;
            }
            SourceId::Plc => {
                self.plc_voltage_v = reading.voltage_v;
                self.motor_temp_c = reading.motor_temp_c;
            }
        }
    }

    /// Clears every field owned by the given source.
    ///
    /// Called when a source transitions to Lost so stale values cannot keep
    /// feeding the scoring and anomaly paths.
    pub fn clear_source(&mut self, source: SourceId) {
        self.version += 1;
        match source {
            SourceId::Esp => {
                self.current_a = None;
                self.esp_voltage_v = None;
                self.rpm = None;
                self.ambient_temp_c = None;
                self.humidity_pct = None;
                self.heat_index_c = None;
                self.relays = [RelayState::Unknown; 3];
            }
            SourceId::Plc => {
                self.plc_voltage_v = None;
                self.motor_temp_c = None;
            }
        }
    }

    /// The voltage used for scoring: the push-source measurement when
    /// available, otherwise the poll-source register reading.
    pub fn voltage_v(&self) -> Option<f64> {
        self.esp_voltage_v.or(self.plc_voltage_v)
    }
}

// =============================================================================
// Health Scores
// =============================================================================

/// Health status band derived from the overall score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusBand {
    Critical,
    Warning,
    Good,
    Excellent,
}

impl StatusBand {
    /// Band boundaries are inclusive on the lower bound:
    /// 90-100 Excellent, 75-89 Good, 60-74 Warning, 0-59 Critical.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            StatusBand::Excellent
        } else if score >= 75.0 {
            StatusBand::Good
        } else if score >= 60.0 {
            StatusBand::Warning
        } else {
            StatusBand::Critical
        }
    }
}

impl fmt::Display for StatusBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusBand::Excellent => write!(f, "Excellent"),
            StatusBand::Good => write!(f, "Good"),
            StatusBand::Warning => write!(f, "Warning"),
            StatusBand::Critical => write!(f, "Critical"),
        }
    }
}

/// The four weighted scoring categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Electrical,
    Thermal,
    Mechanical,
    Predictive,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Electrical => write!(f, "electrical"),
            Category::Thermal => write!(f, "thermal"),
            Category::Mechanical => write!(f, "mechanical"),
            Category::Predictive => write!(f, "predictive"),
        }
    }
}

/// Per-category issue strings accompanying a health score.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CategoryIssues {
    pub electrical: Vec<String>,
    pub thermal: Vec<String>,
    pub mechanical: Vec<String>,
    pub predictive: Vec<String>,
}

/// Derived health assessment for one processed reading.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthScore {
    pub timestamp: DateTime<Utc>,
    pub electrical: f64,
    pub thermal: f64,
    pub mechanical: f64,
    pub predictive: f64,
    /// Weighted sum of the four categories, clamped to [0, 100].
    pub overall: f64,
    pub band: StatusBand,
    /// Motor efficiency estimate (rpm efficiency and power efficiency
    /// averaged), reported alongside but not part of the overall score.
    pub efficiency: f64,
    /// Instantaneous power draw in kW, when both voltage and current are known.
    pub power_kw: Option<f64>,
    pub issues: CategoryIssues,
}

impl HealthScore {
    /// Score of a single category.
    pub fn category(&self, category: Category) -> f64 {
        match category {
            Category::Electrical => self.electrical,
            Category::Thermal => self.thermal,
            Category::Mechanical => self.mechanical,
            Category::Predictive => self.predictive,
        }
    }

    /// The lowest-scoring category, used to name the root cause in
    /// health-critical alert messages.
    pub fn weakest_category(&self) -> Category {
        let mut weakest = Category::Electrical;
        let mut lowest = self.electrical;
        for category in [Category::Thermal, Category::Mechanical, Category::Predictive] {
            let score = self.category(category);
            if score < lowest {
                lowest = score;
                weakest = category;
            }
        }
        weakest
    }
}

// =============================================================================
// Anomaly Verdicts
// =============================================================================

/// Contribution of a single feature to an anomaly verdict.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureContribution {
    #[serde(skip_deserializing)]
    pub name: &'static str,
    /// Standardized deviation of the feature from its running mean.
    pub deviation: f64,
}

/// Outcome of scoring one reading against the most recent anomaly model fit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub timestamp: DateTime<Utc>,
    pub is_anomaly: bool,
    /// Normalized outlier score in [0, 1]; higher is more anomalous.
    pub score: f64,
    /// Features ordered by descending standardized deviation.
    pub contributing_features: Vec<FeatureContribution>,
}

impl AnomalyVerdict {
    /// The non-anomalous verdict returned while the rolling window is below
    /// its minimum population.
    pub fn insufficient_history(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            is_anomaly: false,
            score: 0.0,
            contributing_features: Vec::new(),
        }
    }
}

// =============================================================================
// Maintenance Alerts
// =============================================================================

/// Alert severity, ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Alert category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Health,
    Electrical,
    Thermal,
    Mechanical,
    Predictive,
    Anomaly,
    Connectivity,
    Persistence,
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCategory::Health => write!(f, "health"),
            AlertCategory::Electrical => write!(f, "electrical"),
            AlertCategory::Thermal => write!(f, "thermal"),
            AlertCategory::Mechanical => write!(f, "mechanical"),
            AlertCategory::Predictive => write!(f, "predictive"),
            AlertCategory::Anomaly => write!(f, "anomaly"),
            AlertCategory::Connectivity => write!(f, "connectivity"),
            AlertCategory::Persistence => write!(f, "persistence"),
        }
    }
}

/// A maintenance alert produced by the recommendation engine.
///
/// Created once per (category, root cause) and updated in place while it
/// stays active; acknowledgment is the only mutation afterwards. Alerts are
/// never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceAlert {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub category: AlertCategory,
    /// Deduplication key: at most one unacknowledged alert exists per
    /// (category, root_cause) pair at any time.
    pub root_cause: String,
    pub severity: Severity,
    pub message: String,
    pub recommended_action: String,
    pub confidence: f64,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Filter for alert queries.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AlertFilter {
    pub category: Option<AlertCategory>,
    pub min_severity: Option<Severity>,
    /// When true, only unacknowledged alerts are returned.
    pub active_only: bool,
    pub limit: Option<usize>,
}

// =============================================================================
// System Events
// =============================================================================

/// Kind of audit-trail event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ConnectionLost,
    ConnectionDegraded,
    ConnectionRestored,
    BandCrossing,
    ReadingRejected,
    AlertAcknowledged,
    PersistenceFailure,
    UnitDropped,
    ManualCommand,
}

/// Append-only audit record of a state transition or external command.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

impl SystemEvent {
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            kind,
            detail: detail.into(),
        }
    }
}

// =============================================================================
// Pipeline Units and Store Seam
// =============================================================================

/// Everything derived from one processed reading, persisted as one logical
/// unit: either the whole unit becomes visible to readers or none of it does.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineUnit {
    pub reading: Reading,
    pub health: HealthScore,
    pub verdict: AnomalyVerdict,
    /// Alerts created or updated by this cycle (upserted by id).
    pub alerts: Vec<MaintenanceAlert>,
    pub events: Vec<SystemEvent>,
}

/// Append-only durable store for pipeline units, keyed by timestamp.
///
/// Only the coordinator writes here. Implementations must make `append_unit`
/// atomic: a failed call must leave no partial unit visible to readers, so
/// the bounded-retry path can safely call it again.
#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Persists a unit atomically, upserting its alerts by id.
    async fn append_unit(&self, unit: &PipelineUnit) -> AppResult<()>;

    /// Persists standalone audit events (liveness sweeps, rejected readings,
    /// manual commands) outside a pipeline unit.
    async fn append_events(&self, events: &[SystemEvent]) -> AppResult<()>;

    /// Creates or updates alert rows by id (connectivity alerts raised by the
    /// sweep, acknowledgment updates).
    async fn upsert_alerts(&self, alerts: &[MaintenanceAlert]) -> AppResult<()>;

    /// Most recent units, newest first.
    async fn query_recent(&self, max: usize) -> AppResult<Vec<PipelineUnit>>;

    /// Alerts matching the filter, newest first.
    async fn query_alerts(&self, filter: &AlertFilter) -> AppResult<Vec<MaintenanceAlert>>;

    /// Flushes any buffered output (e.g. the CSV exporter) during shutdown.
    async fn flush(&self) -> AppResult<()> {
        Ok(())
    }
}

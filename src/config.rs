//! Configuration system using Figment.
//!
//! Strongly-typed settings for the monitoring engine, loaded from:
//! 1. Built-in defaults matching the reference 24 V motor installation
//! 2. An optional `motorwatch.toml` file
//! 3. Environment variables prefixed with `MOTORWATCH_`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! MOTORWATCH_APPLICATION__LOG_LEVEL=debug
//! MOTORWATCH_ANOMALY__CONTAMINATION=0.05
//! MOTORWATCH_SOURCES__PUSH_TIMEOUT_SECS=15
//! ```
//!
//! Every threshold consumed by the scoring, liveness and anomaly components
//! lives here; the components themselves hold no hidden tunables.

use crate::error::{AppResult, MonitorError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub sources: SourceSettings,
    pub normalizer: NormalizerSettings,
    pub thresholds: Thresholds,
    pub weights: CategoryWeights,
    pub window: WindowSettings,
    pub anomaly: AnomalySettings,
    pub persistence: PersistenceSettings,
    pub broadcast: BroadcastSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings::default(),
            sources: SourceSettings::default(),
            normalizer: NormalizerSettings::default(),
            thresholds: Thresholds::default(),
            weights: CategoryWeights::default(),
            window: WindowSettings::default(),
            anomaly: AnomalySettings::default(),
            persistence: PersistenceSettings::default(),
            broadcast: BroadcastSettings::default(),
        }
    }
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Data directory for the CSV export.
    pub data_dir: PathBuf,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "motorwatch".into(),
            log_level: "info".into(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Per-source liveness and pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Seconds of silence before the push source is considered degraded.
    pub push_timeout_secs: u64,
    /// Seconds of silence before the poll source is considered degraded.
    pub poll_timeout_secs: u64,
    /// Multiple of the timeout past which a degraded source is declared lost.
    pub lost_multiple: f64,
    /// Period of the liveness sweep task.
    pub sweep_interval_secs: u64,
    /// Poll cadence of the PLC adapter.
    pub poll_interval_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            push_timeout_secs: 30,
            poll_timeout_secs: 60,
            lost_multiple: 2.0,
            sweep_interval_secs: 10,
            poll_interval_secs: 5,
        }
    }
}

impl SourceSettings {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Policy for values outside their physical range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePolicy {
    /// Clamp to the nearest physical bound and log.
    Clamp,
    /// Reject the whole reading with a validation error.
    Reject,
}

/// Normalizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    pub range_policy: RangePolicy,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            range_policy: RangePolicy::Clamp,
        }
    }
}

/// Threshold bands for every measured quantity, in engineering units.
///
/// Defaults describe the reference installation: 24 V DC motor, 6.25 A
/// optimal load, 2750 rpm nominal speed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    // Optimal operating point
    pub optimal_motor_temp_c: f64,
    pub optimal_voltage_v: f64,
    pub optimal_current_a: f64,
    pub optimal_ambient_temp_c: f64,
    pub optimal_humidity_pct: f64,
    pub optimal_rpm: f64,

    // Motor temperature
    pub motor_temp_good_c: f64,
    pub motor_temp_warning_c: f64,
    pub motor_temp_critical_c: f64,
    /// Scale applied to motor-temperature penalties when the combined heat
    /// index exceeds the ambient critical threshold.
    pub heat_stress_factor: f64,

    // Voltage (24 V nominal)
    pub voltage_min_critical_v: f64,
    pub voltage_min_warning_v: f64,
    pub voltage_max_warning_v: f64,
    pub voltage_max_critical_v: f64,

    // Current (6.25 A nominal)
    pub current_min_warning_a: f64,
    pub current_optimal_min_a: f64,
    pub current_optimal_max_a: f64,
    pub current_max_warning_a: f64,
    pub current_max_critical_a: f64,

    // RPM (2750 nominal)
    pub rpm_min_critical: f64,
    pub rpm_min_warning: f64,
    pub rpm_max_warning: f64,
    pub rpm_max_critical: f64,

    // Environment
    pub ambient_temp_max_warning_c: f64,
    pub ambient_temp_max_critical_c: f64,
    pub humidity_min_warning_pct: f64,
    pub humidity_max_warning_pct: f64,
    pub humidity_max_critical_pct: f64,

    // Trend analysis
    /// Motor-temperature slope above which the predictive score penalizes,
    /// in °C per reading.
    pub temp_slope_limit: f64,
    /// Absolute current slope above which the predictive score penalizes,
    /// in A per reading.
    pub current_slope_limit: f64,
    /// Overall-score slope below which the predictive score penalizes,
    /// in points per reading.
    pub health_slope_limit: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            optimal_motor_temp_c: 40.0,
            optimal_voltage_v: 24.0,
            optimal_current_a: 6.25,
            optimal_ambient_temp_c: 24.0,
            optimal_humidity_pct: 40.0,
            optimal_rpm: 2750.0,

            motor_temp_good_c: 40.0,
            motor_temp_warning_c: 50.0,
            motor_temp_critical_c: 60.0,
            heat_stress_factor: 1.25,

            voltage_min_critical_v: 20.0,
            voltage_min_warning_v: 22.0,
            voltage_max_warning_v: 26.0,
            voltage_max_critical_v: 28.0,

            current_min_warning_a: 4.0,
            current_optimal_min_a: 5.0,
            current_optimal_max_a: 7.5,
            current_max_warning_a: 9.0,
            current_max_critical_a: 12.0,

            rpm_min_critical: 2400.0,
            rpm_min_warning: 2600.0,
            rpm_max_warning: 2900.0,
            rpm_max_critical: 3100.0,

            ambient_temp_max_warning_c: 30.0,
            ambient_temp_max_critical_c: 35.0,
            humidity_min_warning_pct: 30.0,
            humidity_max_warning_pct: 70.0,
            humidity_max_critical_pct: 80.0,

            temp_slope_limit: 1.0,
            current_slope_limit: 0.5,
            health_slope_limit: -1.0,
        }
    }
}

/// Weights of the four scoring categories. Must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryWeights {
    pub electrical: f64,
    pub thermal: f64,
    pub mechanical: f64,
    pub predictive: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            electrical: 0.30,
            thermal: 0.35,
            mechanical: 0.25,
            predictive: 0.10,
        }
    }
}

impl CategoryWeights {
    pub fn sum(&self) -> f64 {
        self.electrical + self.thermal + self.mechanical + self.predictive
    }
}

/// Rolling-window configuration shared by trend scoring and anomaly detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    /// Maximum number of samples retained.
    pub max_samples: usize,
    /// Maximum sample age in seconds.
    pub max_age_secs: u64,
    /// Minimum samples before the predictive category scores trends.
    pub min_trend_samples: usize,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            max_samples: 120,
            max_age_secs: 7200,
            min_trend_samples: 5,
        }
    }
}

/// Anomaly detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalySettings {
    /// Expected fraction of outliers in the window; sets the decision
    /// threshold at fit time.
    pub contamination: f64,
    /// Minimum window population before any verdict can be anomalous.
    pub min_population: usize,
    /// Number of isolation trees per fit.
    pub trees: usize,
    /// Subsample size per tree.
    pub subsample: usize,
    /// Refit after this many new samples...
    pub refit_every_samples: usize,
    /// ...or after this long, whichever comes first.
    pub refit_interval_secs: u64,
    /// Stricter secondary threshold above which a verdict raises an alert.
    pub alert_score: f64,
    /// RNG seed for reproducible tree construction.
    pub seed: u64,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            min_population: 20,
            trees: 100,
            subsample: 64,
            refit_every_samples: 50,
            refit_interval_secs: 300,
            alert_score: 0.75,
            seed: 42,
        }
    }
}

impl AnomalySettings {
    pub fn refit_interval(&self) -> Duration {
        Duration::from_secs(self.refit_interval_secs)
    }
}

/// Persistence retry and overflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Maximum store-write attempts per unit.
    pub max_attempts: u32,
    /// Delay between attempts, doubled each retry.
    pub backoff_ms: u64,
    /// Upper bound on any single store operation.
    pub op_timeout_ms: u64,
    /// Units held in memory after retries are exhausted; oldest dropped
    /// beyond this.
    pub overflow_capacity: usize,
    /// CSV export path, relative to the data directory. Empty disables it.
    pub csv_export_file: String,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 100,
            op_timeout_ms: 2000,
            overflow_capacity: 64,
            csv_export_file: "sensor_data.csv".into(),
        }
    }
}

impl PersistenceSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Fan-out channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Capacity of the per-subscriber broadcast buffer; slow subscribers
    /// past this lag and drop the oldest updates.
    pub channel_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

impl Settings {
    /// Loads settings from defaults, an optional TOML file, and the
    /// environment, then validates them.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        } else {
            figment = figment.merge(Toml::file("motorwatch.toml"));
        }
        let settings: Settings = figment
            .merge(Env::prefixed("MOTORWATCH_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks semantic constraints that parsing cannot catch.
    pub fn validate(&self) -> AppResult<()> {
        let weight_sum = self.weights.sum();
        if (weight_sum - 1.0).abs() > 1e-9 {
            return Err(MonitorError::Configuration(format!(
                "category weights must sum to 1.0, got {weight_sum}"
            )));
        }
        let t = &self.thresholds;
        if t.voltage_min_critical_v >= t.voltage_min_warning_v
            || t.voltage_min_warning_v >= t.voltage_max_warning_v
            || t.voltage_max_warning_v >= t.voltage_max_critical_v
        {
            return Err(MonitorError::Configuration(
                "voltage thresholds must be strictly ordered".into(),
            ));
        }
        if t.rpm_min_critical >= t.rpm_min_warning
            || t.rpm_min_warning >= t.rpm_max_warning
            || t.rpm_max_warning >= t.rpm_max_critical
        {
            return Err(MonitorError::Configuration(
                "rpm thresholds must be strictly ordered".into(),
            ));
        }
        if t.motor_temp_good_c >= t.motor_temp_warning_c
            || t.motor_temp_warning_c >= t.motor_temp_critical_c
        {
            return Err(MonitorError::Configuration(
                "motor temperature thresholds must be strictly ordered".into(),
            ));
        }
        if !(self.anomaly.contamination > 0.0 && self.anomaly.contamination <= 0.5) {
            return Err(MonitorError::Configuration(format!(
                "anomaly contamination must be in (0, 0.5], got {}",
                self.anomaly.contamination
            )));
        }
        if self.sources.lost_multiple < 1.0 {
            return Err(MonitorError::Configuration(
                "lost_multiple must be at least 1.0".into(),
            ));
        }
        if self.persistence.max_attempts == 0 {
            return Err(MonitorError::Configuration(
                "persistence max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().expect("reference defaults must validate");
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let weights = CategoryWeights::default();
        assert!((weights.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let mut settings = Settings::default();
        settings.weights.thermal = 0.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_inverted_voltage_band_rejected() {
        let mut settings = Settings::default();
        settings.thresholds.voltage_min_warning_v = 19.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_contamination_bounds() {
        let mut settings = Settings::default();
        settings.anomaly.contamination = 0.0;
        assert!(settings.validate().is_err());
        settings.anomaly.contamination = 0.6;
        assert!(settings.validate().is_err());
        settings.anomaly.contamination = 0.1;
        assert!(settings.validate().is_ok());
    }
}

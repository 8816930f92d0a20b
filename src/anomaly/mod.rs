//! Rolling-window anomaly detection over engineered sensor features.
//!
//! An isolation forest is periodically refit on the rolling window (every
//! `refit_every_samples` new samples or every `refit_interval`, whichever
//! comes first) and every new reading is scored against the most recent
//! fit. Refitting is decoupled from per-sample scoring to bound its cost.
//!
//! Feature scaling uses incrementally-updated per-feature mean/variance
//! (Welford), never per-call min/max, so verdicts stay continuous across
//! refits. Missing feature values are imputed with the running mean.
//!
//! Fail-open by design: below the minimum window population every verdict is
//! non-anomalous, so startup transients never alarm.

pub mod forest;

use crate::config::AnomalySettings;
use crate::core::{AnomalyVerdict, FeatureContribution, Snapshot};
use crate::data::RollingWindow;
use chrono::{DateTime, Utc};
use forest::IsolationForest;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// Number of engineered features per sample.
pub const FEATURE_COUNT: usize = 7;

/// Feature names, in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "current_a",
    "voltage_v",
    "rpm",
    "ambient_temp_c",
    "humidity_pct",
    "motor_temp_c",
    "plc_voltage_v",
];

/// Extracts the feature vector from a fused snapshot.
pub fn features_of(snapshot: &Snapshot) -> [Option<f64>; FEATURE_COUNT] {
    [
        snapshot.current_a,
        snapshot.esp_voltage_v,
        snapshot.rpm,
        snapshot.ambient_temp_c,
        snapshot.humidity_pct,
        snapshot.motor_temp_c,
        snapshot.plc_voltage_v,
    ]
}

fn features_of_sample(sample: &crate::data::WindowSample) -> [Option<f64>; FEATURE_COUNT] {
    [
        sample.current_a,
        sample.esp_voltage_v,
        sample.rpm,
        sample.ambient_temp_c,
        sample.humidity_pct,
        sample.motor_temp_c,
        sample.plc_voltage_v,
    ]
}

/// Incrementally-updated per-feature mean and variance (Welford).
#[derive(Clone, Debug, Default)]
pub struct RunningScaler {
    count: [u64; FEATURE_COUNT],
    mean: [f64; FEATURE_COUNT],
    m2: [f64; FEATURE_COUNT],
}

impl RunningScaler {
    /// Folds one sample into the running statistics. Missing values leave
    /// their feature untouched.
    pub fn update(&mut self, features: &[Option<f64>; FEATURE_COUNT]) {
        for (i, value) in features.iter().enumerate() {
            let Some(v) = value else { continue };
            self.count[i] += 1;
            let delta = v - self.mean[i];
            self.mean[i] += delta / self.count[i] as f64;
            self.m2[i] += delta * (v - self.mean[i]);
        }
    }

    pub fn mean(&self, feature: usize) -> f64 {
        self.mean[feature]
    }

    fn std(&self, feature: usize) -> f64 {
        if self.count[feature] < 2 {
            return 1.0;
        }
        (self.m2[feature] / self.count[feature] as f64).sqrt().max(1e-9)
    }

    /// Standardizes one feature value against the running statistics.
    pub fn standardize(&self, feature: usize, value: f64) -> f64 {
        (value - self.mean[feature]) / self.std(feature)
    }

    /// Standardized, mean-imputed vector for a sample.
    fn vectorize(&self, features: &[Option<f64>; FEATURE_COUNT]) -> Vec<f64> {
        (0..FEATURE_COUNT)
            .map(|i| match features[i] {
                Some(v) => self.standardize(i, v),
                // Imputed values sit exactly on the running mean: zero after
                // standardization.
                None => 0.0,
            })
            .collect()
    }
}

/// Rolling-window outlier scorer.
///
/// Owned by the coordinator; `observe`/`score` run per reading, `refit` runs
/// on the refit cadence.
pub struct AnomalyDetector {
    settings: AnomalySettings,
    scaler: RunningScaler,
    forest: Option<IsolationForest>,
    /// Decision threshold derived from the contamination quantile at fit time.
    threshold: f64,
    samples_since_fit: usize,
    last_fit_at: Option<DateTime<Utc>>,
    rng: StdRng,
}

impl AnomalyDetector {
    pub fn new(settings: AnomalySettings) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Self {
            settings,
            scaler: RunningScaler::default(),
            forest: None,
            threshold: 0.5,
            samples_since_fit: 0,
            last_fit_at: None,
            rng,
        }
    }

    /// Folds a new sample into the running normalization statistics.
    pub fn observe(&mut self, features: &[Option<f64>; FEATURE_COUNT]) {
        self.scaler.update(features);
        self.samples_since_fit += 1;
    }

    /// True once enough samples accumulated since the last fit.
    pub fn due_by_count(&self) -> bool {
        self.samples_since_fit >= self.settings.refit_every_samples
    }

    /// Scores a feature vector against the most recent fit.
    ///
    /// Below the minimum window population, or before any fit happened, the
    /// verdict is non-anomalous by definition.
    pub fn score(
        &self,
        features: &[Option<f64>; FEATURE_COUNT],
        window_len: usize,
        timestamp: DateTime<Utc>,
    ) -> AnomalyVerdict {
        if window_len < self.settings.min_population {
            return AnomalyVerdict::insufficient_history(timestamp);
        }
        let Some(forest) = &self.forest else {
            return AnomalyVerdict::insufficient_history(timestamp);
        };

        let vector = self.scaler.vectorize(features);
        let score = forest.score(&vector);

        let mut contributing: Vec<FeatureContribution> = features
            .iter()
            .enumerate()
            .filter_map(|(i, value)| {
                value.map(|v| FeatureContribution {
                    name: FEATURE_NAMES[i],
                    deviation: self.scaler.standardize(i, v),
                })
            })
            .collect();
        contributing.sort_by(|a, b| {
            b.deviation
                .abs()
                .partial_cmp(&a.deviation.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        AnomalyVerdict {
            timestamp,
            is_anomaly: score >= self.threshold,
            score,
            contributing_features: contributing,
        }
    }

    /// Refits the forest on the rolling window and recomputes the decision
    /// threshold from the contamination quantile of the window's own scores.
    ///
    /// A window below the minimum population is left unfitted.
    pub fn refit(&mut self, window: &RollingWindow, now: DateTime<Utc>) {
        self.samples_since_fit = 0;
        self.last_fit_at = Some(now);
        if window.len() < self.settings.min_population {
            return;
        }

        let matrix: Vec<Vec<f64>> = window
            .iter()
            .map(|sample| self.scaler.vectorize(&features_of_sample(sample)))
            .collect();

        let forest = IsolationForest::fit(
            &matrix,
            self.settings.trees,
            self.settings.subsample,
            &mut self.rng,
        );
        let Some(forest) = forest else { return };

        let mut scores: Vec<f64> = matrix.iter().map(|row| forest.score(row)).collect();
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let quantile = 1.0 - self.settings.contamination;
        let index = ((scores.len() as f64 * quantile) as usize).min(scores.len() - 1);
        self.threshold = scores[index];
        self.forest = Some(forest);

        debug!(
            window = window.len(),
            threshold = self.threshold,
            "anomaly model refit"
        );
    }

    pub fn last_fit_at(&self) -> Option<DateTime<Utc>> {
        self.last_fit_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::WindowSample;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
    }

    fn nominal_features(i: usize) -> [Option<f64>; FEATURE_COUNT] {
        // Small deterministic jitter around the optimal operating point.
        let j = (i as f64 * 0.9).sin();
        [
            Some(6.25 + 0.1 * j),
            Some(24.0 + 0.2 * j),
            Some(2750.0 + 10.0 * j),
            Some(26.0 + 0.5 * j),
            Some(45.0 + 1.0 * j),
            Some(38.0 + 0.4 * j),
            Some(23.8 + 0.2 * j),
        ]
    }

    fn sample_from(features: &[Option<f64>; FEATURE_COUNT], secs: i64) -> WindowSample {
        WindowSample {
            timestamp: at(secs),
            current_a: features[0],
            esp_voltage_v: features[1],
            rpm: features[2],
            ambient_temp_c: features[3],
            humidity_pct: features[4],
            motor_temp_c: features[5],
            plc_voltage_v: features[6],
            overall_score: 95.0,
        }
    }

    fn fitted_detector(n: usize) -> (AnomalyDetector, RollingWindow) {
        let mut detector = AnomalyDetector::new(AnomalySettings::default());
        let mut window = RollingWindow::new(120, 7200);
        for i in 0..n {
            let features = nominal_features(i);
            detector.observe(&features);
            window.push(sample_from(&features, i as i64));
        }
        detector.refit(&window, at(n as i64));
        (detector, window)
    }

    #[test]
    fn test_insufficient_history_is_never_anomalous() {
        let detector = AnomalyDetector::new(AnomalySettings::default());
        // Wild values, but the window is empty: fail-open.
        let wild = [Some(500.0); FEATURE_COUNT];
        let verdict = detector.score(&wild, 3, at(0));
        assert!(!verdict.is_anomaly);
        assert_eq!(verdict.score, 0.0);
    }

    #[test]
    fn test_outlier_flagged_after_fit() {
        let (detector, window) = fitted_detector(60);

        let nominal = detector.score(&nominal_features(3), window.len(), at(100));
        let outlier_features = [
            Some(18.0),   // triple the optimal current
            Some(14.0),   // deep undervoltage
            Some(1200.0), // far below nominal speed
            Some(26.0),
            Some(45.0),
            Some(70.0), // overheating
            Some(14.0),
        ];
        let outlier = detector.score(&outlier_features, window.len(), at(101));

        assert!(outlier.score > nominal.score);
        assert!(outlier.is_anomaly, "outlier score {} vs threshold", outlier.score);
    }

    #[test]
    fn test_contributing_features_ordered_by_deviation() {
        let (detector, window) = fitted_detector(60);
        let mut features = nominal_features(0);
        features[5] = Some(75.0); // motor_temp far off
        let verdict = detector.score(&features, window.len(), at(100));
        assert_eq!(verdict.contributing_features[0].name, "motor_temp_c");
    }

    #[test]
    fn test_refit_due_by_count() {
        let mut detector = AnomalyDetector::new(AnomalySettings {
            refit_every_samples: 3,
            ..AnomalySettings::default()
        });
        let features = nominal_features(0);
        detector.observe(&features);
        detector.observe(&features);
        assert!(!detector.due_by_count());
        detector.observe(&features);
        assert!(detector.due_by_count());

        detector.refit(&RollingWindow::new(10, 60), at(0));
        assert!(!detector.due_by_count());
    }

    #[test]
    fn test_missing_features_imputed_not_fatal() {
        let (detector, window) = fitted_detector(60);
        let partial = [
            Some(6.25),
            Some(24.0),
            None,
            None,
            None,
            Some(38.0),
            None,
        ];
        let verdict = detector.score(&partial, window.len(), at(100));
        assert!(!verdict.is_anomaly);
        // Only present features contribute.
        assert_eq!(verdict.contributing_features.len(), 3);
    }

    #[test]
    fn test_running_scaler_statistics() {
        let mut scaler = RunningScaler::default();
        for v in [2.0, 4.0, 6.0, 8.0] {
            let mut features = [None; FEATURE_COUNT];
            features[0] = Some(v);
            scaler.update(&features);
        }
        assert!((scaler.mean(0) - 5.0).abs() < 1e-12);
        // Population std of {2,4,6,8} is sqrt(5).
        assert!((scaler.std(0) - 5.0_f64.sqrt()).abs() < 1e-9);
    }
}

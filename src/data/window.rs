//! Bounded rolling window of recent samples.
//!
//! The window backs both trend scoring and anomaly detection. It is bounded
//! twice over: by sample count and by sample age, whichever evicts first.
//! The coordinator is the single writer; readers receive slices, never a
//! handle they could mutate.

use crate::core::Snapshot;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;

/// One retained sample: the fused sensor values at scoring time plus the
/// overall score the engine computed from them.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowSample {
    pub timestamp: DateTime<Utc>,
    pub current_a: Option<f64>,
    pub esp_voltage_v: Option<f64>,
    pub plc_voltage_v: Option<f64>,
    pub rpm: Option<f64>,
    pub ambient_temp_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub motor_temp_c: Option<f64>,
    pub overall_score: f64,
}

impl WindowSample {
    /// Captures the fused snapshot together with its computed overall score.
    pub fn from_snapshot(snapshot: &Snapshot, timestamp: DateTime<Utc>, overall_score: f64) -> Self {
        Self {
            timestamp,
            current_a: snapshot.current_a,
            esp_voltage_v: snapshot.esp_voltage_v,
            plc_voltage_v: snapshot.plc_voltage_v,
            rpm: snapshot.rpm,
            ambient_temp_c: snapshot.ambient_temp_c,
            humidity_pct: snapshot.humidity_pct,
            motor_temp_c: snapshot.motor_temp_c,
            overall_score,
        }
    }
}

/// Count- and age-bounded FIFO of recent samples.
#[derive(Clone, Debug)]
pub struct RollingWindow {
    samples: VecDeque<WindowSample>,
    max_samples: usize,
    max_age: ChronoDuration,
}

impl RollingWindow {
    pub fn new(max_samples: usize, max_age_secs: u64) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples.min(1024)),
            max_samples: max_samples.max(1),
            max_age: ChronoDuration::seconds(max_age_secs as i64),
        }
    }

    /// Appends a sample and evicts anything over the count or age bound.
    pub fn push(&mut self, sample: WindowSample) {
        let newest = sample.timestamp;
        self.samples.push_back(sample);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        while let Some(front) = self.samples.front() {
            if newest.signed_duration_since(front.timestamp) > self.max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WindowSample> {
        self.samples.iter()
    }

    /// The last `n` non-missing values of a field, oldest first.
    ///
    /// Mirrors a dropna-then-tail series: gaps are skipped, not zero-filled,
    /// so trend slopes are computed over actual observations.
    pub fn tail_values<F>(&self, n: usize, field: F) -> Vec<f64>
    where
        F: Fn(&WindowSample) -> Option<f64>,
    {
        let mut values: Vec<f64> = self
            .samples
            .iter()
            .rev()
            .filter_map(|s| field(s))
            .take(n)
            .collect();
        values.reverse();
        values
    }

    /// Per-field mean over the window, ignoring missing values.
    pub fn field_mean<F>(&self, field: F) -> Option<f64>
    where
        F: Fn(&WindowSample) -> Option<f64>,
    {
        let mut sum = 0.0;
        let mut count = 0usize;
        for sample in &self.samples {
            if let Some(v) = field(sample) {
                sum += v;
                count += 1;
            }
        }
        (count > 0).then(|| sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
    }

    fn sample(secs: i64, temp: Option<f64>, score: f64) -> WindowSample {
        WindowSample {
            timestamp: at(secs),
            current_a: None,
            esp_voltage_v: None,
            plc_voltage_v: None,
            rpm: None,
            ambient_temp_c: None,
            humidity_pct: None,
            motor_temp_c: temp,
            overall_score: score,
        }
    }

    #[test]
    fn test_count_bound_evicts_oldest() {
        let mut w = RollingWindow::new(3, 3600);
        for i in 0..5 {
            w.push(sample(i, Some(i as f64), 100.0));
        }
        assert_eq!(w.len(), 3);
        let temps = w.tail_values(10, |s| s.motor_temp_c);
        assert_eq!(temps, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_age_bound_evicts_stale_samples() {
        let mut w = RollingWindow::new(100, 60);
        w.push(sample(0, Some(30.0), 100.0));
        w.push(sample(30, Some(31.0), 100.0));
        w.push(sample(120, Some(32.0), 100.0));
        // The first two are more than 60 s older than the newest.
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_tail_values_skips_missing() {
        let mut w = RollingWindow::new(10, 3600);
        w.push(sample(0, Some(30.0), 100.0));
        w.push(sample(1, None, 100.0));
        w.push(sample(2, Some(32.0), 100.0));
        let temps = w.tail_values(2, |s| s.motor_temp_c);
        assert_eq!(temps, vec![30.0, 32.0]);
    }

    #[test]
    fn test_field_mean_ignores_missing() {
        let mut w = RollingWindow::new(10, 3600);
        w.push(sample(0, Some(30.0), 100.0));
        w.push(sample(1, None, 100.0));
        w.push(sample(2, Some(40.0), 100.0));
        assert_eq!(w.field_mean(|s| s.motor_temp_c), Some(35.0));
        assert_eq!(w.field_mean(|s| s.current_a), None);
    }
}

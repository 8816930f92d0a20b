//! Health scoring engine.
//!
//! Four category scores (electrical, thermal, mechanical, predictive), each
//! 0-100, combined into a weighted overall score. Every function here is
//! pure given the fused snapshot, the rolling history and the configured
//! thresholds, so the whole assessment is deterministic and unit-testable.
//!
//! Penalty tiers stack: crossing a warning boundary costs the warning
//! penalty, crossing the critical boundary costs warning plus critical, so
//! the curve steepens toward the critical limits. Missing data for a whole
//! category scores it 0 rather than quietly passing; an asset nobody can
//! measure is not a healthy asset.
//!
//! Only unfavorable trends penalize the predictive category. Rapid
//! improvement (e.g. overcorrection after maintenance) is deliberately left
//! unpenalized.

pub mod trend;

use crate::config::{CategoryWeights, Thresholds, WindowSettings};
use crate::core::{CategoryIssues, HealthScore, RelayState, Snapshot, StatusBand};
use crate::data::RollingWindow;

/// Score and issue list for a single category.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoryScore {
    pub score: f64,
    pub issues: Vec<String>,
}

impl CategoryScore {
    fn full() -> Self {
        Self {
            score: 100.0,
            issues: Vec::new(),
        }
    }

    fn no_data(issue: &str) -> Self {
        Self {
            score: 0.0,
            issues: vec![issue.to_string()],
        }
    }

    fn penalize(&mut self, points: f64, issue: String) {
        self.score = (self.score - points).max(0.0);
        self.issues.push(issue);
    }
}

/// Electrical health: supply voltage band and motor load point.
pub fn electrical(snapshot: &Snapshot, th: &Thresholds) -> CategoryScore {
    let voltage = snapshot.voltage_v();
    let current = snapshot.current_a;
    if voltage.is_none() && current.is_none() {
        return CategoryScore::no_data("No electrical data available");
    }

    let mut score = CategoryScore::full();

    if let Some(v) = voltage {
        if v < th.voltage_min_critical_v {
            score.penalize(60.0, format!("Critical undervoltage: {v:.1}V"));
        } else if v < th.voltage_min_warning_v {
            score.penalize(20.0, format!("Low voltage: {v:.1}V"));
        } else if v > th.voltage_max_critical_v {
            score.penalize(60.0, format!("Critical overvoltage: {v:.1}V"));
        } else if v > th.voltage_max_warning_v {
            score.penalize(20.0, format!("High voltage: {v:.1}V"));
        }
    }

    if let Some(a) = current {
        if a < th.current_min_warning_a {
            // An underloaded motor usually means a disengaged or miswired load.
            score.penalize(30.0, format!("Motor underloaded: {a:.1}A"));
        } else if a > th.current_max_critical_a {
            score.penalize(75.0, format!("Critical overcurrent: {a:.1}A"));
        } else if a > th.current_max_warning_a {
            score.penalize(25.0, format!("Motor overloaded: {a:.1}A"));
        }
    }

    score
}

/// Thermal health: motor temperature scaled against ambient conditions.
pub fn thermal(snapshot: &Snapshot, th: &Thresholds) -> CategoryScore {
    let motor_temp = snapshot.motor_temp_c;
    let ambient = snapshot.ambient_temp_c;
    let humidity = snapshot.humidity_pct;
    if motor_temp.is_none() && ambient.is_none() {
        return CategoryScore::no_data("No thermal data available");
    }

    let mut score = CategoryScore::full();

    // A given motor temperature is worse when the surrounding air is already
    // hot and humid: the combined heat index scales the motor penalties.
    let heat_stress = snapshot
        .heat_index_c
        .or(ambient)
        .map(|hi| hi > th.ambient_temp_max_critical_c)
        .unwrap_or(false);
    let scale = if heat_stress { th.heat_stress_factor } else { 1.0 };

    if let Some(t) = motor_temp {
        if t > th.motor_temp_critical_c {
            score.penalize(95.0 * scale, format!("Critical motor temperature: {t:.1}°C"));
        } else if t > th.motor_temp_warning_c {
            score.penalize(45.0 * scale, format!("High motor temperature: {t:.1}°C"));
        } else if t > th.motor_temp_good_c {
            score.penalize(15.0 * scale, format!("Elevated motor temperature: {t:.1}°C"));
        }
    }

    if let Some(t) = ambient {
        if t > th.ambient_temp_max_critical_c {
            score.penalize(40.0, format!("Critical ambient temperature: {t:.1}°C"));
        } else if t > th.ambient_temp_max_warning_c {
            score.penalize(15.0, format!("High ambient temperature: {t:.1}°C"));
        }
    }

    if let Some(h) = humidity {
        if h > th.humidity_max_critical_pct {
            score.penalize(30.0, format!("Critical humidity: {h:.1}%"));
        } else if h > th.humidity_max_warning_pct {
            score.penalize(10.0, format!("High humidity: {h:.1}%"));
        } else if h < th.humidity_min_warning_pct {
            score.penalize(5.0, format!("Low humidity: {h:.1}%"));
        }
    }

    score
}

/// Mechanical health: rpm band, load balance, relay consistency.
pub fn mechanical(snapshot: &Snapshot, th: &Thresholds) -> CategoryScore {
    let Some(rpm) = snapshot.rpm else {
        return CategoryScore::no_data("No RPM data available");
    };

    let mut score = CategoryScore::full();

    if rpm < th.rpm_min_critical {
        score.penalize(80.0, format!("Critical low RPM: {rpm:.0}"));
    } else if rpm < th.rpm_min_warning {
        score.penalize(30.0, format!("Low RPM: {rpm:.0}"));
    } else if rpm > th.rpm_max_critical {
        score.penalize(80.0, format!("Critical high RPM: {rpm:.0}"));
    } else if rpm > th.rpm_max_warning {
        score.penalize(30.0, format!("High RPM: {rpm:.0}"));
    }

    // Load balance: current should track rpm proportionally.
    if let Some(current) = snapshot.current_a {
        if rpm > 0.0 {
            let expected = (rpm / th.optimal_rpm) * th.optimal_current_a;
            if expected > 0.0 {
                let deviation = (current - expected).abs() / expected;
                if deviation > 0.5 {
                    score.penalize(
                        20.0,
                        format!("Current/RPM imbalance: {current:.1}A at {rpm:.0} RPM"),
                    );
                }
            }
        }
    }

    // The protection relay engaging while speed and load look nominal points
    // at a relay or wiring fault rather than a real trip condition.
    let nominal_rpm = rpm >= th.rpm_min_warning && rpm <= th.rpm_max_warning;
    let nominal_current = snapshot
        .current_a
        .map(|a| a >= th.current_optimal_min_a && a <= th.current_optimal_max_a)
        .unwrap_or(false);
    if snapshot.relays[2] == RelayState::Closed && nominal_rpm && nominal_current {
        score.penalize(15.0, "Protection relay engaged during nominal operation".into());
    }

    score
}

/// Predictive health: sustained unfavorable trends over the rolling window.
pub fn predictive(window: &RollingWindow, th: &Thresholds, ws: &WindowSettings) -> CategoryScore {
    let min = ws.min_trend_samples;
    if window.len() < min {
        let mut score = CategoryScore::full();
        score
            .issues
            .push("Insufficient history for trend analysis".to_string());
        return score;
    }

    let mut score = CategoryScore::full();

    let temps = window.tail_values(10, |s| s.motor_temp_c);
    if temps.len() >= min {
        if let Some(slope) = trend::slope(&temps) {
            if slope > th.temp_slope_limit {
                score.penalize(
                    30.0,
                    format!("Rising motor temperature trend: +{slope:.1}°C/reading"),
                );
            }
        }
    }

    let currents = window.tail_values(10, |s| s.current_a);
    if currents.len() >= min {
        if let Some(slope) = trend::slope(&currents) {
            if slope.abs() > th.current_slope_limit {
                score.penalize(
                    25.0,
                    format!("Current instability: ±{:.1}A/reading", slope.abs()),
                );
            }
        }
    }

    let health = window.tail_values(20, |s| Some(s.overall_score));
    if health.len() >= min * 2 {
        if let Some(slope) = trend::slope(&health) {
            if slope < th.health_slope_limit {
                score.penalize(
                    35.0,
                    format!("Health degradation: {slope:.1} points/reading"),
                );
            }
        }
    }

    score
}

/// Motor efficiency estimate: rpm efficiency and power efficiency averaged.
///
/// Reported alongside the health score but not part of it.
pub fn efficiency(snapshot: &Snapshot, th: &Thresholds) -> f64 {
    let (Some(voltage), Some(current), Some(rpm)) =
        (snapshot.voltage_v(), snapshot.current_a, snapshot.rpm)
    else {
        return 0.0;
    };
    if voltage <= 0.0 || current <= 0.0 || rpm <= 0.0 {
        return 0.0;
    }

    let rpm_efficiency = (rpm / th.optimal_rpm * 100.0).min(100.0);
    let actual_power = voltage * current / 1000.0;
    let theoretical_power = th.optimal_voltage_v * th.optimal_current_a / 1000.0;
    let power_efficiency = (theoretical_power / actual_power * 100.0).min(100.0);

    ((rpm_efficiency + power_efficiency) / 2.0).clamp(0.0, 100.0)
}

/// Instantaneous power draw in kW, when voltage and current are both known.
pub fn power_kw(snapshot: &Snapshot) -> Option<f64> {
    let voltage = snapshot.voltage_v()?;
    let current = snapshot.current_a?;
    Some(voltage * current / 1000.0)
}

/// Full assessment of the fused snapshot against the rolling history.
pub fn assess(
    snapshot: &Snapshot,
    window: &RollingWindow,
    weights: &CategoryWeights,
    th: &Thresholds,
    ws: &WindowSettings,
) -> HealthScore {
    let electrical = electrical(snapshot, th);
    let thermal = thermal(snapshot, th);
    let mechanical = mechanical(snapshot, th);
    let predictive = predictive(window, th, ws);

    let overall = (electrical.score * weights.electrical
        + thermal.score * weights.thermal
        + mechanical.score * weights.mechanical
        + predictive.score * weights.predictive)
        .clamp(0.0, 100.0);

    HealthScore {
        timestamp: snapshot.updated_at.unwrap_or_else(chrono::Utc::now),
        electrical: electrical.score,
        thermal: thermal.score,
        mechanical: mechanical.score,
        predictive: predictive.score,
        overall,
        band: StatusBand::from_score(overall),
        efficiency: efficiency(snapshot, th),
        power_kw: power_kw(snapshot),
        issues: CategoryIssues {
            electrical: electrical.issues,
            thermal: thermal.issues,
            mechanical: mechanical.issues,
            predictive: predictive.issues,
        },
    }
}

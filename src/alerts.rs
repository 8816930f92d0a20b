//! Recommendation and alert engine.
//!
//! Alert generation is rule-driven: an ordered list of declarative rule
//! records, each a (category, root cause, predicate) triple, evaluated
//! uniformly against the latest health score and anomaly verdict. Tests can
//! add or remove rules without touching any control flow.
//!
//! Lifecycle per root cause: `NONE → ACTIVE → ACKNOWLEDGED`. Raising an
//! alert whose (category, root cause) already has an active alert updates
//! that alert in place (message, confidence, timestamp) instead of
//! creating a duplicate. Acknowledgment is idempotent. Alerts are archived
//! forever, never deleted.
//!
//! Connectivity alerts are raised directly by the coordinator on liveness
//! transitions (they are edge-triggered, not level-triggered like the
//! score rules) through the same deduplicating [`AlertEngine::raise`] path.

use crate::core::{
    AlertCategory, AnomalyVerdict, EventKind, HealthScore, MaintenanceAlert, Severity, SystemEvent,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Everything a rule predicate may inspect.
pub struct RuleContext<'a> {
    pub health: &'a HealthScore,
    pub verdict: &'a AnomalyVerdict,
    /// Stricter secondary threshold for anomaly-driven alerts.
    pub anomaly_alert_score: f64,
}

/// What a matched rule wants raised.
pub struct RuleOutcome {
    pub severity: Severity,
    pub message: String,
    pub recommended_action: String,
    pub confidence: f64,
}

/// A declarative alert rule.
pub struct AlertRule {
    pub category: AlertCategory,
    pub root_cause: &'static str,
    pub evaluate: fn(&RuleContext) -> Option<RuleOutcome>,
}

/// The built-in rule set, ordered Critical-first within each category.
/// The first matching rule per category wins; other categories are still
/// evaluated.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            category: AlertCategory::Health,
            root_cause: "overall_critical",
            evaluate: |ctx| {
                (ctx.health.overall < 60.0).then(|| RuleOutcome {
                    severity: Severity::Critical,
                    message: format!(
                        "Overall health {:.1}% - worst category: {}",
                        ctx.health.overall,
                        ctx.health.weakest_category()
                    ),
                    recommended_action: "Stop motor operation and perform immediate inspection"
                        .into(),
                    confidence: 0.95,
                })
            },
        },
        AlertRule {
            category: AlertCategory::Electrical,
            root_cause: "electrical_degraded",
            evaluate: |ctx| {
                (ctx.health.electrical < 60.0 && ctx.health.overall >= 60.0).then(|| RuleOutcome {
                    severity: Severity::Warning,
                    message: category_message("Electrical", ctx.health.electrical, &ctx.health.issues.electrical),
                    recommended_action:
                        "Check motor connections, measure voltage and current with a multimeter"
                            .into(),
                    confidence: 0.8,
                })
            },
        },
        AlertRule {
            category: AlertCategory::Thermal,
            root_cause: "thermal_degraded",
            evaluate: |ctx| {
                (ctx.health.thermal < 60.0 && ctx.health.overall >= 60.0).then(|| RuleOutcome {
                    severity: Severity::Warning,
                    message: category_message("Thermal", ctx.health.thermal, &ctx.health.issues.thermal),
                    recommended_action: "Improve ventilation and check the cooling system".into(),
                    confidence: 0.85,
                })
            },
        },
        AlertRule {
            category: AlertCategory::Mechanical,
            root_cause: "mechanical_degraded",
            evaluate: |ctx| {
                (ctx.health.mechanical < 60.0 && ctx.health.overall >= 60.0).then(|| RuleOutcome {
                    severity: Severity::Warning,
                    message: category_message("Mechanical", ctx.health.mechanical, &ctx.health.issues.mechanical),
                    recommended_action: "Inspect bearings and check coupling alignment".into(),
                    confidence: 0.8,
                })
            },
        },
        AlertRule {
            category: AlertCategory::Predictive,
            root_cause: "predictive_degraded",
            evaluate: |ctx| {
                (ctx.health.predictive < 60.0 && ctx.health.overall >= 60.0).then(|| RuleOutcome {
                    severity: Severity::Warning,
                    message: category_message("Predictive", ctx.health.predictive, &ctx.health.issues.predictive),
                    recommended_action: "Schedule preventive maintenance within the next 7 days"
                        .into(),
                    confidence: 0.75,
                })
            },
        },
        AlertRule {
            category: AlertCategory::Anomaly,
            root_cause: "sensor_anomaly",
            evaluate: |ctx| {
                if !(ctx.verdict.is_anomaly && ctx.verdict.score >= ctx.anomaly_alert_score) {
                    return None;
                }
                // Escalate when an anomaly coincides with a degraded category.
                let degraded = ctx.health.electrical < 60.0
                    || ctx.health.thermal < 60.0
                    || ctx.health.mechanical < 60.0
                    || ctx.health.predictive < 60.0;
                let top = ctx
                    .verdict
                    .contributing_features
                    .first()
                    .map(|f| f.name)
                    .unwrap_or("unknown");
                Some(RuleOutcome {
                    severity: if degraded { Severity::Critical } else { Severity::Warning },
                    message: format!(
                        "Sensor pattern anomaly (score {:.2}), dominated by {top}",
                        ctx.verdict.score
                    ),
                    recommended_action: "Cross-check sensor wiring and recent operating changes"
                        .into(),
                    confidence: ctx.verdict.score,
                })
            },
        },
    ]
}

fn category_message(label: &str, score: f64, issues: &[String]) -> String {
    match issues.first() {
        Some(issue) => format!("{label} health {score:.1}%: {issue}"),
        None => format!("{label} health {score:.1}% - below acceptable range"),
    }
}

/// Result of an acknowledgment attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum AckOutcome {
    /// First acknowledgment; carries the updated alert for persistence.
    Acknowledged(MaintenanceAlert),
    /// Alert was already acknowledged; a no-op success.
    AlreadyAcknowledged,
    NotFound,
}

/// Batch of alert changes produced by one evaluation cycle.
#[derive(Clone, Debug, Default)]
pub struct AlertBatch {
    /// Newly created or updated-in-place alerts, to be upserted by id.
    pub changed: Vec<MaintenanceAlert>,
}

/// Owns alert state and enforces the dedup invariant.
pub struct AlertEngine {
    rules: Vec<AlertRule>,
    /// All alerts ever raised, by id. Never pruned.
    alerts: HashMap<Uuid, MaintenanceAlert>,
    /// Active (unacknowledged) alert per (category, root cause).
    active: HashMap<(AlertCategory, String), Uuid>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            alerts: HashMap::new(),
            active: HashMap::new(),
        }
    }

    /// Evaluates the rule set, raising or refreshing alerts. The first
    /// matching rule per category wins without suppressing other categories.
    pub fn evaluate(&mut self, ctx: &RuleContext<'_>, now: DateTime<Utc>) -> AlertBatch {
        let mut batch = AlertBatch::default();
        let mut matched: Vec<(AlertCategory, &'static str, RuleOutcome)> = Vec::new();
        for rule in &self.rules {
            if matched.iter().any(|(category, _, _)| *category == rule.category) {
                continue;
            }
            if let Some(outcome) = (rule.evaluate)(ctx) {
                matched.push((rule.category, rule.root_cause, outcome));
            }
        }
        for (category, root_cause, outcome) in matched {
            let alert = self.raise(category, root_cause, outcome, now);
            batch.changed.push(alert);
        }
        batch
    }

    /// Raises an alert, deduplicating against the active alert for the same
    /// (category, root cause): an existing active alert is updated in place.
    pub fn raise(
        &mut self,
        category: AlertCategory,
        root_cause: &str,
        outcome: RuleOutcome,
        now: DateTime<Utc>,
    ) -> MaintenanceAlert {
        let key = (category, root_cause.to_string());
        if let Some(id) = self.active.get(&key) {
            if let Some(alert) = self.alerts.get_mut(id) {
                alert.severity = outcome.severity;
                alert.message = outcome.message;
                alert.recommended_action = outcome.recommended_action;
                alert.confidence = outcome.confidence;
                alert.updated_at = now;
                return alert.clone();
            }
        }
        let alert = MaintenanceAlert {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            category,
            root_cause: root_cause.to_string(),
            severity: outcome.severity,
            message: outcome.message,
            recommended_action: outcome.recommended_action,
            confidence: outcome.confidence,
            acknowledged: false,
            acknowledged_at: None,
        };
        self.active.insert(key, alert.id);
        self.alerts.insert(alert.id, alert.clone());
        alert
    }

    /// Acknowledges an alert by id. Idempotent: a second acknowledgment is a
    /// no-op success and produces no event.
    pub fn acknowledge(&mut self, id: Uuid, now: DateTime<Utc>) -> (AckOutcome, Option<SystemEvent>) {
        let Some(alert) = self.alerts.get_mut(&id) else {
            return (AckOutcome::NotFound, None);
        };
        if alert.acknowledged {
            return (AckOutcome::AlreadyAcknowledged, None);
        }
        alert.acknowledged = true;
        alert.acknowledged_at = Some(now);
        alert.updated_at = now;
        let key = (alert.category, alert.root_cause.clone());
        self.active.remove(&key);
        let event = SystemEvent::new(
            EventKind::AlertAcknowledged,
            now,
            format!("alert {} ({}/{}) acknowledged", alert.id, alert.category, alert.root_cause),
        );
        (AckOutcome::Acknowledged(alert.clone()), Some(event))
    }

    /// Acknowledges the active alert for a (category, root cause), if any.
    /// Used by the coordinator to auto-clear connectivity alerts on recovery.
    pub fn acknowledge_root_cause(
        &mut self,
        category: AlertCategory,
        root_cause: &str,
        now: DateTime<Utc>,
    ) -> Option<(MaintenanceAlert, SystemEvent)> {
        let id = *self.active.get(&(category, root_cause.to_string()))?;
        match self.acknowledge(id, now) {
            (AckOutcome::Acknowledged(alert), Some(event)) => Some((alert, event)),
            _ => None,
        }
    }

    /// All currently active (unacknowledged) alerts, newest update first.
    pub fn active_alerts(&self) -> Vec<MaintenanceAlert> {
        let mut alerts: Vec<_> = self
            .active
            .values()
            .filter_map(|id| self.alerts.get(id).cloned())
            .collect();
        alerts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.severity.cmp(&a.severity)));
        alerts
    }

    /// Count of active alerts per invariant checks.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CategoryIssues, StatusBand};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
    }

    fn health(electrical: f64, thermal: f64, mechanical: f64, predictive: f64) -> HealthScore {
        let overall = electrical * 0.30 + thermal * 0.35 + mechanical * 0.25 + predictive * 0.10;
        HealthScore {
            timestamp: at(0),
            electrical,
            thermal,
            mechanical,
            predictive,
            overall,
            band: StatusBand::from_score(overall),
            efficiency: 90.0,
            power_kw: Some(0.15),
            issues: CategoryIssues::default(),
        }
    }

    fn quiet_verdict() -> AnomalyVerdict {
        AnomalyVerdict::insufficient_history(at(0))
    }

    fn ctx<'a>(health: &'a HealthScore, verdict: &'a AnomalyVerdict) -> RuleContext<'a> {
        RuleContext {
            health,
            verdict,
            anomaly_alert_score: 0.75,
        }
    }

    #[test]
    fn test_healthy_system_raises_nothing() {
        let mut engine = AlertEngine::new(default_rules());
        let h = health(100.0, 100.0, 100.0, 100.0);
        let v = quiet_verdict();
        let batch = engine.evaluate(&ctx(&h, &v), at(0));
        assert!(batch.changed.is_empty());
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn test_critical_overall_names_weakest_category() {
        let mut engine = AlertEngine::new(default_rules());
        let h = health(30.0, 20.0, 90.0, 100.0);
        let v = quiet_verdict();
        let batch = engine.evaluate(&ctx(&h, &v), at(0));
        let alert = batch
            .changed
            .iter()
            .find(|a| a.category == AlertCategory::Health)
            .expect("health alert");
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.message.contains("thermal"));
    }

    #[test]
    fn test_degraded_category_raises_warning_when_overall_ok() {
        let mut engine = AlertEngine::new(default_rules());
        let h = health(100.0, 50.0, 100.0, 100.0);
        assert!(h.overall >= 60.0);
        let v = quiet_verdict();
        let batch = engine.evaluate(&ctx(&h, &v), at(0));
        assert_eq!(batch.changed.len(), 1);
        assert_eq!(batch.changed[0].category, AlertCategory::Thermal);
        assert_eq!(batch.changed[0].severity, Severity::Warning);
    }

    #[test]
    fn test_repeated_evaluation_updates_in_place() {
        let mut engine = AlertEngine::new(default_rules());
        let v = quiet_verdict();

        let h1 = health(100.0, 50.0, 100.0, 100.0);
        let first = engine.evaluate(&ctx(&h1, &v), at(0)).changed.remove(0);

        let h2 = health(100.0, 45.0, 100.0, 100.0);
        let second = engine.evaluate(&ctx(&h2, &v), at(30)).changed.remove(0);

        // Same alert row, refreshed; no duplicate active alert.
        assert_eq!(first.id, second.id);
        assert_eq!(second.updated_at, at(30));
        assert_eq!(engine.active_count(), 1);
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let mut engine = AlertEngine::new(default_rules());
        let h = health(100.0, 50.0, 100.0, 100.0);
        let v = quiet_verdict();
        let alert = engine.evaluate(&ctx(&h, &v), at(0)).changed.remove(0);

        let (first, event) = engine.acknowledge(alert.id, at(60));
        assert!(matches!(first, AckOutcome::Acknowledged(_)));
        assert!(event.is_some());

        let (second, event) = engine.acknowledge(alert.id, at(61));
        assert_eq!(second, AckOutcome::AlreadyAcknowledged);
        assert!(event.is_none());
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn test_reraise_after_acknowledge_creates_new_alert() {
        let mut engine = AlertEngine::new(default_rules());
        let h = health(100.0, 50.0, 100.0, 100.0);
        let v = quiet_verdict();
        let first = engine.evaluate(&ctx(&h, &v), at(0)).changed.remove(0);
        engine.acknowledge(first.id, at(60));

        let second = engine.evaluate(&ctx(&h, &v), at(120)).changed.remove(0);
        assert_ne!(first.id, second.id);
        assert_eq!(engine.active_count(), 1);
    }

    #[test]
    fn test_anomaly_rule_escalates_with_degraded_category() {
        let mut engine = AlertEngine::new(default_rules());
        let verdict = AnomalyVerdict {
            timestamp: at(0),
            is_anomaly: true,
            score: 0.9,
            contributing_features: vec![],
        };

        let healthy = health(100.0, 100.0, 100.0, 100.0);
        let batch = engine.evaluate(&ctx(&healthy, &verdict), at(0));
        let anomaly = batch
            .changed
            .iter()
            .find(|a| a.category == AlertCategory::Anomaly)
            .expect("anomaly alert");
        assert_eq!(anomaly.severity, Severity::Warning);
        assert!((anomaly.confidence - 0.9).abs() < 1e-12);

        let degraded = health(100.0, 50.0, 100.0, 100.0);
        let batch = engine.evaluate(&ctx(&degraded, &verdict), at(30));
        let anomaly = batch
            .changed
            .iter()
            .find(|a| a.category == AlertCategory::Anomaly)
            .expect("anomaly alert");
        assert_eq!(anomaly.severity, Severity::Critical);
    }

    #[test]
    fn test_anomaly_below_alert_score_is_silent() {
        let mut engine = AlertEngine::new(default_rules());
        let verdict = AnomalyVerdict {
            timestamp: at(0),
            is_anomaly: true,
            score: 0.6, // flagged, but under the stricter alert threshold
            contributing_features: vec![],
        };
        let h = health(100.0, 100.0, 100.0, 100.0);
        let batch = engine.evaluate(&ctx(&h, &verdict), at(0));
        assert!(batch.changed.is_empty());
    }

    #[test]
    fn test_auto_ack_by_root_cause() {
        let mut engine = AlertEngine::new(default_rules());
        engine.raise(
            AlertCategory::Connectivity,
            "esp_lost",
            RuleOutcome {
                severity: Severity::Critical,
                message: "ESP feed lost".into(),
                recommended_action: "Check ESP power and network".into(),
                confidence: 1.0,
            },
            at(0),
        );
        assert_eq!(engine.active_count(), 1);

        let (alert, _event) = engine
            .acknowledge_root_cause(AlertCategory::Connectivity, "esp_lost", at(30))
            .expect("active connectivity alert");
        assert!(alert.acknowledged);
        assert_eq!(engine.active_count(), 0);
        // Nothing active left to auto-ack.
        assert!(engine
            .acknowledge_root_cause(AlertCategory::Connectivity, "esp_lost", at(31))
            .is_none());
    }

    #[test]
    fn test_no_duplicate_active_alerts_invariant() {
        let mut engine = AlertEngine::new(default_rules());
        let v = quiet_verdict();
        for i in 0..20 {
            let h = health(100.0, 40.0 + (i % 5) as f64, 100.0, 100.0);
            engine.evaluate(&ctx(&h, &v), at(i));
        }
        assert_eq!(engine.active_count(), 1);
    }
}

//! Per-source connection liveness tracking.
//!
//! Each source owns a small state machine: `Connected` while readings keep
//! arriving, `Degraded` once its timeout elapses, `Lost` past a harder
//! ceiling (`lost_multiple` times the timeout). Arrivals always transition
//! straight back to `Connected`.
//!
//! Sources start out `Lost` with no `last_seen_at`, and the sweep skips
//! sources that have never been seen: startup silence does not raise a
//! connectivity alert; only an observed drop-out does.
//!
//! Transitions that do not change state have no side effects, so repeated
//! sweeps while a source stays lost cannot spam alerts.

use crate::config::SourceSettings;
use crate::core::SourceId;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Connectivity state of a source, distinct from asset health.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessState {
    Connected,
    Degraded,
    Lost,
}

/// Liveness record for one source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceLiveness {
    pub source: SourceId,
    pub state: LivenessState,
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Silence past this duration degrades the source.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// A state change produced by an arrival or a sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LivenessTransition {
    /// The source came back after being degraded or lost.
    Restored { source: SourceId, was_lost: bool },
    Degraded { source: SourceId },
    Lost { source: SourceId },
}

/// Tracks liveness for both sources.
///
/// Owned by the coordinator; all mutation happens on arrival or during the
/// periodic sweep, never concurrently.
#[derive(Clone, Debug)]
pub struct LivenessMonitor {
    sources: HashMap<SourceId, SourceLiveness>,
    lost_multiple: f64,
}

impl LivenessMonitor {
    pub fn new(settings: &SourceSettings) -> Self {
        let mut sources = HashMap::new();
        for (source, timeout) in [
            (SourceId::Esp, settings.push_timeout()),
            (SourceId::Plc, settings.poll_timeout()),
        ] {
            sources.insert(
                source,
                SourceLiveness {
                    source,
                    state: LivenessState::Lost,
                    last_seen_at: None,
                    timeout,
                },
            );
        }
        Self {
            sources,
            lost_multiple: settings.lost_multiple,
        }
    }

    /// Records a reading arrival. Returns a transition only when the state
    /// actually changed.
    pub fn record_arrival(
        &mut self,
        source: SourceId,
        at: DateTime<Utc>,
    ) -> Option<LivenessTransition> {
        let entry = self.sources.get_mut(&source)?;
        let previous = entry.state;
        let was_first = entry.last_seen_at.is_none();
        entry.last_seen_at = Some(at);
        entry.state = LivenessState::Connected;
        match previous {
            LivenessState::Connected => None,
            // A source that was never seen is "lost" only nominally; its
            // first arrival is not a recovery.
            LivenessState::Lost if was_first => None,
            LivenessState::Lost => Some(LivenessTransition::Restored { source, was_lost: true }),
            LivenessState::Degraded => Some(LivenessTransition::Restored { source, was_lost: false }),
        }
    }

    /// Periodic liveness check. Returns transitions for sources whose silence
    /// crossed a tier boundary since the last sweep.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<LivenessTransition> {
        let mut transitions = Vec::new();
        let lost_multiple = self.lost_multiple;
        for entry in self.sources.values_mut() {
            let Some(last_seen) = entry.last_seen_at else {
                continue;
            };
            let silence = now.signed_duration_since(last_seen);
            let timeout = ChronoDuration::from_std(entry.timeout).unwrap_or(ChronoDuration::MAX);
            let ceiling_secs = entry.timeout.as_secs_f64() * lost_multiple;
            let past_ceiling = silence.num_milliseconds() as f64 / 1000.0 > ceiling_secs;

            let next = if past_ceiling {
                LivenessState::Lost
            } else if silence > timeout {
                LivenessState::Degraded
            } else {
                LivenessState::Connected
            };

            if next == entry.state {
                continue;
            }
            // Sweeps only ever move away from Connected; recovery is driven
            // by arrivals.
            match (entry.state, next) {
                (LivenessState::Connected, LivenessState::Degraded) => {
                    entry.state = next;
                    transitions.push(LivenessTransition::Degraded { source: entry.source });
                }
                (LivenessState::Connected | LivenessState::Degraded, LivenessState::Lost) => {
                    entry.state = next;
                    transitions.push(LivenessTransition::Lost { source: entry.source });
                }
                _ => {}
            }
        }
        transitions
    }

    pub fn state(&self, source: SourceId) -> LivenessState {
        self.sources
            .get(&source)
            .map(|s| s.state)
            .unwrap_or(LivenessState::Lost)
    }

    /// Current liveness of all sources, for status publication.
    pub fn statuses(&self) -> Vec<SourceLiveness> {
        let mut statuses: Vec<_> = self.sources.values().cloned().collect();
        statuses.sort_by_key(|s| s.source as u8);
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn monitor() -> LivenessMonitor {
        LivenessMonitor::new(&SourceSettings::default())
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn test_first_arrival_is_not_a_recovery() {
        let mut m = monitor();
        assert_eq!(m.record_arrival(SourceId::Esp, at(0)), None);
        assert_eq!(m.state(SourceId::Esp), LivenessState::Connected);
    }

    #[test]
    fn test_sweep_just_under_threshold_stays_connected() {
        let mut m = monitor();
        m.record_arrival(SourceId::Esp, at(0));
        // Push timeout is 30 s; 29 s of silence is fine.
        assert!(m.sweep(at(29)).is_empty());
        assert_eq!(m.state(SourceId::Esp), LivenessState::Connected);
    }

    #[test]
    fn test_sweep_past_threshold_degrades_then_loses() {
        let mut m = monitor();
        m.record_arrival(SourceId::Esp, at(0));

        let transitions = m.sweep(at(31));
        assert_eq!(
            transitions,
            vec![LivenessTransition::Degraded { source: SourceId::Esp }]
        );

        // Still degraded: no repeated transition.
        assert!(m.sweep(at(45)).is_empty());

        // Past the 2x ceiling: lost, exactly once.
        let transitions = m.sweep(at(61));
        assert_eq!(
            transitions,
            vec![LivenessTransition::Lost { source: SourceId::Esp }]
        );
        assert!(m.sweep(at(120)).is_empty());
        assert_eq!(m.state(SourceId::Esp), LivenessState::Lost);
    }

    #[test]
    fn test_arrival_restores_lost_source() {
        let mut m = monitor();
        m.record_arrival(SourceId::Esp, at(0));
        m.sweep(at(31));
        m.sweep(at(61));
        assert_eq!(m.state(SourceId::Esp), LivenessState::Lost);

        let transition = m.record_arrival(SourceId::Esp, at(90));
        assert_eq!(
            transition,
            Some(LivenessTransition::Restored { source: SourceId::Esp, was_lost: true })
        );
        assert_eq!(m.state(SourceId::Esp), LivenessState::Connected);
    }

    #[test]
    fn test_sources_have_independent_timeouts() {
        let mut m = monitor();
        m.record_arrival(SourceId::Esp, at(0));
        m.record_arrival(SourceId::Plc, at(0));

        // 31 s: past the push timeout, under the 60 s poll timeout.
        let transitions = m.sweep(at(31));
        assert_eq!(transitions.len(), 1);
        assert_eq!(
            transitions[0],
            LivenessTransition::Degraded { source: SourceId::Esp }
        );
        assert_eq!(m.state(SourceId::Plc), LivenessState::Connected);
    }

    #[test]
    fn test_never_seen_source_never_alerts() {
        let mut m = monitor();
        assert!(m.sweep(at(3600)).is_empty());
        assert_eq!(m.state(SourceId::Plc), LivenessState::Lost);
    }

    #[test]
    fn test_connected_straight_to_lost_when_sweep_is_late() {
        let mut m = monitor();
        m.record_arrival(SourceId::Esp, at(0));
        // A single late sweep far past the ceiling reports Lost, not Degraded.
        let transitions = m.sweep(at(500));
        assert_eq!(
            transitions,
            vec![LivenessTransition::Lost { source: SourceId::Esp }]
        );
    }
}

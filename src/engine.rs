//! Coordinator actor for the monitoring pipeline.
//!
//! All mutable pipeline state (the fused snapshot, the rolling window, the
//! liveness map, the alert engine, the anomaly model) lives in a single
//! async task that processes commands via message-passing. The two input
//! cadences (push-paced ESP ingests, engine-paced PLC polls) enqueue into
//! the same mailbox and never block each other; the periodic liveness sweep
//! and model refit run as timer arms of the same select loop, never nested
//! inside ingest handling.
//!
//! # Pipeline
//!
//! ```text
//! ingest -> liveness update -> normalize -> fuse snapshot -> score
//!        -> anomaly check -> alert rules -> persist unit (bounded retry)
//!        -> publish fan-out
//! ```
//!
//! Persistence of a unit either fully succeeds or the whole unit is retried;
//! publish happens only after a successful persist. Units that exhaust their
//! retry budget are parked in a bounded overflow buffer and drained on the
//! next successful store write; the oldest parked unit is dropped (and
//! logged) when the buffer itself overflows.
//!
//! Shutdown drains the command in flight, flushes the store, and stops the
//! timers before the task exits.

use crate::alerts::{AlertEngine, RuleContext, RuleOutcome};
use crate::anomaly::{self, AnomalyDetector};
use crate::config::Settings;
use crate::core::{
    AlertCategory, AlertFilter, EventKind, HealthScore, MaintenanceAlert, PipelineUnit, RawPayload,
    Severity, Snapshot, SourceId, SystemEvent, UnitStore,
};
use crate::data::{RollingWindow, WindowSample};
use crate::error::{AppResult, MonitorError};
use crate::liveness::{LivenessMonitor, LivenessTransition};
use crate::messages::{EngineCommand, EngineStatus};
use crate::normalize::Normalizer;
use crate::publish::{Update, UpdatePublisher};
use crate::scoring;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Mailbox depth in front of the actor. Push and poll ingests queue here
/// independently of whatever the pipeline is currently doing.
const MAILBOX_CAPACITY: usize = 256;

/// Cloneable handle for talking to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    async fn send<T>(
        &self,
        command: EngineCommand,
        rx: oneshot::Receiver<T>,
    ) -> AppResult<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| MonitorError::EngineClosed)?;
        rx.await.map_err(|_| MonitorError::EngineClosed)
    }

    /// Feeds one raw payload through the pipeline.
    pub async fn ingest(&self, payload: RawPayload, received_at: DateTime<Utc>) -> AppResult<()> {
        let (cmd, rx) = EngineCommand::ingest(payload, received_at);
        self.send(cmd, rx).await?
    }

    /// Acknowledges an alert; `Ok(true)` when the alert exists.
    pub async fn acknowledge(&self, alert_id: Uuid) -> AppResult<bool> {
        let (cmd, rx) = EngineCommand::acknowledge(alert_id);
        self.send(cmd, rx).await?
    }

    pub async fn query_recent(&self, max: usize) -> AppResult<Vec<PipelineUnit>> {
        let (cmd, rx) = EngineCommand::query_recent(max);
        self.send(cmd, rx).await?
    }

    pub async fn query_alerts(&self, filter: AlertFilter) -> AppResult<Vec<MaintenanceAlert>> {
        let (cmd, rx) = EngineCommand::query_alerts(filter);
        self.send(cmd, rx).await?
    }

    pub async fn status(&self) -> AppResult<EngineStatus> {
        let (cmd, rx) = EngineCommand::status();
        self.send(cmd, rx).await
    }

    pub async fn subscribe(
        &self,
    ) -> AppResult<tokio::sync::broadcast::Receiver<Update>> {
        let (cmd, rx) = EngineCommand::subscribe();
        self.send(cmd, rx).await
    }

    /// Records an operator command in the audit trail.
    pub async fn manual_command(&self, command: impl Into<String>) -> AppResult<()> {
        let (cmd, rx) = EngineCommand::manual_command(command.into());
        self.send(cmd, rx).await?
    }

    /// Drains in-flight work and stops the engine.
    pub async fn shutdown(&self) -> AppResult<()> {
        let (cmd, rx) = EngineCommand::shutdown();
        self.send(cmd, rx).await
    }
}

/// Spawns the engine actor onto the current runtime.
pub fn spawn(settings: Settings, store: Arc<dyn UnitStore>) -> (EngineHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let engine = MonitorEngine::new(settings, store);
    let task = tokio::spawn(engine.run(rx));
    (EngineHandle { tx }, task)
}

/// The coordinator actor. Owns every piece of shared pipeline state.
pub struct MonitorEngine {
    settings: Settings,
    normalizer: Normalizer,
    liveness: LivenessMonitor,
    window: RollingWindow,
    snapshot: Snapshot,
    detector: AnomalyDetector,
    alert_engine: AlertEngine,
    store: Arc<dyn UnitStore>,
    publisher: UpdatePublisher,
    overflow: VecDeque<PipelineUnit>,
    previous_band: Option<crate::core::StatusBand>,
    latest_health: Option<HealthScore>,
}

impl MonitorEngine {
    pub fn new(settings: Settings, store: Arc<dyn UnitStore>) -> Self {
        let normalizer = Normalizer::new(&settings.normalizer);
        let liveness = LivenessMonitor::new(&settings.sources);
        let window = RollingWindow::new(settings.window.max_samples, settings.window.max_age_secs);
        let detector = AnomalyDetector::new(settings.anomaly.clone());
        let alert_engine = AlertEngine::new(crate::alerts::default_rules());
        let publisher = UpdatePublisher::new(settings.broadcast.channel_capacity);
        Self {
            settings,
            normalizer,
            liveness,
            window,
            snapshot: Snapshot::default(),
            detector,
            alert_engine,
            store,
            publisher,
            overflow: VecDeque::new(),
            previous_band: None,
            latest_health: None,
        }
    }

    /// Runs the actor event loop until shutdown.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<EngineCommand>) {
        info!("monitor engine started");

        let start = tokio::time::Instant::now();
        let sweep_period = self.settings.sources.sweep_interval();
        let refit_period = self.settings.anomaly.refit_interval();
        let mut sweep = tokio::time::interval_at(start + sweep_period, sweep_period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refit = tokio::time::interval_at(start + refit_period, refit_period);
        refit.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_command = command_rx.recv() => {
                    match maybe_command {
                        Some(EngineCommand::Shutdown { response }) => {
                            info!("shutdown command received");
                            self.shutdown().await;
                            let _ = response.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            // Every handle dropped; nothing can reach us.
                            self.shutdown().await;
                            break;
                        }
                    }
                }
                _ = sweep.tick() => self.run_sweep(Utc::now()).await,
                _ = refit.tick() => self.detector.refit(&self.window, Utc::now()),
            }
        }

        info!("monitor engine stopped");
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Ingest { payload, received_at, response } => {
                let result = self.process_reading(payload, received_at).await;
                let _ = response.send(result);
            }
            EngineCommand::Acknowledge { alert_id, response } => {
                let result = self.handle_acknowledge(alert_id).await;
                let _ = response.send(result);
            }
            EngineCommand::QueryRecent { max, response } => {
                let _ = response.send(self.store.query_recent(max).await);
            }
            EngineCommand::QueryAlerts { filter, response } => {
                let _ = response.send(self.store.query_alerts(&filter).await);
            }
            EngineCommand::Status { response } => {
                let _ = response.send(EngineStatus {
                    snapshot: self.snapshot.clone(),
                    latest_health: self.latest_health.clone(),
                    liveness: self.liveness.statuses(),
                    overflow_len: self.overflow.len(),
                });
            }
            EngineCommand::Subscribe { response } => {
                let _ = response.send(self.publisher.subscribe());
            }
            EngineCommand::ManualCommand { command, response } => {
                let event = SystemEvent::new(
                    EventKind::ManualCommand,
                    Utc::now(),
                    format!("manual control command: {command}"),
                );
                info!(command = %command, "manual command logged");
                let result = self.store.append_events(&[event]).await;
                let _ = response.send(result);
            }
            // Shutdown is intercepted by the event loop.
            EngineCommand::Shutdown { response } => {
                let _ = response.send(());
            }
        }
    }

    /// Full pipeline for one raw payload.
    async fn process_reading(
        &mut self,
        payload: RawPayload,
        received_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let source = payload.source();
        let mut events: Vec<SystemEvent> = Vec::new();
        let mut alerts: Vec<MaintenanceAlert> = Vec::new();

        // Liveness first: even a malformed payload proves the link is alive.
        if let Some(transition) = self.liveness.record_arrival(source, received_at) {
            self.apply_transition(transition, received_at, &mut events, &mut alerts);
        }

        let reading = match self.normalizer.normalize(payload, received_at) {
            Ok(reading) => reading,
            Err(err) => {
                warn!(%source, error = %err, "reading rejected, pipeline continues");
                events.push(SystemEvent::new(
                    EventKind::ReadingRejected,
                    received_at,
                    err.to_string(),
                ));
                // Best effort: the audit entry and any liveness side effects
                // must not vanish with the rejected reading.
                if let Err(store_err) = self.store.append_events(&events).await {
                    warn!(error = %store_err, "failed to persist rejection events");
                }
                if !alerts.is_empty() {
                    if let Err(store_err) = self.store.upsert_alerts(&alerts).await {
                        warn!(error = %store_err, "failed to persist liveness alerts");
                    }
                }
                self.publish_status();
                return Err(err);
            }
        };

        self.snapshot.apply(&reading);

        // Score against the history as it stood before this reading.
        let health = scoring::assess(
            &self.snapshot,
            &self.window,
            &self.settings.weights,
            &self.settings.thresholds,
            &self.settings.window,
        );

        if let Some(previous) = self.previous_band {
            if health.band < previous {
                events.push(SystemEvent::new(
                    EventKind::BandCrossing,
                    received_at,
                    format!(
                        "health band {} -> {} (overall {:.1})",
                        previous, health.band, health.overall
                    ),
                ));
            }
        }
        self.previous_band = Some(health.band);

        let features = anomaly::features_of(&self.snapshot);
        let verdict = self.detector.score(&features, self.window.len(), received_at);

        self.window.push(WindowSample::from_snapshot(
            &self.snapshot,
            received_at,
            health.overall,
        ));
        self.detector.observe(&features);
        if self.detector.due_by_count() {
            self.detector.refit(&self.window, received_at);
        }

        let ctx = RuleContext {
            health: &health,
            verdict: &verdict,
            anomaly_alert_score: self.settings.anomaly.alert_score,
        };
        alerts.extend(self.alert_engine.evaluate(&ctx, received_at).changed);

        self.latest_health = Some(health.clone());
        let unit = PipelineUnit {
            reading,
            health,
            verdict,
            alerts,
            events,
        };
        self.persist_unit(unit).await;
        Ok(())
    }

    /// Persists with bounded retry; on success publishes and drains the
    /// overflow buffer, on exhaustion parks the unit.
    async fn persist_unit(&mut self, unit: PipelineUnit) {
        match self.try_persist(&unit).await {
            Ok(()) => {
                self.publish_unit(&unit);
                self.drain_overflow().await;
            }
            Err(err) => {
                error!(error = %err, "persistence retries exhausted, parking unit");
                let now = unit.reading.timestamp;
                let alert = self.alert_engine.raise(
                    AlertCategory::Persistence,
                    "store_unavailable",
                    RuleOutcome {
                        severity: Severity::Critical,
                        message: format!("Pipeline units are not reaching the store: {err}"),
                        recommended_action: "Check the storage backend and its connection".into(),
                        confidence: 1.0,
                    },
                    now,
                );
                // The failure alert and event ride along with the parked
                // unit and reach the store when it recovers.
                let mut unit = unit;
                unit.events.push(SystemEvent::new(
                    EventKind::PersistenceFailure,
                    now,
                    err.to_string(),
                ));
                unit.alerts.push(alert.clone());
                self.publisher.publish(Update::MaintenanceAlert(alert));

                if self.overflow.len() >= self.settings.persistence.overflow_capacity {
                    if let Some(dropped) = self.overflow.pop_front() {
                        warn!(
                            timestamp = %dropped.reading.timestamp,
                            "overflow buffer full, dropping oldest unit"
                        );
                    }
                }
                self.overflow.push_back(unit);
            }
        }
    }

    async fn try_persist(&self, unit: &PipelineUnit) -> AppResult<()> {
        let policy = &self.settings.persistence;
        let mut backoff = policy.backoff();
        let mut last: Option<String> = None;
        for attempt in 1..=policy.max_attempts {
            match tokio::time::timeout(policy.op_timeout(), self.store.append_unit(unit)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => last = Some(err.to_string()),
                Err(_) => last = Some("store write timed out".into()),
            }
            if attempt < policy.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
        Err(MonitorError::RetriesExhausted {
            attempts: policy.max_attempts,
            last: last.unwrap_or_default(),
        })
    }

    /// Retries parked units oldest-first until one fails again.
    async fn drain_overflow(&mut self) {
        let mut drained = 0usize;
        while let Some(unit) = self.overflow.front() {
            let written = tokio::time::timeout(
                self.settings.persistence.op_timeout(),
                self.store.append_unit(unit),
            )
            .await;
            match written {
                Ok(Ok(())) => {
                    self.overflow.pop_front();
                    drained += 1;
                }
                _ => break,
            }
        }
        if drained > 0 {
            info!(drained, remaining = self.overflow.len(), "drained overflow buffer");
        }
    }

    /// Applies a liveness transition, collecting its events and alerts.
    fn apply_transition(
        &mut self,
        transition: LivenessTransition,
        now: DateTime<Utc>,
        events: &mut Vec<SystemEvent>,
        alerts: &mut Vec<MaintenanceAlert>,
    ) {
        match transition {
            LivenessTransition::Restored { source, was_lost } => {
                info!(%source, "source connection restored");
                events.push(SystemEvent::new(
                    EventKind::ConnectionRestored,
                    now,
                    format!("{source} connection restored"),
                ));
                if was_lost {
                    if let Some((alert, event)) = self.alert_engine.acknowledge_root_cause(
                        AlertCategory::Connectivity,
                        lost_root_cause(source),
                        now,
                    ) {
                        alerts.push(alert);
                        events.push(event);
                    }
                }
            }
            LivenessTransition::Degraded { source } => {
                warn!(%source, "source connection degraded");
                events.push(SystemEvent::new(
                    EventKind::ConnectionDegraded,
                    now,
                    format!("{source} silent past its timeout"),
                ));
            }
            LivenessTransition::Lost { source } => {
                warn!(%source, "source connection lost");
                self.snapshot.clear_source(source);
                events.push(SystemEvent::new(
                    EventKind::ConnectionLost,
                    now,
                    format!("{source} connection lost"),
                ));
                let (message, action) = match source {
                    SourceId::Esp => (
                        "ESP sensor module stopped sending data",
                        "Check ESP power and network connectivity",
                    ),
                    SourceId::Plc => (
                        "PLC not responding to register polls",
                        "Check PLC network link and MC protocol settings",
                    ),
                };
                let alert = self.alert_engine.raise(
                    AlertCategory::Connectivity,
                    lost_root_cause(source),
                    RuleOutcome {
                        severity: Severity::Critical,
                        message: message.into(),
                        recommended_action: action.into(),
                        confidence: 1.0,
                    },
                    now,
                );
                alerts.push(alert);
            }
        }
    }

    /// Periodic liveness check, run from the sweep timer.
    async fn run_sweep(&mut self, now: DateTime<Utc>) {
        let transitions = self.liveness.sweep(now);
        if transitions.is_empty() {
            self.publish_status();
            return;
        }

        let mut events = Vec::new();
        let mut alerts = Vec::new();
        let mut lost_sources = Vec::new();
        for transition in transitions {
            if let LivenessTransition::Lost { source } = transition {
                lost_sources.push(source);
            }
            self.apply_transition(transition, now, &mut events, &mut alerts);
        }

        // Single-attempt persistence: the next sweep re-reports anything that
        // matters, and liveness state itself is already updated.
        if let Err(err) = self.store.append_events(&events).await {
            warn!(error = %err, "failed to persist sweep events");
        }
        if !alerts.is_empty() {
            if let Err(err) = self.store.upsert_alerts(&alerts).await {
                warn!(error = %err, "failed to persist sweep alerts");
            }
        }

        for source in lost_sources {
            self.publisher.publish(Update::ConnectionLost {
                source: source.to_string(),
                message: format!("{source} connection lost - data timeout"),
            });
        }
        for alert in alerts {
            self.publisher.publish(Update::MaintenanceAlert(alert));
        }
        self.publisher
            .publish(Update::RecommendationsUpdate(self.alert_engine.active_alerts()));
        self.publish_status();
    }

    async fn handle_acknowledge(&mut self, alert_id: Uuid) -> AppResult<bool> {
        let now = Utc::now();
        match self.alert_engine.acknowledge(alert_id, now) {
            (crate::alerts::AckOutcome::Acknowledged(alert), Some(event)) => {
                self.store.upsert_alerts(&[alert]).await?;
                self.store.append_events(&[event]).await?;
                self.publisher
                    .publish(Update::RecommendationsUpdate(self.alert_engine.active_alerts()));
                Ok(true)
            }
            (crate::alerts::AckOutcome::Acknowledged(alert), None) => {
                self.store.upsert_alerts(&[alert]).await?;
                Ok(true)
            }
            (crate::alerts::AckOutcome::AlreadyAcknowledged, _) => Ok(true),
            (crate::alerts::AckOutcome::NotFound, _) => Ok(false),
        }
    }

    fn publish_unit(&self, unit: &PipelineUnit) {
        self.publisher.publish(Update::SensorUpdate {
            reading: unit.reading.clone(),
            snapshot: self.snapshot.clone(),
        });
        self.publisher.publish(Update::HealthUpdate(unit.health.clone()));
        self.publisher
            .publish(Update::RecommendationsUpdate(self.alert_engine.active_alerts()));
        for alert in &unit.alerts {
            self.publisher.publish(Update::MaintenanceAlert(alert.clone()));
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        self.publisher
            .publish(Update::StatusUpdate(self.liveness.statuses()));
    }

    async fn shutdown(&mut self) {
        // One last chance for parked units before the store handle goes away.
        self.drain_overflow().await;
        if !self.overflow.is_empty() {
            warn!(
                parked = self.overflow.len(),
                "shutting down with unpersisted units in the overflow buffer"
            );
        }
        if let Err(err) = self.store.flush().await {
            warn!(error = %err, "store flush failed during shutdown");
        }
    }
}

fn lost_root_cause(source: SourceId) -> &'static str {
    match source {
        SourceId::Esp => "esp_lost",
        SourceId::Plc => "plc_lost",
    }
}

//! Command types for the coordinator actor.
//!
//! External callers (the transport layer, the poll adapter, the test suite)
//! talk to the engine exclusively through these messages. Each command
//! carries a oneshot responder; the helper constructors pair a command with
//! its receiver so call sites stay tidy.

use crate::core::{AlertFilter, MaintenanceAlert, PipelineUnit, RawPayload, Snapshot};
use crate::error::AppResult;
use crate::liveness::SourceLiveness;
use crate::publish::Update;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

/// Point-in-time view of the engine, for query paths.
#[derive(Clone, Debug)]
pub struct EngineStatus {
    pub snapshot: Snapshot,
    pub latest_health: Option<crate::core::HealthScore>,
    pub liveness: Vec<SourceLiveness>,
    /// Units parked after exhausted persistence retries.
    pub overflow_len: usize,
}

/// Commands accepted by the coordinator actor.
#[derive(Debug)]
pub enum EngineCommand {
    /// Feed one raw payload through the pipeline.
    Ingest {
        payload: RawPayload,
        received_at: DateTime<Utc>,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Acknowledge an alert. Responds `Ok(true)` when the alert exists
    /// (idempotently), `Ok(false)` when it does not.
    Acknowledge {
        alert_id: Uuid,
        response: oneshot::Sender<AppResult<bool>>,
    },

    /// Most recent persisted units, newest first.
    QueryRecent {
        max: usize,
        response: oneshot::Sender<AppResult<Vec<PipelineUnit>>>,
    },

    /// Alerts matching a filter.
    QueryAlerts {
        filter: AlertFilter,
        response: oneshot::Sender<AppResult<Vec<MaintenanceAlert>>>,
    },

    /// Current engine status snapshot.
    Status {
        response: oneshot::Sender<EngineStatus>,
    },

    /// Subscribe to the update fan-out.
    Subscribe {
        response: oneshot::Sender<broadcast::Receiver<Update>>,
    },

    /// Record an operator command in the audit trail.
    ManualCommand {
        command: String,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Drain in-flight work and stop.
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

impl EngineCommand {
    pub fn ingest(
        payload: RawPayload,
        received_at: DateTime<Utc>,
    ) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Ingest {
                payload,
                received_at,
                response: tx,
            },
            rx,
        )
    }

    pub fn acknowledge(alert_id: Uuid) -> (Self, oneshot::Receiver<AppResult<bool>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Acknowledge { alert_id, response: tx }, rx)
    }

    pub fn query_recent(max: usize) -> (Self, oneshot::Receiver<AppResult<Vec<PipelineUnit>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::QueryRecent { max, response: tx }, rx)
    }

    pub fn query_alerts(
        filter: AlertFilter,
    ) -> (Self, oneshot::Receiver<AppResult<Vec<MaintenanceAlert>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::QueryAlerts { filter, response: tx }, rx)
    }

    pub fn status() -> (Self, oneshot::Receiver<EngineStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::Status { response: tx }, rx)
    }

    pub fn subscribe() -> (Self, oneshot::Receiver<broadcast::Receiver<Update>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Subscribe { response: tx }, rx)
    }

    pub fn manual_command(command: String) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::ManualCommand { command, response: tx }, rx)
    }

    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}

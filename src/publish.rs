//! Pub/sub fan-out of engine results.
//!
//! Updates flow through a Tokio broadcast channel: every subscriber gets its
//! own bounded buffer, and a slow or disconnected subscriber lags and drops
//! the oldest updates instead of stalling ingestion. Delivery is
//! at-least-once relative to reconnects; subscribers reconcile through the
//! engine's recent-history query.
//!
//! Topic names mirror the dashboard's event vocabulary so the transport
//! layer can forward updates verbatim.

use crate::core::{HealthScore, MaintenanceAlert, Reading, Snapshot};
use crate::liveness::SourceLiveness;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// One fan-out update, tagged by topic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all = "snake_case")]
pub enum Update {
    /// A reading passed the pipeline; carries the fused snapshot.
    SensorUpdate { reading: Reading, snapshot: Snapshot },
    /// Fresh health assessment.
    HealthUpdate(HealthScore),
    /// Current set of active alerts, newest first.
    RecommendationsUpdate(Vec<MaintenanceAlert>),
    /// A single alert was created or updated.
    MaintenanceAlert(MaintenanceAlert),
    /// A source dropped out.
    ConnectionLost { source: String, message: String },
    /// Liveness overview for all sources.
    StatusUpdate(Vec<SourceLiveness>),
}

impl Update {
    /// The topic string subscribers filter on.
    pub fn topic(&self) -> &'static str {
        match self {
            Update::SensorUpdate { .. } => "sensor_update",
            Update::HealthUpdate(_) => "health_update",
            Update::RecommendationsUpdate(_) => "recommendations_update",
            Update::MaintenanceAlert(_) => "maintenance_alert",
            Update::ConnectionLost { .. } => "connection_lost",
            Update::StatusUpdate(_) => "status_update",
        }
    }
}

/// Fire-and-forget broadcast publisher.
#[derive(Clone)]
pub struct UpdatePublisher {
    sender: broadcast::Sender<Update>,
}

impl UpdatePublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Hands out an independent receiver with its own bounded buffer.
    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.sender.subscribe()
    }

    /// Publishes without blocking. Having no subscribers is not an error.
    pub fn publish(&self, update: Update) {
        let topic = update.topic();
        match self.sender.send(update) {
            Ok(receivers) => trace!(topic, receivers, "published update"),
            Err(_) => trace!(topic, "no subscribers, update dropped"),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

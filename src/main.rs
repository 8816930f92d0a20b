//! motorwatch binary entry point.
//!
//! Bootstraps the engine with mock sources so the whole pipeline can be
//! exercised without hardware: a mock ESP pushes telemetry every 2 s, a mock
//! PLC is polled on the configured cadence, and a subscriber task logs every
//! update the engine fans out. Ctrl-C shuts everything down gracefully.

use motorwatch::adapters::{spawn_poll_task, MockEsp, MockPlc};
use motorwatch::config::Settings;
use motorwatch::data::MemoryStore;
use motorwatch::engine;
use motorwatch::publish::Update;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load(None)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.application.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        name = %settings.application.name,
        "starting motor monitoring engine"
    );
    info!(
        motor_temp_optimal = settings.thresholds.optimal_motor_temp_c,
        voltage = settings.thresholds.optimal_voltage_v,
        current = settings.thresholds.optimal_current_a,
        rpm = settings.thresholds.optimal_rpm,
        "reference operating point"
    );

    let store: Arc<MemoryStore> = if settings.persistence.csv_export_file.is_empty() {
        Arc::new(MemoryStore::new())
    } else {
        let path = settings
            .application
            .data_dir
            .join(&settings.persistence.csv_export_file);
        Arc::new(MemoryStore::with_csv(&path)?)
    };

    let (handle, engine_task) = engine::spawn(settings.clone(), store);

    // Subscriber: log the fan-out the dashboard would render.
    let mut updates = handle.subscribe().await?;
    let subscriber = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(Update::HealthUpdate(health)) => {
                    info!(
                        overall = health.overall,
                        band = %health.band,
                        "health update"
                    );
                }
                Ok(Update::MaintenanceAlert(alert)) => {
                    warn!(
                        severity = %alert.severity,
                        category = %alert.category,
                        message = %alert.message,
                        "maintenance alert"
                    );
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged behind the fan-out");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Mock poll source on the configured cadence.
    let poll_task = spawn_poll_task(
        handle.clone(),
        MockPlc::new(7),
        settings.sources.poll_interval(),
    );

    // Mock push source, irregular by nature but steady enough for a demo.
    let push_handle = handle.clone();
    let push_task = tokio::spawn(async move {
        let mut esp = MockEsp::new(11);
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            ticker.tick().await;
            let payload = esp.next_payload();
            match push_handle.ingest(payload, chrono::Utc::now()).await {
                Ok(()) => {}
                Err(motorwatch::error::MonitorError::EngineClosed) => break,
                Err(err) => warn!(error = %err, "push reading rejected"),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    poll_task.abort();
    push_task.abort();
    if let Err(err) = handle.shutdown().await {
        error!(error = %err, "engine shutdown failed");
    }
    let _ = engine_task.await;
    subscriber.abort();

    info!("shutdown complete");
    Ok(())
}

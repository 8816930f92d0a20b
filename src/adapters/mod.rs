//! Source adapter seams.
//!
//! The wire protocols themselves live outside the engine: the push adapter
//! is whatever transport receives ESP messages and calls
//! [`EngineHandle::ingest`], and the poll adapter is anything implementing
//! [`RegisterSource`]. This module provides the poll task that drives a
//! register source on the engine's cadence, plus mock sources for the demo
//! binary and tests.
//!
//! A failed poll is logged and skipped; the liveness sweep notices the
//! silence and raises the connectivity alert; the poll loop itself never
//! alarms.

pub mod mock;

use crate::core::{PlcRegisters, RawPayload};
use crate::engine::EngineHandle;
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub use mock::{MockEsp, MockPlc};

/// A poll-style source that yields raw register words on demand.
#[async_trait]
pub trait RegisterSource: Send {
    /// Reads the current register values. Errors are per-cycle: the next
    /// poll starts fresh.
    async fn read_registers(&mut self) -> AppResult<PlcRegisters>;
}

/// Drives a register source at a fixed interval, feeding the engine.
///
/// Runs until the engine goes away. Poll cycles and push ingests share only
/// the engine mailbox, so neither blocks the other.
pub fn spawn_poll_task(
    handle: EngineHandle,
    mut source: impl RegisterSource + 'static,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let registers = match source.read_registers().await {
                Ok(registers) => registers,
                Err(err) => {
                    warn!(error = %err, "poll cycle failed, skipping");
                    continue;
                }
            };
            debug!(d100 = registers.d100, d102 = registers.d102, "poll cycle read");
            let payload = RawPayload::Plc { registers };
            match handle.ingest(payload, Utc::now()).await {
                Ok(()) => {}
                Err(crate::error::MonitorError::EngineClosed) => break,
                Err(err) => warn!(error = %err, "poll reading rejected"),
            }
        }
        debug!("poll task stopped");
    })
}

//! Mock sources generating plausible motor telemetry.
//!
//! Used by the demo binary and the integration tests. Values drift around
//! the reference operating point with small random jitter, so the demo
//! dashboard shows a healthy motor that occasionally wanders.

use super::RegisterSource;
use crate::core::{PlcRegisters, RawPayload};
use crate::error::AppResult;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

/// Mock PLC yielding register words around 24 V / 38 °C.
pub struct MockPlc {
    rng: StdRng,
}

impl MockPlc {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

#[async_trait]
impl RegisterSource for MockPlc {
    async fn read_registers(&mut self) -> AppResult<PlcRegisters> {
        // 24 V is ~3276 counts at 30 V full scale; 38 °C is ~734 counts.
        let d100: i32 = 3276 + self.rng.gen_range(-60..=60);
        let d102: i32 = 734 + self.rng.gen_range(-20..=20);
        Ok(PlcRegisters {
            d100: d100.max(0) as u16,
            d102: d102.max(0) as u16,
        })
    }
}

/// Mock ESP producing push payloads around the optimal operating point.
pub struct MockEsp {
    rng: StdRng,
}

impl MockEsp {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// One push payload in the firmware's `VAL1`..`VAL12` wire format.
    pub fn next_payload(&mut self) -> RawPayload {
        let current = 6.25 + self.rng.gen_range(-0.4..0.4);
        let voltage = 24.0 + self.rng.gen_range(-0.6..0.6);
        let rpm = 2750.0 + self.rng.gen_range(-60.0..60.0);
        let ambient = 26.0 + self.rng.gen_range(-1.0..1.0);
        let humidity = 45.0 + self.rng.gen_range(-4.0..4.0);
        let heat_index = ambient + 0.6;
        RawPayload::esp(&[
            ("VAL1", json!(format!("{current:.2}"))),
            ("VAL2", json!(format!("{voltage:.2}"))),
            ("VAL3", json!(format!("{rpm:.0}"))),
            ("VAL4", json!(format!("{ambient:.1}"))),
            ("VAL5", json!(format!("{humidity:.1}"))),
            ("VAL7", json!(format!("{heat_index:.1}"))),
            ("VAL9", json!("OFF")),
            ("VAL10", json!("OFF")),
            ("VAL11", json!("OFF")),
            ("VAL12", json!("NOR")),
        ])
    }
}

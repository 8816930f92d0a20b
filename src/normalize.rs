//! Reading normalizer: source-tagged raw payloads to canonical readings.
//!
//! The push source delivers loosely-typed JSON objects keyed `VAL1`..`VAL12`
//! (current, voltage, rpm, ambient °C, humidity, ambient °F, heat index °C,
//! heat index °F, three relay states, combined status). The poll source
//! delivers raw ADC register words that need scaling to engineering units.
//! Everything downstream of this module works on the canonical [`Reading`];
//! the dynamic payload shape stops here.
//!
//! Validation rules:
//! - a numeric field that is absent, empty, or the literal `"0"` sentinel the
//!   firmware sends for "no sample" maps to `None`
//! - a present but non-numeric value where a number is required rejects the
//!   reading with a validation error
//! - values outside their physical range are clamped or rejected per the
//!   configured [`RangePolicy`]

use crate::config::{NormalizerSettings, RangePolicy};
use crate::core::{PlcRegisters, RawPayload, Reading, RelayState, SourceId};
use crate::error::{AppResult, MonitorError};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

/// Physical plausibility bounds, per quantity.
const CURRENT_RANGE_A: (f64, f64) = (0.0, 100.0);
const VOLTAGE_RANGE_V: (f64, f64) = (0.0, 60.0);
const RPM_RANGE: (f64, f64) = (0.0, 10_000.0);
const TEMP_RANGE_C: (f64, f64) = (-40.0, 150.0);
const HUMIDITY_RANGE_PCT: (f64, f64) = (0.0, 100.0);

/// PLC register scaling: D100 full scale (4095) maps to 30 V.
const PLC_VOLTAGE_FULL_SCALE: f64 = 30.0;
const PLC_ADC_MAX: f64 = 4095.0;
/// PLC register scaling: temperature in °C per D102 count.
const PLC_TEMP_SCALE: f64 = 0.05175;

/// Maps heterogeneous source payloads to one canonical reading.
#[derive(Clone, Debug)]
pub struct Normalizer {
    policy: RangePolicy,
}

impl Normalizer {
    pub fn new(settings: &NormalizerSettings) -> Self {
        Self {
            policy: settings.range_policy,
        }
    }

    /// Produces a canonical reading or rejects the payload.
    pub fn normalize(&self, payload: RawPayload, received_at: DateTime<Utc>) -> AppResult<Reading> {
        match &payload {
            RawPayload::Esp { fields } => self.normalize_esp(fields, received_at, &payload),
            RawPayload::Plc { registers } => Ok(self.normalize_plc(*registers, received_at, &payload)),
        }
    }

    fn normalize_esp(
        &self,
        fields: &std::collections::BTreeMap<String, Value>,
        received_at: DateTime<Utc>,
        raw: &RawPayload,
    ) -> AppResult<Reading> {
        let current_a = numeric_field(fields, "VAL1")?;
        let voltage_v = numeric_field(fields, "VAL2")?;
        let rpm = numeric_field(fields, "VAL3")?;
        let ambient_c = numeric_field(fields, "VAL4")?;
        let humidity = numeric_field(fields, "VAL5")?;
        let ambient_f = numeric_field(fields, "VAL6")?;
        let heat_index_c = numeric_field(fields, "VAL7")?;
        let heat_index_f = numeric_field(fields, "VAL8")?;

        // Fall back to the Fahrenheit channels when the Celsius ones are
        // missing; the firmware reports both but older revisions only send °F.
        let ambient_temp_c = ambient_c.or(ambient_f.map(fahrenheit_to_celsius));
        let heat_index_c = heat_index_c.or(heat_index_f.map(fahrenheit_to_celsius));

        if current_a.is_none()
            && voltage_v.is_none()
            && rpm.is_none()
            && ambient_temp_c.is_none()
            && humidity.is_none()
        {
            return Err(MonitorError::validation(
                SourceId::Esp.to_string(),
                "payload carries no usable numeric fields",
            ));
        }

        let relays = [
            relay_state(fields.get("VAL9")),
            relay_state(fields.get("VAL10")),
            relay_state(fields.get("VAL11")),
        ];

        Ok(Reading {
            source: SourceId::Esp,
            timestamp: received_at,
            current_a: self.bound(SourceId::Esp, "current", current_a, CURRENT_RANGE_A)?,
            voltage_v: self.bound(SourceId::Esp, "voltage", voltage_v, VOLTAGE_RANGE_V)?,
            rpm: self.bound(SourceId::Esp, "rpm", rpm, RPM_RANGE)?,
            motor_temp_c: None,
            ambient_temp_c: self.bound(SourceId::Esp, "ambient temperature", ambient_temp_c, TEMP_RANGE_C)?,
            humidity_pct: self.bound(SourceId::Esp, "humidity", humidity, HUMIDITY_RANGE_PCT)?,
            heat_index_c: self.bound(SourceId::Esp, "heat index", heat_index_c, TEMP_RANGE_C)?,
            relays,
            raw: raw.clone(),
        })
    }

    fn normalize_plc(
        &self,
        registers: PlcRegisters,
        received_at: DateTime<Utc>,
        raw: &RawPayload,
    ) -> Reading {
        Reading {
            source: SourceId::Plc,
            timestamp: received_at,
            current_a: None,
            voltage_v: Some(plc_voltage(registers.d100)),
            rpm: None,
            motor_temp_c: Some(plc_temperature(registers.d102)),
            ambient_temp_c: None,
            humidity_pct: None,
            heat_index_c: None,
            relays: [RelayState::Unknown; 3],
            raw: raw.clone(),
        }
    }

    /// Applies the range policy to a value.
    fn bound(
        &self,
        source: SourceId,
        name: &str,
        value: Option<f64>,
        (min, max): (f64, f64),
    ) -> AppResult<Option<f64>> {
        let Some(v) = value else { return Ok(None) };
        if v >= min && v <= max {
            return Ok(Some(v));
        }
        match self.policy {
            RangePolicy::Clamp => {
                let clamped = v.clamp(min, max);
                debug!(source = %source, field = name, raw = v, clamped, "clamped out-of-range value");
                Ok(Some(clamped))
            }
            RangePolicy::Reject => Err(MonitorError::validation(
                source.to_string(),
                format!("{name} {v} outside physical range [{min}, {max}]"),
            )),
        }
    }
}

/// Extracts an optional numeric field from a push payload.
///
/// `None`, empty string and the `"0"` sentinel all mean "no sample"; any
/// other non-numeric value is an error.
fn numeric_field(
    fields: &std::collections::BTreeMap<String, Value>,
    key: &str,
) -> AppResult<Option<f64>> {
    let Some(value) = fields.get(key) else {
        return Ok(None);
    };
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "0" {
                return Ok(None);
            }
            s.parse::<f64>().map(Some).map_err(|_| {
                MonitorError::validation(
                    SourceId::Esp.to_string(),
                    format!("{key} is not numeric: {s:?}"),
                )
            })
        }
        other => Err(MonitorError::validation(
            SourceId::Esp.to_string(),
            format!("{key} has unexpected type: {other}"),
        )),
    }
}

/// Maps relay status text to the canonical enumeration.
fn relay_state(value: Option<&Value>) -> RelayState {
    let Some(Value::String(s)) = value else {
        return RelayState::Unknown;
    };
    match s.trim().to_ascii_uppercase().as_str() {
        "ON" | "CLOSED" | "ENGAGED" | "1" => RelayState::Closed,
        "OFF" | "OPEN" | "0" => RelayState::Open,
        _ => RelayState::Unknown,
    }
}

fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

/// D100 raw ADC value to supply voltage.
pub fn plc_voltage(raw: u16) -> f64 {
    if raw == 0 {
        return 0.0;
    }
    (f64::from(raw) / PLC_ADC_MAX * PLC_VOLTAGE_FULL_SCALE * 10.0).round() / 10.0
}

/// D102 raw ADC value to motor temperature.
pub fn plc_temperature(raw: u16) -> f64 {
    if raw == 0 {
        return 0.0;
    }
    (PLC_TEMP_SCALE * f64::from(raw) * 10.0).round() / 10.0
}

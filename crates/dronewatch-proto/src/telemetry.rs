use serde::{Deserialize, Serialize};

use crate::lenient;

/// Pack voltage treated as an empty battery (4S with headroom for sag).
pub const BATTERY_EMPTY_V: f64 = 12.0;
/// Pack voltage treated as a full battery.
pub const BATTERY_FULL_V: f64 = 16.8;

/// Unrecognised states read as `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SystemIntegrity {
    BatteryWarning,
    SpeedWarning,
    AltitudeWarning,
    #[default]
    #[serde(other)]
    Ok,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSignal {
    #[serde(default)]
    pub severity: f64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub detail: String,
}

/// Diagnostic block the backend's analysis layer attaches to some frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDiagnostic {
    #[serde(default)]
    pub severity: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub signals: Vec<AiSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_risk: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<String>,
}

/// Battery field as the backend sends it: either a percent or a pack object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BatteryReading {
    Percent(f64),
    Pack {
        #[serde(default)]
        voltage: Option<f64>,
    },
    Other(serde_json::Value),
}

/// Raw `telemetry` object of an inbound frame. Missing, null or wrong-typed
/// fields fall back to zero.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TelemetryPayload {
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub altitude: f64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub speed: f64,
    #[serde(default)]
    pub battery: Option<BatteryReading>,
    /// Top-level voltage, used when `battery` is not a pack object.
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub voltage: Option<f64>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub latitude: f64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub longitude: f64,
    /// Backend tick, monotonically increasing.
    #[serde(default, deserialize_with = "lenient::tick")]
    pub timestamp: u64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub ai: Option<AiDiagnostic>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub safe_mode: bool,
}

impl TelemetryPayload {
    /// Battery as an integer percent in 0..=100.
    ///
    /// A voltage (from the pack object, or the top-level fallback) wins over a
    /// reported percent. A pack object without a usable voltage reads as 0.
    pub fn battery_percent(&self) -> u8 {
        let voltage = match &self.battery {
            Some(BatteryReading::Pack { voltage }) => *voltage,
            Some(BatteryReading::Other(_)) => None,
            _ => self.voltage,
        };
        match (voltage, &self.battery) {
            (Some(v), _) => percent_from_voltage(v),
            (None, Some(BatteryReading::Percent(p))) => clamp_percent(*p),
            _ => 0,
        }
    }
}

/// Linear map from pack voltage to percent, clamped and rounded.
pub fn percent_from_voltage(voltage: f64) -> u8 {
    let pct = (voltage - BATTERY_EMPTY_V) / (BATTERY_FULL_V - BATTERY_EMPTY_V) * 100.0;
    clamp_percent(pct)
}

fn clamp_percent(pct: f64) -> u8 {
    if !pct.is_finite() {
        return 0;
    }
    pct.clamp(0.0, 100.0).round() as u8
}

/// Decoded, normalised telemetry sample as published to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub tick: u64,
    pub altitude: f64,
    pub speed: f64,
    pub battery: u8,
    pub latitude: f64,
    pub longitude: f64,
    pub risk_level: f64,
    pub system_integrity: SystemIntegrity,
    pub ai: Option<AiDiagnostic>,
    pub safe_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    LowBattery,
    HighAltitude,
    Instability,
    Anomaly,
    Override,
    #[serde(other)]
    Other,
}

/// Discrete out-of-band occurrence reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: f64,
    #[serde(default)]
    pub tick: u64,
}

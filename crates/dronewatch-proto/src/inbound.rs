use serde::Deserialize;
use serde_json::{Map, Value};

use crate::lenient;
use crate::telemetry::{Event, SystemIntegrity, TelemetryFrame, TelemetryPayload};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed {kind} payload: {source}")]
    Shape {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// `{telemetry, risk_level, system_integrity}` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryEnvelope {
    pub telemetry: TelemetryPayload,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub risk_level: Option<f64>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub system_integrity: Option<SystemIntegrity>,
}

/// Top-level fields of a flat recorded frame.
#[derive(Debug, Default, Deserialize)]
struct RecordOverrides {
    #[serde(default, deserialize_with = "lenient::or_default")]
    risk_level: Option<f64>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    system_integrity: Option<SystemIntegrity>,
}

impl TelemetryEnvelope {
    /// One entry of a recorded flight log. Entries are either stream
    /// envelopes or flat frames carrying `risk_level` and
    /// `system_integrity` next to the telemetry fields.
    pub fn from_record(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(obj) = value else {
            return Err(DecodeError::Shape {
                kind: "log record",
                source: serde::de::Error::custom("expected an object"),
            });
        };
        if obj.get("telemetry").is_some_and(present) {
            return decode_envelope(obj);
        }
        let value = Value::Object(obj);
        let overrides: RecordOverrides = serde_json::from_value(value.clone())
            .map_err(|source| DecodeError::Shape { kind: "log record", source })?;
        let telemetry: TelemetryPayload = serde_json::from_value(value)
            .map_err(|source| DecodeError::Shape { kind: "log record", source })?;
        Ok(Self {
            telemetry,
            risk_level: overrides.risk_level,
            system_integrity: overrides.system_integrity,
        })
    }

    pub fn tick(&self) -> u64 {
        self.telemetry.timestamp
    }

    pub fn into_frame(self) -> TelemetryFrame {
        let battery = self.telemetry.battery_percent();
        let t = self.telemetry;
        TelemetryFrame {
            tick: t.timestamp,
            altitude: t.altitude,
            speed: t.speed,
            battery,
            latitude: t.latitude,
            longitude: t.longitude,
            risk_level: self.risk_level.unwrap_or(0.0),
            system_integrity: self.system_integrity.unwrap_or_default(),
            ai: t.ai,
            safe_mode: t.safe_mode,
        }
    }
}

/// One classified stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Echo of one of our pings. `t` is `None` when absent or not a number.
    Pong { t: Option<f64> },
    /// Server-initiated heartbeat; `t` is echoed back untouched.
    Ping { t: Option<Value> },
    Event(Event),
    Telemetry(TelemetryEnvelope),
    Unknown,
}

impl Inbound {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        Self::classify(value)
    }

    /// Classifies by shape: pong, ping, event, telemetry, in that order.
    pub fn classify(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(mut obj) = value else {
            return Ok(Inbound::Unknown);
        };

        match obj.get("type").and_then(Value::as_str) {
            Some("pong") => {
                let t = obj.get("t").and_then(Value::as_f64);
                return Ok(Inbound::Pong { t });
            }
            Some("ping") => return Ok(Inbound::Ping { t: obj.remove("t") }),
            _ => {}
        }

        if let Some(ev) = obj.remove("event").filter(present) {
            let event = serde_json::from_value(ev)
                .map_err(|source| DecodeError::Shape { kind: "event", source })?;
            return Ok(Inbound::Event(event));
        }

        if obj.get("telemetry").is_some_and(present) {
            return decode_envelope(obj).map(Inbound::Telemetry);
        }

        Ok(Inbound::Unknown)
    }
}

fn present(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

fn decode_envelope(obj: Map<String, Value>) -> Result<TelemetryEnvelope, DecodeError> {
    serde_json::from_value(Value::Object(obj))
        .map_err(|source| DecodeError::Shape { kind: "telemetry", source })
}

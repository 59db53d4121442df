use dronewatch_proto::{Event, TelemetryFrame};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConnectionHealth {
    pub connected: bool,
    /// Round trip of the last completed ping/pong. Stays stale across drops.
    pub latency_ms: Option<f64>,
    /// The last frame's tick did not follow the previous one by the expected step.
    pub packet_loss: bool,
    pub messages_per_second: f64,
    pub unstable_connection: bool,
    /// Closes since the last sustained open.
    pub reconnect_attempts: u32,
}

/// Everything a consumer reads from the stream, published as one value.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StreamSnapshot {
    pub state: ConnectionState,
    pub health: ConnectionHealth,
    pub current: Option<TelemetryFrame>,
    pub last_event: Option<Event>,
    pub paused: bool,
    /// Oldest first.
    pub log: Vec<String>,
    /// `(latitude, longitude)`, oldest first.
    pub trail: Vec<(f64, f64)>,
}

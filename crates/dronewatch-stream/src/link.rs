//! Connection lifecycle and frame ingestion, free of I/O.
//!
//! [`Link`] owns every counter the stream keeps. Handlers are called by the
//! processing loop for socket events, timer ticks and caller commands, and
//! answer with [`Action`]s for the loop to carry out.

use std::time::Duration;

use dronewatch_proto::{Event, Inbound, Outbound, TelemetryEnvelope, TelemetryFrame};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::health::{ConnectionHealth, ConnectionState, StreamSnapshot};
use crate::ring::RingBuffer;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Connect,
    StartHeartbeat,
    StopHeartbeat,
    ScheduleReconnect(Duration),
    Send(Outbound),
    CloseSocket,
}

#[derive(Debug)]
pub struct Link {
    reconnect_delay: Duration,
    unstable_after: u32,
    rate_window_secs: f64,
    tick_step: u64,

    state: ConnectionState,
    health: ConnectionHealth,
    reconnect_pending: bool,
    sustained: bool,
    last_tick: Option<u64>,
    window_count: u32,
    paused: bool,

    current: Option<TelemetryFrame>,
    last_event: Option<Event>,
    log: RingBuffer<String>,
    trail: RingBuffer<(f64, f64)>,
}

impl Link {
    pub fn new(cfg: &StreamConfig) -> Self {
        Self {
            reconnect_delay: cfg.reconnect_delay(),
            unstable_after: cfg.unstable_after_attempts.max(1),
            rate_window_secs: cfg.message_rate_window().as_secs_f64(),
            tick_step: cfg.expected_tick_step,
            state: ConnectionState::Disconnected,
            health: ConnectionHealth::default(),
            reconnect_pending: false,
            sustained: false,
            last_tick: None,
            window_count: 0,
            paused: false,
            current: None,
            last_event: None,
            log: RingBuffer::new(cfg.log_retention),
            trail: RingBuffer::new(cfg.trail_points),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }

    pub fn current(&self) -> Option<&TelemetryFrame> {
        self.current.as_ref()
    }

    pub fn last_event(&self) -> Option<&Event> {
        self.last_event.as_ref()
    }

    pub fn log(&self) -> impl Iterator<Item = &String> {
        self.log.iter()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            state: self.state,
            health: self.health.clone(),
            current: self.current.clone(),
            last_event: self.last_event.clone(),
            paused: self.paused,
            log: self.log.to_vec(),
            trail: self.trail.to_vec(),
        }
    }

    /// Session start.
    pub fn start(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Disconnected {
            return Vec::new();
        }
        self.state = ConnectionState::Connecting;
        vec![Action::Connect]
    }

    pub fn on_open(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            debug!(state = ?self.state, "stream: ignoring open outside connecting");
            return Vec::new();
        }
        self.state = ConnectionState::Open;
        self.health.connected = true;
        self.sustained = false;
        info!(attempts = self.health.reconnect_attempts, "stream: connected");
        vec![Action::StartHeartbeat]
    }

    /// Socket closed or failed, including a refused connect.
    pub fn on_closed(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Disconnected => return Vec::new(),
            ConnectionState::Closing => {
                self.state = ConnectionState::Disconnected;
                return Vec::new();
            }
            ConnectionState::Connecting | ConnectionState::Open => {}
        }

        let was_open = self.state == ConnectionState::Open;
        self.state = ConnectionState::Disconnected;
        self.health.connected = false;
        self.health.reconnect_attempts = self.health.reconnect_attempts.saturating_add(1);
        if self.health.reconnect_attempts >= self.unstable_after && !self.health.unstable_connection {
            self.health.unstable_connection = true;
            warn!(attempts = self.health.reconnect_attempts, "stream: connection unstable");
        }

        let mut actions = Vec::new();
        if was_open {
            actions.push(Action::StopHeartbeat);
        }
        if !self.reconnect_pending {
            self.reconnect_pending = true;
            actions.push(Action::ScheduleReconnect(self.reconnect_delay));
        }
        warn!(
            attempts = self.health.reconnect_attempts,
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "stream: disconnected, reconnect scheduled"
        );
        actions
    }

    pub fn on_reconnect_due(&mut self) -> Vec<Action> {
        self.reconnect_pending = false;
        if self.state != ConnectionState::Disconnected {
            return Vec::new();
        }
        self.state = ConnectionState::Connecting;
        vec![Action::Connect]
    }

    /// Heartbeat tick. The first tick of an open confirms it as sustained.
    pub fn on_heartbeat(&mut self, now_ms: f64) -> Vec<Action> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }
        if !self.sustained {
            self.sustained = true;
            self.health.reconnect_attempts = 0;
            if self.health.unstable_connection {
                self.health.unstable_connection = false;
                info!("stream: connection stable again");
            }
        }
        vec![Action::Send(Outbound::Ping { t: now_ms })]
    }

    pub fn on_rate_window(&mut self) {
        self.health.messages_per_second = if self.rate_window_secs > 0.0 {
            self.window_count as f64 / self.rate_window_secs
        } else {
            0.0
        };
        self.window_count = 0;
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            debug!(paused, "stream: ingestion toggled");
        }
        self.paused = paused;
    }

    /// One inbound text frame. Malformed frames are logged and dropped.
    pub fn on_text(&mut self, text: &str, now_ms: f64) -> Vec<Action> {
        match Inbound::decode(text) {
            Ok(msg) => self.on_inbound(msg, now_ms),
            Err(e) => {
                warn!(error = %e, "stream: dropping frame");
                Vec::new()
            }
        }
    }

    pub fn on_inbound(&mut self, msg: Inbound, now_ms: f64) -> Vec<Action> {
        match msg {
            Inbound::Pong { t } => {
                self.health.latency_ms = t.map(|t| now_ms - t).filter(|d| d.is_finite() && *d >= 0.0);
                Vec::new()
            }
            Inbound::Ping { t } => vec![Action::Send(Outbound::Pong { t })],
            Inbound::Event(event) => {
                self.window_count = self.window_count.saturating_add(1);
                debug!(kind = ?event.kind, severity = event.severity, "stream: event");
                self.last_event = Some(event);
                Vec::new()
            }
            Inbound::Telemetry(envelope) => {
                self.ingest(envelope);
                Vec::new()
            }
            Inbound::Unknown => Vec::new(),
        }
    }

    fn ingest(&mut self, envelope: TelemetryEnvelope) {
        self.window_count = self.window_count.saturating_add(1);

        let tick = envelope.tick();
        self.health.packet_loss = match self.last_tick {
            Some(last) => last.checked_add(self.tick_step) != Some(tick),
            None => false,
        };
        if self.health.packet_loss {
            debug!(last = ?self.last_tick, tick, "stream: tick gap");
        }
        self.last_tick = Some(tick);

        if self.paused {
            return;
        }

        let frame = envelope.into_frame();
        self.log.push(summary_line(&frame));
        if frame.battery > 0 {
            self.trail.push((frame.latitude, frame.longitude));
        }
        self.current = Some(frame);
    }

    /// Teardown: stop everything without counting a failure.
    pub fn shutdown(&mut self) -> Vec<Action> {
        let was_open = self.state == ConnectionState::Open;
        self.state = ConnectionState::Closing;
        self.reconnect_pending = false;
        self.health.connected = false;
        self.health.latency_ms = None;

        let mut actions = Vec::new();
        if was_open {
            actions.push(Action::StopHeartbeat);
        }
        actions.push(Action::CloseSocket);
        actions
    }

    pub fn clear_trail(&mut self) {
        self.trail.clear();
    }
}

/// Wall-clock stamp in local time, UTC when the offset cannot be determined.
fn summary_line(frame: &TelemetryFrame) -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let stamp = match now.format(format_description!("[hour]:[minute]:[second]")) {
        Ok(stamp) => stamp,
        Err(e) => {
            warn!(error = %e, "stream: cannot format log stamp");
            "--:--:--".to_string()
        }
    };
    format!(
        "[{stamp}] tick={} alt={:.1} speed={:.1} batt={}%",
        frame.tick, frame.altitude, frame.speed, frame.battery
    )
}

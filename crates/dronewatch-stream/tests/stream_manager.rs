use std::time::Duration;

use dronewatch_stream::{
    Connection, Connector, ConnectionState, SocketEvent, StreamConfig, StreamHandle, StreamManager,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

struct FakeConnector {
    sockets: mpsc::UnboundedSender<FakeSocket>,
}

impl Connector for FakeConnector {
    fn connect(&mut self) -> Connection {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let _ = self.sockets.send(FakeSocket {
            events: ev_tx,
            sent: out_rx,
        });
        Connection::new(out_tx, ev_rx)
    }
}

struct FakeSocket {
    events: mpsc::UnboundedSender<SocketEvent>,
    sent: mpsc::UnboundedReceiver<String>,
}

impl FakeSocket {
    fn open(&self) {
        let _ = self.events.send(SocketEvent::Open);
    }

    fn text(&self, text: impl Into<String>) {
        let _ = self.events.send(SocketEvent::Text(text.into()));
    }

    fn close(&self) {
        let _ = self.events.send(SocketEvent::Closed {
            reason: Some("going away".into()),
        });
    }

    async fn next_sent(&mut self) -> Value {
        let raw = self.sent.recv().await.expect("socket closed before sending");
        serde_json::from_str(&raw).expect("outbound frame is json")
    }

    fn drain_sent(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(raw) = self.sent.try_recv() {
            out.push(serde_json::from_str(&raw).expect("outbound frame is json"));
        }
        out
    }
}

fn start(cfg: &StreamConfig) -> (StreamHandle, mpsc::UnboundedReceiver<FakeSocket>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = StreamManager::spawn(cfg, FakeConnector { sockets: tx });
    (handle, rx)
}

fn frame(tick: u64) -> String {
    json!({
        "telemetry": {
            "altitude": 61.3, "speed": 8.0, "battery": { "voltage": 15.6 },
            "latitude": 40.1833, "longitude": 44.5126, "timestamp": tick, "safe_mode": false,
            "ai": { "severity": 10, "summary": "nominal", "signals": [] }
        },
        "risk_level": 30,
        "system_integrity": "BatteryWarning"
    })
    .to_string()
}

#[tokio::test(start_paused = true)]
async fn server_ping_gets_exactly_one_pong() {
    let (handle, mut sockets) = start(&StreamConfig::default());
    let mut socket = sockets.recv().await.expect("connect");
    socket.open();
    socket.text(r#"{"type":"ping","t":1234}"#);

    assert_eq!(socket.next_sent().await, json!({ "type": "pong", "t": 1234 }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let pongs = socket.drain_sent().into_iter().filter(|v| v["type"] == "pong").count();
    assert_eq!(pongs, 0);

    let snap = handle.snapshot();
    assert!(snap.current.is_none());
    assert!(snap.log.is_empty());
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn telemetry_and_events_are_published() {
    let (handle, mut sockets) = start(&StreamConfig::default());
    let mut rx = handle.subscribe();
    let socket = sockets.recv().await.expect("connect");
    socket.open();
    socket.text(frame(41));
    socket.text(r#"{"event":{"type":"HighAltitude","message":"ceiling","severity":55,"tick":41}}"#);

    let snap = rx.wait_for(|s| s.last_event.is_some()).await.expect("session alive").clone();
    let current = snap.current.expect("frame published");
    assert_eq!(current.tick, 41);
    assert_eq!(current.battery, 75);
    assert_eq!(current.risk_level, 30.0);
    assert_eq!(snap.state, ConnectionState::Open);
    assert!(snap.health.connected);
    assert_eq!(snap.log.len(), 1);
    assert!(snap.log[0].ends_with("tick=41 alt=61.3 speed=8.0 batt=75%"));
    assert_eq!(snap.trail, vec![(40.1833, 44.5126)]);

    let snap = rx
        .wait_for(|s| s.health.messages_per_second > 0.0)
        .await
        .expect("session alive")
        .clone();
    assert_eq!(snap.health.messages_per_second, 2.0);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refused_connects_retry_after_delay_and_mark_unstable() {
    let cfg = StreamConfig::default();
    let (handle, mut sockets) = start(&cfg);
    let mut rx = handle.subscribe();

    let started = Instant::now();
    let mut held = Vec::new();
    for attempt in 0..3u32 {
        let socket = sockets.recv().await.expect("connect");
        assert!(started.elapsed() >= cfg.reconnect_delay() * attempt);
        socket.close();
        held.push(socket);
    }

    let snap = rx
        .wait_for(|s| s.health.unstable_connection)
        .await
        .expect("session alive")
        .clone();
    assert_eq!(snap.health.reconnect_attempts, 3);
    assert!(!snap.health.connected);

    // exactly one reconnect follows the third failure
    let fourth = sockets.recv().await.expect("reconnect");
    assert!(started.elapsed() >= cfg.reconnect_delay() * 3);
    assert!(sockets.try_recv().is_err());

    // an open that outlives two heartbeats is sustained
    fourth.open();
    tokio::time::sleep(cfg.heartbeat_interval() * 2 + Duration::from_millis(10)).await;
    let snap = handle.snapshot();
    assert!(!snap.health.unstable_connection);
    assert_eq!(snap.health.reconnect_attempts, 0);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_latency_is_stale_after_drop_and_cleared_on_shutdown() {
    let cfg = StreamConfig::default();
    let (handle, mut sockets) = start(&cfg);
    let mut rx = handle.subscribe();
    let mut socket = sockets.recv().await.expect("connect");
    socket.open();

    let ping = socket.next_sent().await;
    assert_eq!(ping["type"], "ping");
    let t = ping["t"].as_f64().expect("numeric t");
    assert!(t >= cfg.heartbeat_interval_ms as f64 - 1.0);

    tokio::time::sleep(Duration::from_millis(25)).await;
    socket.text(json!({ "type": "pong", "t": t }).to_string());
    let latency = rx
        .wait_for(|s| s.health.latency_ms.is_some())
        .await
        .expect("session alive")
        .health
        .latency_ms
        .expect("latency");
    assert!((latency - 25.0).abs() < 1.0, "latency {latency}");

    socket.close();
    let snap = rx.wait_for(|s| !s.health.connected).await.expect("session alive").clone();
    assert_eq!(snap.health.latency_ms, Some(latency));

    handle.shutdown().await;
    let snap = rx.borrow().clone();
    assert_eq!(snap.health.latency_ms, None);
    assert_eq!(snap.state, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_socket_and_never_reconnects() {
    let (handle, mut sockets) = start(&StreamConfig::default());
    let mut rx = handle.subscribe();
    let mut socket = sockets.recv().await.expect("connect");
    socket.open();
    rx.wait_for(|s| s.health.connected).await.expect("session alive");

    handle.shutdown().await;
    while socket.sent.recv().await.is_some() {}

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(sockets.try_recv().is_err());
    let snap = rx.borrow().clone();
    assert_eq!(snap.health.reconnect_attempts, 0);
    assert!(!snap.health.unstable_connection);
}

#[tokio::test(start_paused = true)]
async fn paused_session_keeps_health_bookkeeping() {
    let (handle, mut sockets) = start(&StreamConfig::default());
    let mut rx = handle.subscribe();
    let socket = sockets.recv().await.expect("connect");
    socket.open();
    socket.text(frame(1));
    rx.wait_for(|s| s.current.is_some()).await.expect("session alive");

    handle.set_paused(true);
    rx.wait_for(|s| s.paused).await.expect("session alive");
    for tick in [2, 3, 4, 5, 9] {
        socket.text(frame(tick));
    }
    let snap = rx.wait_for(|s| s.health.packet_loss).await.expect("session alive").clone();
    assert_eq!(snap.current.map(|f| f.tick), Some(1));
    assert_eq!(snap.log.len(), 1);

    let snap = rx
        .wait_for(|s| s.health.messages_per_second > 0.0)
        .await
        .expect("session alive")
        .clone();
    assert_eq!(snap.health.messages_per_second, 6.0);

    handle.set_paused(false);
    rx.wait_for(|s| !s.paused).await.expect("session alive");
    socket.text(frame(10));
    let snap = rx
        .wait_for(|s| s.current.as_ref().is_some_and(|f| f.tick == 10))
        .await
        .expect("session alive")
        .clone();
    assert!(!snap.health.packet_loss);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn outbound_send_is_dropped_while_disconnected() {
    let (handle, mut sockets) = start(&StreamConfig::default());
    let mut socket = sockets.recv().await.expect("connect");
    handle.send(dronewatch_proto::Outbound::Ping { t: 1.0 });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(socket.drain_sent().is_empty());

    socket.open();
    let mut rx = handle.subscribe();
    rx.wait_for(|s| s.health.connected).await.expect("session alive");
    handle.send(dronewatch_proto::Outbound::Ping { t: 2.0 });
    assert_eq!(socket.next_sent().await, json!({ "type": "ping", "t": 2.0 }));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn odd_field_values_do_not_break_tick_tracking() {
    let (handle, mut sockets) = start(&StreamConfig::default());
    let mut rx = handle.subscribe();
    let socket = sockets.recv().await.expect("connect");
    socket.open();
    socket.text(frame(1));
    socket.text(r#"{"telemetry":{"altitude":null,"timestamp":2.0,"battery":40},"system_integrity":"CommsWarning"}"#);
    socket.text(frame(3));

    let snap = rx
        .wait_for(|s| s.current.as_ref().is_some_and(|f| f.tick == 3))
        .await
        .expect("session alive")
        .clone();
    assert!(!snap.health.packet_loss);
    assert_eq!(snap.log.len(), 3);
    assert!(snap.log[1].ends_with("tick=2 alt=0.0 speed=0.0 batt=40%"));

    let snap = rx
        .wait_for(|s| s.health.messages_per_second > 0.0)
        .await
        .expect("session alive")
        .clone();
    assert_eq!(snap.health.messages_per_second, 3.0);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn superseded_socket_is_never_observed() {
    let cfg = StreamConfig::default();
    let (handle, mut sockets) = start(&cfg);
    let mut rx = handle.subscribe();

    let old = sockets.recv().await.expect("connect");
    old.open();
    rx.wait_for(|s| s.health.connected).await.expect("session alive");
    old.close();
    rx.wait_for(|s| !s.health.connected).await.expect("session alive");

    let fresh = sockets.recv().await.expect("reconnect");
    old.text(frame(99));
    old.close();
    fresh.open();
    fresh.text(frame(1));

    rx.wait_for(|s| s.current.is_some()).await.expect("session alive");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snap = handle.snapshot();
    assert_eq!(snap.current.map(|f| f.tick), Some(1));
    assert_eq!(snap.state, ConnectionState::Open);
    assert!(snap.health.connected);
    assert_eq!(snap.health.reconnect_attempts, 1);
    assert!(sockets.try_recv().is_err());
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pong_while_paused_updates_latency() {
    let (handle, mut sockets) = start(&StreamConfig::default());
    let mut rx = handle.subscribe();
    let mut socket = sockets.recv().await.expect("connect");
    socket.open();
    handle.set_paused(true);
    rx.wait_for(|s| s.paused && s.health.connected).await.expect("session alive");

    let ping = socket.next_sent().await;
    let t = ping["t"].as_f64().expect("numeric t");
    tokio::time::sleep(Duration::from_millis(15)).await;
    socket.text(json!({ "type": "pong", "t": t }).to_string());

    let latency = rx
        .wait_for(|s| s.health.latency_ms.is_some())
        .await
        .expect("session alive")
        .health
        .latency_ms
        .expect("latency");
    assert!((latency - 15.0).abs() < 1.0, "latency {latency}");
    assert!(handle.snapshot().paused);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn zero_length_periods_do_not_stall_the_session() {
    let cfg = StreamConfig {
        heartbeat_interval_ms: 0,
        message_rate_window_ms: 0,
        ..StreamConfig::default()
    };
    let (handle, mut sockets) = start(&cfg);
    let mut rx = handle.subscribe();
    let socket = sockets.recv().await.expect("connect");
    socket.open();
    socket.text(frame(1));

    let snap = rx
        .wait_for(|s| s.current.is_some())
        .await
        .expect("session alive")
        .clone();
    assert!(snap.health.connected);
    handle.shutdown().await;
    assert_eq!(rx.borrow().state, ConnectionState::Disconnected);
}

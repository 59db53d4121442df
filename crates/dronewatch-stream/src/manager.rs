use std::future::pending;
use std::pin::Pin;

use dronewatch_proto::Outbound;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::health::StreamSnapshot;
use crate::link::{Action, Link};
use crate::transport::{Connection, Connector, SocketEvent};

#[derive(Debug)]
enum Command {
    SetPaused(bool),
    ClearTrail,
    Send(Outbound),
    Shutdown,
}

/// Caller side of a running stream session.
///
/// Dropping the handle tears the session down as `shutdown` does, without
/// waiting for it.
#[derive(Debug)]
pub struct StreamHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<StreamSnapshot>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Freeze the published telemetry; health bookkeeping keeps running.
    pub fn set_paused(&self, paused: bool) {
        let _ = self.commands.send(Command::SetPaused(paused));
    }

    pub fn clear_trail(&self) {
        let _ = self.commands.send(Command::ClearTrail);
    }

    /// Write a frame to the socket if it is open; dropped otherwise.
    pub fn send(&self, frame: Outbound) {
        let _ = self.commands.send(Command::Send(frame));
    }

    /// Cancels all timers and closes the socket without reconnecting.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!("stream: session task ended abnormally: {}", e);
        }
    }
}

pub struct StreamManager;

impl StreamManager {
    /// Starts a session on the current tokio runtime.
    pub fn spawn<C: Connector>(cfg: &StreamConfig, connector: C) -> StreamHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let link = Link::new(cfg);
        let (snap_tx, snap_rx) = watch::channel(link.snapshot());

        let epoch = Instant::now();
        let window = cfg.message_rate_window();
        let mut rate = interval_at(epoch + window, window);
        rate.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let session = Session {
            link,
            connector,
            conn: None,
            heartbeat: None,
            heartbeat_every: cfg.heartbeat_interval(),
            rate,
            reconnect: None,
            epoch,
            commands: cmd_rx,
            snapshots: snap_tx,
        };
        let task = tokio::spawn(session.run());

        StreamHandle {
            commands: cmd_tx,
            snapshots: snap_rx,
            task,
        }
    }
}

struct Session<C> {
    link: Link,
    connector: C,
    conn: Option<Connection>,
    heartbeat: Option<Interval>,
    heartbeat_every: std::time::Duration,
    rate: Interval,
    reconnect: Option<Pin<Box<Sleep>>>,
    epoch: Instant,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<StreamSnapshot>,
}

impl<C: Connector> Session<C> {
    async fn run(mut self) {
        let actions = self.link.start();
        self.apply(actions);
        self.publish();

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::SetPaused(paused)) => self.link.set_paused(paused),
                    Some(Command::ClearTrail) => self.link.clear_trail(),
                    Some(Command::Send(frame)) => self.send(&frame),
                    Some(Command::Shutdown) | None => break,
                },
                ev = next_event(&mut self.conn) => {
                    let actions = match ev {
                        SocketEvent::Open => self.link.on_open(),
                        SocketEvent::Text(text) => {
                            let now = self.now_ms();
                            self.link.on_text(&text, now)
                        }
                        SocketEvent::Closed { reason } => {
                            debug!(?reason, "stream: transport closed");
                            self.conn = None;
                            self.link.on_closed()
                        }
                    };
                    self.apply(actions);
                },
                _ = next_tick(&mut self.heartbeat) => {
                    let now = self.now_ms();
                    let actions = self.link.on_heartbeat(now);
                    self.apply(actions);
                },
                _ = self.rate.tick() => self.link.on_rate_window(),
                _ = next_deadline(&mut self.reconnect) => {
                    self.reconnect = None;
                    let actions = self.link.on_reconnect_due();
                    self.apply(actions);
                },
            }
            self.publish();
        }

        let actions = self.link.shutdown();
        self.apply(actions);
        let actions = self.link.on_closed();
        self.apply(actions);
        self.reconnect = None;
        self.publish();
        info!("stream: session closed");
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Connect => {
                    if let Some(old) = self.conn.take() {
                        old.close();
                    }
                    self.conn = Some(self.connector.connect());
                }
                Action::StartHeartbeat => {
                    let mut hb = interval_at(Instant::now() + self.heartbeat_every, self.heartbeat_every);
                    hb.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.heartbeat = Some(hb);
                }
                Action::StopHeartbeat => self.heartbeat = None,
                Action::ScheduleReconnect(delay) => {
                    self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Action::Send(frame) => self.send(&frame),
                Action::CloseSocket => {
                    self.heartbeat = None;
                    if let Some(conn) = self.conn.take() {
                        conn.close();
                    }
                }
            }
        }
    }

    fn send(&self, frame: &Outbound) {
        let Some(conn) = self.conn.as_ref().filter(|_| self.link.health().connected) else {
            debug!(?frame, "stream: not open, dropping outbound frame");
            return;
        };
        match frame.to_json() {
            Ok(text) => {
                if let Err(e) = conn.send(text) {
                    debug!("stream: outbound frame lost: {}", e);
                }
            }
            Err(e) => warn!("stream: cannot encode outbound frame: {}", e),
        }
    }

    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.link.snapshot());
    }
}

async fn next_event(conn: &mut Option<Connection>) -> SocketEvent {
    match conn {
        Some(conn) => conn.recv().await,
        None => pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn next_deadline(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

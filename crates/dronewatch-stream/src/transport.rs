use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open,
    Text(String),
    /// Closed by the peer, failed, or never connected.
    Closed { reason: Option<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket is closed")]
    Closed,
}

/// One socket as seen by the processing loop: an outbound text queue and an
/// inbound event queue. Dropping it closes the socket.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedReceiver<SocketEvent>,
    task: Option<JoinHandle<()>>,
    opened: bool,
}

impl Connection {
    pub fn new(outbound: mpsc::UnboundedSender<String>, events: mpsc::UnboundedReceiver<SocketEvent>) -> Self {
        Self {
            outbound,
            events,
            task: None,
            opened: false,
        }
    }

    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    /// Next event; a vanished transport reads as a close.
    pub async fn recv(&mut self) -> SocketEvent {
        let ev = self
            .events
            .recv()
            .await
            .unwrap_or(SocketEvent::Closed { reason: None });
        if ev == SocketEvent::Open {
            self.opened = true;
        }
        ev
    }

    /// Closes the socket. An open socket gets a close frame from the
    /// transport task; a connect still in flight is aborted.
    pub fn close(self) {
        drop(self.outbound);
        if let Some(task) = self.task {
            if !self.opened {
                task.abort();
            }
        }
    }
}

/// Opens sockets for the stream manager. Tests substitute a fake.
pub trait Connector: Send + 'static {
    fn connect(&mut self) -> Connection;
}

/// WebSocket connector on tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    fn connect(&mut self) -> Connection {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(pump(self.url.clone(), out_rx, ev_tx));
        Connection::new(out_tx, ev_rx).with_task(task)
    }
}

async fn pump(
    url: Url,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    info!("stream: connecting to {}", url);
    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _resp)) => stream,
        Err(e) => {
            warn!("stream: connect to {} failed: {}", url, e);
            let _ = events.send(SocketEvent::Closed {
                reason: Some(e.to_string()),
            });
            return;
        }
    };
    if events.send(SocketEvent::Open).is_err() {
        return;
    }

    let (mut write, mut read) = stream.split();

    let reason = loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        break Some(e.to_string());
                    }
                }
                None => {
                    // owner hung up: orderly close, nothing to report
                    let _ = write.send(Message::Close(None)).await;
                    debug!("stream: socket closed by owner");
                    return;
                }
            },
            item = read.next() => match item {
                Some(Ok(Message::Text(text))) => {
                    if events.send(SocketEvent::Text(text.as_str().to_owned())).is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => break frame.map(|f| f.reason.to_string()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            },
        }
    };

    debug!(?reason, "stream: socket closed");
    let _ = events.send(SocketEvent::Closed { reason });
}

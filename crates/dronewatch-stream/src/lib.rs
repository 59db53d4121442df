//! Reconnecting telemetry stream client.
//!
//! [`StreamManager::spawn`] runs one session: it keeps a socket to the
//! backend open, decodes frames, answers heartbeats and publishes a
//! [`StreamSnapshot`] after every event.

pub mod config;
pub mod doctor;
pub mod health;
pub mod link;
mod manager;
pub mod ring;
pub mod transport;

pub use config::StreamConfig;
pub use health::{ConnectionHealth, ConnectionState, StreamSnapshot};
pub use manager::{StreamHandle, StreamManager};
pub use transport::{Connection, Connector, SocketEvent, WsConnector};

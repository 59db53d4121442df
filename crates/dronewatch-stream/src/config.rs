use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Path of the telemetry stream below the backend's HTTP base.
pub const STREAM_PATH: &str = "/api/v0.0.5/ws";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid url {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme {0:?}; expected ws/wss (or http/https for the backend base)")]
    Scheme(String),
}

/// Stream tunables. Every field has a default so `[stream]` may be omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Explicit stream endpoint. When unset it is derived from the backend base url.
    pub ws_url: Option<String>,

    /// Delay before a reconnect attempt after the socket closes or fails.
    pub reconnect_delay_ms: u64,

    /// Ping period while the socket is open. An open that survives one full
    /// period counts as sustained.
    pub heartbeat_interval_ms: u64,

    /// Reconnect attempts without a sustained open before the link is flagged unstable.
    pub unstable_after_attempts: u32,

    pub message_rate_window_ms: u64,

    /// Rolling log length.
    pub log_retention: usize,

    /// Position trail length.
    pub trail_points: usize,

    /// Tick increment between consecutive frames; anything else is packet loss.
    pub expected_tick_step: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            reconnect_delay_ms: 3000,
            heartbeat_interval_ms: 3000,
            unstable_after_attempts: 3,
            message_rate_window_ms: 1000,
            log_retention: 20,
            trail_points: 100,
            expected_tick_step: 1,
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Never shorter than 1 ms; tokio intervals reject a zero period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Never shorter than 1 ms.
    pub fn message_rate_window(&self) -> Duration {
        Duration::from_millis(self.message_rate_window_ms.max(1))
    }

    /// Stream endpoint: `ws_url` if set, else derived from `http_base`.
    pub fn endpoint(&self, http_base: &str) -> Result<Url, ConfigError> {
        match self.ws_url.as_deref() {
            Some(ws) => parse_ws(ws),
            None => derive_ws_url(http_base),
        }
    }
}

fn parse(url: &str) -> Result<Url, ConfigError> {
    Url::parse(url).map_err(|source| ConfigError::Url {
        url: url.to_string(),
        source,
    })
}

fn parse_ws(url: &str) -> Result<Url, ConfigError> {
    let parsed = parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(ConfigError::Scheme(other.to_string())),
    }
}

/// `http://host:port` -> `ws://host:port/api/v0.0.5/ws` (`https` maps to `wss`).
pub fn derive_ws_url(http_base: &str) -> Result<Url, ConfigError> {
    let base = parse(http_base.trim_end_matches('/'))?;
    let scheme = match base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(ConfigError::Scheme(other.to_string())),
    };
    let host = base.host_str().unwrap_or("127.0.0.1");
    let authority = match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    parse_ws(&format!("{scheme}://{authority}{STREAM_PATH}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dashboard_tunables() {
        let cfg: StreamConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(3));
        assert_eq!(cfg.unstable_after_attempts, 3);
        assert_eq!(cfg.log_retention, 20);
    }

    #[test]
    fn zero_periods_clamp_to_one_millisecond() {
        let cfg = StreamConfig {
            heartbeat_interval_ms: 0,
            message_rate_window_ms: 0,
            ..StreamConfig::default()
        };
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(1));
        assert_eq!(cfg.message_rate_window(), Duration::from_millis(1));
    }

    #[test]
    fn derives_stream_url_from_http_base() {
        let url = derive_ws_url("http://127.0.0.1:8080/").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8080/api/v0.0.5/ws");
        let url = derive_ws_url("https://ops.example.net").unwrap();
        assert_eq!(url.as_str(), "wss://ops.example.net/api/v0.0.5/ws");
    }

    #[test]
    fn explicit_ws_url_wins() {
        let cfg = StreamConfig {
            ws_url: Some("ws://10.0.0.2:9000/live".into()),
            ..StreamConfig::default()
        };
        assert_eq!(cfg.endpoint("http://127.0.0.1:8080").unwrap().as_str(), "ws://10.0.0.2:9000/live");
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!(matches!(derive_ws_url("ftp://x"), Err(ConfigError::Scheme(_))));
        assert!(matches!(derive_ws_url("not a url"), Err(ConfigError::Url { .. })));
        let cfg = StreamConfig {
            ws_url: Some("http://x/ws".into()),
            ..StreamConfig::default()
        };
        assert!(cfg.endpoint("http://127.0.0.1:8080").is_err());
    }
}

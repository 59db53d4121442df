//! Client for the backend's request/response API.
//!
//! Payloads the backend owns (state, metrics, logs, history rows) come back
//! as raw JSON; only events and commands are typed here.

pub mod command;

use dronewatch_proto::Event;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

pub use command::FlightCommand;

pub const API_PREFIX: &str = "/api/v0.0.5";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid backend url {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned {status}")]
    Status { endpoint: String, status: StatusCode },
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = normalize_base_url(base_url);
        Url::parse(&base).map_err(|source| ApiError::Url {
            url: base_url.to_string(),
            source,
        })?;
        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Absolute url for an API path such as `/logs`.
    pub fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}{}/{}", self.base, API_PREFIX, path)
    }

    // === logs ===

    pub async fn list_logs(&self) -> Result<Vec<String>> {
        self.get_json("logs").await
    }

    pub async fn get_log(&self, filename: &str) -> Result<Vec<Value>> {
        self.get_json(&format!("logs/{filename}")).await
    }

    // === replay ===

    pub fn replay_ws_url(&self) -> String {
        let url = self.endpoint("replay");
        match url.strip_prefix("http") {
            Some(rest) => format!("ws{rest}"),
            None => url,
        }
    }

    pub async fn start_replay(&self) -> Result<()> {
        self.call(Method::GET, "replay/start", None::<&()>).await.map(drop)
    }

    pub async fn stop_replay(&self) -> Result<()> {
        self.post("replay/stop").await
    }

    // === autopilot & control ===

    pub async fn start_autopilot(&self) -> Result<()> {
        self.post("autopilot/start").await
    }

    pub async fn stop_autopilot(&self) -> Result<()> {
        self.post("autopilot/stop").await
    }

    pub async fn reset_drone(&self) -> Result<()> {
        self.post("reset").await
    }

    pub async fn send_command(&self, command: &FlightCommand) -> Result<()> {
        self.call(Method::POST, "command", Some(command)).await.map(drop)
    }

    pub async fn last_command(&self) -> Result<Value> {
        self.get_json("command/last").await
    }

    pub async fn takeoff(&self) -> Result<()> {
        self.send_command(&FlightCommand::Takeoff).await
    }

    pub async fn land(&self) -> Result<()> {
        self.send_command(&FlightCommand::Land).await
    }

    pub async fn hold(&self) -> Result<()> {
        self.send_command(&FlightCommand::Hold).await
    }

    pub async fn return_home(&self) -> Result<()> {
        self.send_command(&FlightCommand::ReturnHome).await
    }

    pub async fn set_altitude(&self, target_m: f64) -> Result<()> {
        self.send_command(&FlightCommand::SetAltitude(target_m)).await
    }

    // === system & state ===

    pub async fn shutdown_server(&self) -> Result<()> {
        self.post("shutdown").await
    }

    pub async fn state(&self) -> Result<Value> {
        self.get_json("state").await
    }

    pub async fn raw_state(&self) -> Result<Value> {
        self.get_json("state/raw").await
    }

    pub async fn ai_state(&self) -> Result<Value> {
        self.get_json("ai/state").await
    }

    pub async fn metrics(&self) -> Result<Value> {
        self.get_json("metrics").await
    }

    pub async fn queue_sizes(&self) -> Result<Value> {
        self.get_json("debug/queues").await
    }

    pub async fn health(&self) -> Result<String> {
        self.get_text("health").await
    }

    // === events & analysis ===

    pub async fn trigger_event(&self) -> Result<()> {
        self.post("events/trigger").await
    }

    pub async fn recent_events(&self) -> Result<Vec<Event>> {
        self.get_json("events/recent").await
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<Value>> {
        self.get_json(&format!("history?limit={limit}")).await
    }

    pub async fn history_json(&self) -> Result<Vec<Value>> {
        self.get_json("history/json").await
    }

    pub async fn history_csv(&self) -> Result<String> {
        self.get_text("history/csv").await
    }

    pub async fn history_stats(&self) -> Result<Value> {
        self.get_json("history/stats").await
    }

    pub async fn risk_profile(&self) -> Result<Value> {
        self.get_json("risk").await
    }

    pub async fn system_integrity(&self) -> Result<Value> {
        self.get_json("integrity").await
    }

    // === plumbing ===

    async fn post(&self, path: &str) -> Result<()> {
        self.call(Method::POST, path, None::<&()>).await.map(drop)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let endpoint = self.endpoint(path);
        let res = self.call(Method::GET, path, None::<&()>).await?;
        res.json::<T>().await.map_err(|source| ApiError::Http { endpoint, source })
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let endpoint = self.endpoint(path);
        let res = self.call(Method::GET, path, None::<&()>).await?;
        res.text().await.map_err(|source| ApiError::Http { endpoint, source })
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let endpoint = self.endpoint(path);
        debug!(%method, %endpoint, "api: request");
        let mut req = self.http.request(method, &endpoint);
        if let Some(body) = body {
            req = req.json(body);
        }
        let res = req.send().await.map_err(|source| ApiError::Http {
            endpoint: endpoint.clone(),
            source,
        })?;
        let status = res.status();
        if !status.is_success() {
            return Err(ApiError::Status { endpoint, status });
        }
        Ok(res)
    }
}

/// Drops fragment and path from a base url, and any trailing slash.
fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if let Some(idx) = url.find('#') {
        url.truncate(idx);
    }
    if let Some(scheme_end) = url.find("://") {
        let rest = &url[scheme_end + 3..];
        if let Some(slash) = rest.find('/') {
            url.truncate(scheme_end + 3 + slash);
        }
    }
    url.trim_end_matches('/').to_string()
}

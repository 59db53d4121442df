use anyhow::Result;

use crate::config::StreamConfig;

pub fn check_tunables(cfg: &StreamConfig) -> Result<()> {
    anyhow::ensure!(cfg.reconnect_delay_ms >= 100, "stream.reconnect_delay_ms too small; set >= 100");
    anyhow::ensure!(cfg.heartbeat_interval_ms >= 100, "stream.heartbeat_interval_ms too small; set >= 100");
    anyhow::ensure!(cfg.message_rate_window_ms >= 100, "stream.message_rate_window_ms too small; set >= 100");
    anyhow::ensure!(cfg.unstable_after_attempts >= 1, "stream.unstable_after_attempts must be >= 1");
    anyhow::ensure!(cfg.log_retention >= 1, "stream.log_retention must be >= 1");
    anyhow::ensure!(cfg.trail_points >= 2, "stream.trail_points must be >= 2 to draw a path");
    anyhow::ensure!(cfg.expected_tick_step >= 1, "stream.expected_tick_step must be >= 1");
    Ok(())
}

pub fn check_endpoint(cfg: &StreamConfig, http_base: &str) -> Result<()> {
    let url = cfg.endpoint(http_base)?;
    anyhow::ensure!(url.host_str().is_some(), "stream endpoint has no host: {}", url);
    Ok(())
}

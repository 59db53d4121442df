use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use dronewatch_api::BackendClient;
use dronewatch_proto::grade::{BatteryStatus, LatencyGrade, RiskBand};
use dronewatch_proto::{Event, TelemetryEnvelope, TelemetryFrame};
use dronewatch_stream::{
    doctor as stream_doctor, ConnectionHealth, ConnectionState, StreamConfig, StreamManager, StreamSnapshot,
    WsConnector,
};

#[derive(Debug, Parser)]
#[command(name = "dronewatch", version, about = "dronewatch - live drone telemetry and mission control client")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Stream live telemetry and link health until Ctrl-C.
    Watch {
        /// Start with ingestion frozen (health keeps updating).
        #[arg(long)]
        paused: bool,
        /// Print every snapshot as a JSON line.
        #[arg(long)]
        json: bool,
    },
    Cmd { #[command(subcommand)] cmd: FlightCmd },
    Events,
    History {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    State,
    Health,
    Metrics,
    /// List recorded flight logs.
    Logs,
    /// Step through a recorded flight log.
    Replay {
        file: String,
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
    /// Have the backend replay its recording over the stream and watch it.
    ReplayLive {
        #[arg(long)]
        json: bool,
    },
    Show { #[command(subcommand)] what: ShowCmd },
}

#[derive(Debug, Subcommand)]
enum ShowCmd {
    Raw,
    Ai,
    Queues,
    LastCommand,
    Risk,
    Integrity,
    HistoryStats,
    HistoryJson,
    HistoryCsv,
}

#[derive(Debug, Subcommand)]
enum FlightCmd {
    Takeoff,
    Land,
    Hold,
    ReturnHome,
    SetAltitude { meters: f64 },
    TriggerEvent,
    Reset,
    /// Stop the backend process.
    Shutdown,
    Autopilot { #[command(subcommand)] cmd: AutopilotCmd },
}

#[derive(Debug, Subcommand)]
enum AutopilotCmd { Start, Stop }

#[derive(Debug, serde::Deserialize)]
struct Config {
    backend: BackendCfg,
    #[serde(default)]
    stream: StreamConfig,
}

#[derive(Debug, serde::Deserialize)]
struct BackendCfg {
    http_url: String,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Watch { paused, json } => watch(&cfg, paused, json).await?,
        Command::Cmd { cmd } => flight_cmd(&cfg, cmd).await?,
        Command::Events => events(&cfg).await?,
        Command::History { limit } => history(&cfg, limit).await?,
        Command::State => {
            let state = client(&cfg)?.state().await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::Health => println!("{}", client(&cfg)?.health().await?),
        Command::Metrics => {
            let metrics = client(&cfg)?.metrics().await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Command::Logs => logs(&cfg).await?,
        Command::Replay { file, interval_ms } => replay(&cfg, &file, interval_ms).await?,
        Command::ReplayLive { json } => replay_live(&cfg, json).await?,
        Command::Show { what } => show(&cfg, what).await?,
    }
    Ok(())
}

fn client(cfg: &Config) -> Result<BackendClient> {
    BackendClient::new(&cfg.backend.http_url).context("backend.http_url")
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    client(cfg)?;
    stream_doctor::check_tunables(&cfg.stream)?;
    stream_doctor::check_endpoint(&cfg.stream, &cfg.backend.http_url)?;
    if cfg.stream.ws_url.is_none() {
        info!("doctor: stream endpoint derived from backend.http_url");
    }
    info!("doctor: OK");
    Ok(())
}

async fn watch(cfg: &Config, paused: bool, json: bool) -> Result<()> {
    stream_doctor::check_tunables(&cfg.stream)?;
    let endpoint = cfg.stream.endpoint(&cfg.backend.http_url).context("stream endpoint")?;
    info!("watch: streaming from {}", endpoint);
    follow(&cfg.stream, endpoint, paused, json).await
}

async fn replay_live(cfg: &Config, json: bool) -> Result<()> {
    stream_doctor::check_tunables(&cfg.stream)?;
    let api = client(cfg)?;
    let endpoint = url::Url::parse(&api.replay_ws_url()).context("replay endpoint")?;
    api.start_replay().await?;
    info!("replay: streaming from {}", endpoint);
    let res = follow(&cfg.stream, endpoint, false, json).await;
    if let Err(e) = api.stop_replay().await {
        warn!("replay: stop failed: {}", e);
    }
    res
}

/// Streams snapshots from `endpoint` until Ctrl-C.
async fn follow(stream: &StreamConfig, endpoint: url::Url, paused: bool, json: bool) -> Result<()> {
    let handle = StreamManager::spawn(stream, WsConnector::new(endpoint));
    handle.set_paused(paused);
    let mut rx = handle.subscribe();
    let mut seen = Seen::default();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = rx.borrow_and_update().clone();
                if json {
                    println!("{}", serde_json::to_string(&snap)?);
                } else {
                    for line in report(&snap, &mut seen) {
                        println!("{line}");
                    }
                }
            }
            _ = &mut ctrl_c => {
                info!("watch: interrupted");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

#[derive(Debug, Default)]
struct Seen {
    tick: Option<u64>,
    state: ConnectionState,
    unstable: bool,
    event: Option<Event>,
    health: Option<ConnectionHealth>,
}

/// Lines to print for a snapshot: a frame line for each new tick, and a
/// health line when only the link bookkeeping moved.
fn report(snap: &StreamSnapshot, seen: &mut Seen) -> Vec<String> {
    let health = &snap.health;

    if snap.state != seen.state {
        info!("watch: link {:?} -> {:?}", seen.state, snap.state);
        seen.state = snap.state;
    }
    if health.unstable_connection != seen.unstable {
        if health.unstable_connection {
            warn!("watch: LINK LOST - {} reconnect attempts without a stable session", health.reconnect_attempts);
        } else {
            info!("watch: link stable");
        }
        seen.unstable = health.unstable_connection;
    }
    if snap.last_event.is_some() && snap.last_event != seen.event {
        if let Some(ev) = &snap.last_event {
            warn!("event {:?} severity={} tick={}: {}", ev.kind, ev.severity, ev.tick, ev.message);
        }
        seen.event = snap.last_event.clone();
    }

    let health_moved = seen.health.as_ref() != Some(health);
    seen.health = Some(health.clone());

    let mut lines = Vec::new();
    match &snap.current {
        Some(frame) if seen.tick != Some(frame.tick) => {
            seen.tick = Some(frame.tick);
            lines.push(format!("{} | {}", frame_line(frame), health_line(health)));
            if let Some(ai) = &frame.ai {
                if !ai.summary.is_empty() {
                    lines.push(format!("  ai severity={:.0}: {} ({} signals)", ai.severity, ai.summary, ai.signals.len()));
                }
            }
        }
        _ if health_moved => {
            let tag = if snap.paused { "paused" } else { "link" };
            lines.push(format!("[{tag}] {}", health_line(health)));
        }
        _ => {}
    }
    lines
}

fn frame_line(frame: &TelemetryFrame) -> String {
    format!(
        "tick={} alt={:.1}m speed={:.1}m/s batt={}% ({}) risk={}({:.0}) integrity={:?}{}",
        frame.tick,
        frame.altitude,
        frame.speed,
        frame.battery,
        BatteryStatus::from_percent(frame.battery),
        RiskBand::from_risk(frame.risk_level),
        frame.risk_level,
        frame.system_integrity,
        if frame.safe_mode { " SAFE-MODE" } else { "" },
    )
}

fn health_line(health: &ConnectionHealth) -> String {
    let latency = match health.latency_ms {
        Some(ms) => format!("{:.0}ms", ms),
        None => "-".to_string(),
    };
    format!(
        "latency={} ({}) mps={:.1} loss={} unstable={}",
        latency,
        LatencyGrade::from_latency(health.latency_ms),
        health.messages_per_second,
        if health.packet_loss { "yes" } else { "no" },
        if health.unstable_connection { "yes" } else { "no" },
    )
}

async fn flight_cmd(cfg: &Config, cmd: FlightCmd) -> Result<()> {
    let api = client(cfg)?;
    match &cmd {
        FlightCmd::Takeoff => api.takeoff().await?,
        FlightCmd::Land => api.land().await?,
        FlightCmd::Hold => api.hold().await?,
        FlightCmd::ReturnHome => api.return_home().await?,
        FlightCmd::SetAltitude { meters } => {
            anyhow::ensure!(meters.is_finite() && *meters >= 0.0, "altitude must be a non-negative number");
            api.set_altitude(*meters).await?
        }
        FlightCmd::TriggerEvent => api.trigger_event().await?,
        FlightCmd::Reset => api.reset_drone().await?,
        FlightCmd::Shutdown => api.shutdown_server().await?,
        FlightCmd::Autopilot { cmd: AutopilotCmd::Start } => api.start_autopilot().await?,
        FlightCmd::Autopilot { cmd: AutopilotCmd::Stop } => api.stop_autopilot().await?,
    }
    info!("cmd: {:?} sent", cmd);
    Ok(())
}

async fn events(cfg: &Config) -> Result<()> {
    let events = client(cfg)?.recent_events().await?;
    if events.is_empty() {
        println!("no recent events");
    }
    for ev in events {
        println!("tick={} {:?} severity={} {}", ev.tick, ev.kind, ev.severity, ev.message);
    }
    Ok(())
}

async fn logs(cfg: &Config) -> Result<()> {
    let files = client(cfg)?.list_logs().await?;
    if files.is_empty() {
        println!("no recorded logs");
    }
    for f in files {
        println!("{f}");
    }
    Ok(())
}

async fn replay(cfg: &Config, file: &str, interval_ms: u64) -> Result<()> {
    let records = client(cfg)?.get_log(file).await?;
    info!("replay: {} frames from {}", records.len(), file);
    let frames = replay_frames(records);

    let mut pace = tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let total = frames.len();
    for (i, frame) in frames.iter().enumerate() {
        tokio::select! {
            _ = pace.tick() => {}
            _ = &mut ctrl_c => {
                info!("replay: interrupted");
                return Ok(());
            }
        }
        println!("[{}/{}] {}", i + 1, total, frame_line(frame));
    }
    Ok(())
}

/// Decodes log records the way the live stream decodes frames; records that
/// are not telemetry at all are skipped.
fn replay_frames(records: Vec<serde_json::Value>) -> Vec<TelemetryFrame> {
    records
        .into_iter()
        .enumerate()
        .filter_map(|(i, rec)| match TelemetryEnvelope::from_record(rec) {
            Ok(env) => Some(env.into_frame()),
            Err(e) => {
                warn!("replay: skipping record {}: {}", i, e);
                None
            }
        })
        .collect()
}

async fn show(cfg: &Config, what: ShowCmd) -> Result<()> {
    let api = client(cfg)?;
    let value = match what {
        ShowCmd::Raw => api.raw_state().await?,
        ShowCmd::Ai => api.ai_state().await?,
        ShowCmd::Queues => api.queue_sizes().await?,
        ShowCmd::LastCommand => api.last_command().await?,
        ShowCmd::Risk => api.risk_profile().await?,
        ShowCmd::Integrity => api.system_integrity().await?,
        ShowCmd::HistoryStats => api.history_stats().await?,
        ShowCmd::HistoryJson => serde_json::Value::Array(api.history_json().await?),
        ShowCmd::HistoryCsv => {
            print!("{}", api.history_csv().await?);
            return Ok(());
        }
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn history(cfg: &Config, limit: usize) -> Result<()> {
    let rows = client(cfg)?.history(limit).await?;
    for row in rows {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

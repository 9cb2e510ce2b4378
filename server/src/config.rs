use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Haven real-time notification server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "haven-notify", version, about = "Haven real-time notification server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "HAVEN_PORT", default_value = "8090")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HAVEN_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./haven.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "HAVEN_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for the shared JWT signing key
    #[arg(long, env = "HAVEN_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Redis URL for the offline message queue; unset = in-memory store
    #[arg(long, env = "HAVEN_REDIS_URL")]
    pub redis_url: Option<String>,

    /// WebSocket tuning (loaded from [ws] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub ws: Option<WsConfig>,

    /// Offline queue tuning (loaded from [queue] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub queue: Option<QueueSettings>,
}

/// Per-connection WebSocket knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Outbound buffer capacity per connection (default: 64)
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds of pong silence tolerated beyond the ping interval (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Inbound frame rate limit: bucket capacity (default: 10)
    #[serde(default = "default_rate_burst")]
    pub rate_limit_burst: u32,

    /// Inbound frame rate limit: sustained frames per minute (default: 30)
    #[serde(default = "default_rate_per_minute")]
    pub rate_limit_per_minute: u32,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 64,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            rate_limit_burst: 10,
            rate_limit_per_minute: 30,
        }
    }
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

fn default_rate_burst() -> u32 {
    10
}

fn default_rate_per_minute() -> u32 {
    30
}

/// Retention knobs for the offline message queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// TTL in seconds for critical-priority messages (default: 86400 = 24h)
    #[serde(default = "default_critical_ttl")]
    pub critical_ttl_secs: u64,

    /// TTL in seconds for normal-priority messages (default: 3600 = 1h)
    #[serde(default = "default_normal_ttl")]
    pub normal_ttl_secs: u64,

    /// Interval in seconds between expiry sweeps (default: 300)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            critical_ttl_secs: 86400,
            normal_ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

fn default_critical_ttl() -> u64 {
    86400
}

fn default_normal_ttl() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8090,
            bind_address: "0.0.0.0".to_string(),
            config: "./haven.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            redis_url: None,
            ws: Some(WsConfig::default()),
            queue: Some(QueueSettings::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (HAVEN_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("HAVEN_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Haven Notification Server Configuration
# Place this file at ./haven.toml or specify with --config <path>
# All settings can be overridden via environment variables (HAVEN_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8090)
# port = 8090

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the JWT signing key shared with the auth service
# data_dir = "./data"

# Redis URL backing the offline message queue.
# When unset, queued messages are held in process memory and are lost on
# restart — fine for single-node development, not for production.
# redis_url = "redis://127.0.0.1:6379"

# ---- WebSocket tuning ----
# [ws]

# Outbound buffer capacity per connection. When full, the oldest
# non-critical message is dropped (the router never blocks).
# outbound_buffer = 64

# Heartbeat: server ping interval and tolerated pong silence
# ping_interval_secs = 30
# pong_timeout_secs = 10

# Inbound frame rate limit (token bucket per connection)
# rate_limit_burst = 10
# rate_limit_per_minute = 30

# ---- Offline queue retention ----
# [queue]

# Critical alerts survive a day; routine updates an hour.
# critical_ttl_secs = 86400
# normal_ttl_secs = 3600

# Background expiry sweep interval
# sweep_interval_secs = 300
"#
    .to_string()
}

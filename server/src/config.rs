use std::time::Duration;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Value},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::ws::session::SessionConfig;

/// Conversation relay server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "relay-server", version, about = "Conversation relay server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "RELAY_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "RELAY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./relay.toml")]
    pub config: String,

    /// Enable structured JSON logging
    #[arg(long, env = "RELAY_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Print a credential for the given username and exit
    #[arg(long, value_name = "USERNAME")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_token: Option<String>,

    /// Data directory for the database and generated secret
    #[arg(long, env = "RELAY_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// HMAC secret for credentials; generated into data_dir when unset
    #[arg(long, env = "RELAY_JWT_SECRET", hide_env_values = true)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Seconds to wait for the handshake credential (0 = no limit)
    #[arg(long, env = "RELAY_HANDSHAKE_TIMEOUT_SECS", default_value = "10")]
    pub handshake_timeout_secs: u64,

    /// Largest accepted handshake frame in bytes
    #[arg(long, env = "RELAY_MAX_HANDSHAKE_BYTES", default_value = "8192")]
    pub max_handshake_bytes: usize,

    /// Close the older connection when a user reconnects
    #[arg(long, env = "RELAY_CLOSE_SUPERSEDED", default_value = "true", action = clap::ArgAction::Set)]
    pub close_superseded: bool,

    /// Keepalive ping interval in seconds (0 = disabled)
    #[arg(long, env = "RELAY_PING_INTERVAL_SECS", default_value = "30")]
    pub ping_interval_secs: u64,

    /// Seconds a ping may go unanswered before the connection is closed (0 = never)
    #[arg(long, env = "RELAY_PONG_TIMEOUT_SECS", default_value = "10")]
    pub pong_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./relay.toml".to_string(),
            json_logs: false,
            generate_config: false,
            issue_token: None,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            handshake_timeout_secs: 10,
            max_handshake_bytes: 8192,
            close_superseded: true,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(&Config::command().get_matches())
    }

    /// Only flags actually given on the command line override the lower
    /// layers; clap's own defaults never do.
    pub fn load_from(matches: &ArgMatches) -> Result<Self, figment::Error> {
        let cli = Config::from_arg_matches(matches)
            .map_err(|e| figment::Error::from(e.to_string()))?;
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("RELAY_"))
            .merge(Serialized::defaults(command_line_only(&cli, matches)?))
            .extract()
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            handshake_timeout: non_zero_secs(self.handshake_timeout_secs),
            max_handshake_bytes: self.max_handshake_bytes,
            close_superseded: self.close_superseded,
            ping_interval: non_zero_secs(self.ping_interval_secs),
            pong_timeout: non_zero_secs(self.pong_timeout_secs),
        }
    }
}

fn command_line_only(cli: &Config, matches: &ArgMatches) -> Result<Dict, figment::Error> {
    let mut values = Value::serialize(cli)?.into_dict().unwrap_or_default();
    values.retain(|key, _| matches.value_source(key) == Some(ValueSource::CommandLine));
    Ok(values)
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Relay Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging
# json_logs = false

# Data directory for the SQLite database and generated JWT secret
# data_dir = "./data"

# HMAC secret used to verify credentials.
# Prefer the RELAY_JWT_SECRET environment variable over this file.
# jwt_secret = ""

# ---- Handshake ----
# Seconds a new socket may take to present its credential (0 = no limit)
# handshake_timeout_secs = 10

# Largest credential frame accepted, in bytes
# max_handshake_bytes = 8192

# ---- Sessions ----
# Close a user's older connection when they authenticate again
# close_superseded = true

# Keepalive ping interval in seconds (0 = disabled)
# ping_interval_secs = 30

# Seconds a ping may go unanswered before the connection is closed (0 = never)
# pong_timeout_secs = 10
"#
    .to_string()
}

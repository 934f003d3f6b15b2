//! Configuration system for the `taskdeck` client.
//!
//! Each setting is taken from the first source that has it: command-line
//! flag, its `TASKDECK_*` environment variable, the TOML file
//! (`~/.config/taskdeck/config.toml` or `--config`), then the default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use taskdeck_proto::task::MAX_TASK_TITLE_LENGTH;

use crate::net::{DEFAULT_CHANNEL_CAPACITY, NetConfig};
use crate::transport::http::DEFAULT_REQUEST_TIMEOUT;
use crate::transport::ws::WsConfig;

/// API endpoint used when none is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:3000/graphql";

/// Errors from loading or resolving the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read, or `--config` names a
    /// missing file.
    #[error("cannot read config file {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },

    /// The config file is not valid TOML for this schema.
    #[error("invalid config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The API URL has no WebSocket counterpart.
    #[error("cannot derive a WebSocket URL from {0}; set --ws-url")]
    NoWsUrl(String),
}

// --- file schema: every key optional, absent keys fall through ---

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    auth: AuthFileConfig,
    ui: UiFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    api_url: Option<String>,
    ws_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    keep_alive_secs: Option<u64>,
    lazy_close_secs: Option<u64>,
    retry_attempts: Option<u32>,
    channel_capacity: Option<usize>,
}

/// `[auth]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AuthFileConfig {
    credentials_file: Option<PathBuf>,
    sign_in_url: Option<String>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    poll_timeout_ms: Option<u64>,
    max_task_title_len: Option<usize>,
}

/// Settings after layering; every field has a value.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// GraphQL HTTP endpoint.
    pub api_url: String,
    /// GraphQL WebSocket endpoint; derived from `api_url` when unset.
    pub ws_url: Option<String>,
    /// Timeout for TCP connect and the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Whole-request timeout for queries and mutations.
    pub request_timeout: Duration,
    /// Interval between WebSocket keep-alive pings.
    pub keep_alive: Duration,
    /// How long an idle WebSocket stays open.
    pub lazy_close: Duration,
    /// WebSocket reconnect attempts before giving up.
    pub retry_attempts: u32,
    /// Channel capacity for command/event mpsc channels.
    pub channel_capacity: usize,

    // -- Auth --
    /// Token file; `None` uses the platform data directory.
    pub credentials_file: Option<PathBuf>,
    /// Where anonymous users can sign in.
    pub sign_in_url: Option<String>,

    // -- UI --
    /// Poll timeout for the TUI event loop.
    pub poll_timeout: Duration,
    /// Maximum task title length in characters.
    pub max_task_title_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            keep_alive: Duration::from_secs(15),
            lazy_close: Duration::from_secs(30),
            retry_attempts: 5,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            credentials_file: None,
            sign_in_url: None,
            poll_timeout: Duration::from_millis(50),
            max_task_title_len: MAX_TASK_TITLE_LENGTH,
        }
    }
}

impl ClientConfig {
    /// Layers `cli` over the config file over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Titles longer than the protocol limit are clamped to it.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.network.api_url.clone())
                .unwrap_or(defaults.api_url),
            ws_url: cli.ws_url.clone().or_else(|| file.network.ws_url.clone()),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .network
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            keep_alive: file
                .network
                .keep_alive_secs
                .map_or(defaults.keep_alive, Duration::from_secs),
            lazy_close: file
                .network
                .lazy_close_secs
                .map_or(defaults.lazy_close, Duration::from_secs),
            retry_attempts: file
                .network
                .retry_attempts
                .unwrap_or(defaults.retry_attempts),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            credentials_file: cli
                .credentials_file
                .clone()
                .or_else(|| file.auth.credentials_file.clone()),
            sign_in_url: file.auth.sign_in_url.clone(),
            poll_timeout: file
                .ui
                .poll_timeout_ms
                .map_or(defaults.poll_timeout, Duration::from_millis),
            max_task_title_len: file
                .ui
                .max_task_title_len
                .map_or(defaults.max_task_title_len, |n| {
                    n.min(MAX_TASK_TITLE_LENGTH)
                }),
        }
    }

    /// The WebSocket endpoint: `ws_url` if set, else `api_url` with
    /// `http` → `ws` and `https` → `wss`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoWsUrl`] if `api_url` is neither `http` nor
    /// `https` and no explicit WebSocket URL is configured.
    pub fn resolved_ws_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.ws_url {
            return Ok(url.clone());
        }
        derive_ws_url(&self.api_url).ok_or_else(|| ConfigError::NoWsUrl(self.api_url.clone()))
    }

    /// Build a [`WsConfig`] from this configuration.
    ///
    /// # Errors
    ///
    /// See [`Self::resolved_ws_url`].
    pub fn ws_config(&self) -> Result<WsConfig, ConfigError> {
        let mut ws = WsConfig::new(self.resolved_ws_url()?);
        ws.connect_timeout = self.connect_timeout;
        ws.keep_alive = self.keep_alive;
        ws.lazy_close = self.lazy_close;
        ws.retry_attempts = self.retry_attempts;
        Ok(ws)
    }

    /// Build a [`NetConfig`] from this configuration.
    #[must_use]
    pub const fn net_config(&self) -> NetConfig {
        NetConfig {
            channel_capacity: self.channel_capacity,
        }
    }
}

/// Command line of `taskdeck`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal task list for a GraphQL task API")]
pub struct CliArgs {
    /// GraphQL HTTP endpoint.
    #[arg(long, env = "TASKDECK_API_URL")]
    pub api_url: Option<String>,

    /// GraphQL WebSocket endpoint (default: derived from the API URL).
    #[arg(long, env = "TASKDECK_WS_URL")]
    pub ws_url: Option<String>,

    /// Use this bearer token for the session without storing it.
    #[arg(long, env = "TASKDECK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Sign-in redirect URL carrying a token to store.
    #[arg(long)]
    pub redirect_url: Option<String>,

    /// Remove the stored token and exit.
    #[arg(long)]
    pub logout: bool,

    /// Token file (default: `<data dir>/taskdeck/token`).
    #[arg(long)]
    pub credentials_file: Option<PathBuf>,

    /// Config file to read instead of `~/.config/taskdeck/config.toml`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// `tracing` filter, e.g. `debug` or `taskdeck=trace`. `RUST_LOG` wins.
    #[arg(long, default_value = "info", env = "TASKDECK_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskdeck.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn derive_ws_url(api_url: &str) -> Option<String> {
    if let Some(rest) = api_url.strip_prefix("https://") {
        Some(format!("wss://{rest}"))
    } else {
        api_url
            .strip_prefix("http://")
            .map(|rest| format!("ws://{rest}"))
    }
}

/// `~/.config/taskdeck/config.toml`, if the platform has a config dir.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("taskdeck").join("config.toml"))
}

/// Reads `explicit_path`, which must exist, or else the default file,
/// which may be absent.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let (path, required) = match explicit_path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(ConfigFile::default()),
        },
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(ConfigFile::default())
        }
        Err(source) => Err(ConfigError::ReadFile { path, source }),
    }
}

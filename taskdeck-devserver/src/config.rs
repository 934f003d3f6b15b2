//! Configuration for the development server.
//!
//! Flags and their `TASKDECK_DEVSERVER_*` variables win over the `[server]`
//! table of `~/.config/taskdeck-devserver/config.toml`, which wins over the
//! built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use taskdeck_proto::task::MAX_TASK_TITLE_LENGTH;

/// Why the config file could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
}

/// `[server]`; every key is optional.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    require_token: Option<String>,
    max_title_len: Option<usize>,
    init_timeout_secs: Option<u64>,
}

/// Command line of `taskdeck-devserver`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "In-memory GraphQL task API for taskdeck")]
pub struct ServerCliArgs {
    /// Listen address, e.g. `127.0.0.1:3000`.
    #[arg(short, long, env = "TASKDECK_DEVSERVER_ADDR")]
    pub bind: Option<String>,

    /// Reject clients that do not present this bearer token.
    #[arg(long, env = "TASKDECK_DEVSERVER_TOKEN", hide_env_values = true)]
    pub require_token: Option<String>,

    /// Config file to read instead of the default one.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// `tracing` filter for stderr output.
    #[arg(long, default_value = "info", env = "TASKDECK_DEVSERVER_LOG")]
    pub log_level: String,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `127.0.0.1:3000`).
    pub bind_addr: String,
    /// Bearer token clients must present; `None` accepts everyone.
    pub require_token: Option<String>,
    /// Maximum task title length in characters.
    pub max_title_len: usize,
    /// How long a WebSocket client has to send `connection_init`.
    pub init_timeout: Duration,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            require_token: None,
            max_title_len: MAX_TASK_TITLE_LENGTH,
            init_timeout: Duration::from_secs(10),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Resolves the final settings from `cli` and the config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unreadable or malformed file. A missing
    /// default file is not an error; a missing `--config` file is.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    fn resolve(cli: &ServerCliArgs, file: &ServerConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            require_token: cli
                .require_token
                .clone()
                .or_else(|| file.server.require_token.clone())
                .filter(|t| !t.is_empty()),
            max_title_len: file
                .server
                .max_title_len
                .unwrap_or(defaults.max_title_len),
            init_timeout: file
                .server
                .init_timeout_secs
                .map_or(defaults.init_timeout, Duration::from_secs),
            log_level: cli.log_level.clone(),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("taskdeck-devserver").join("config.toml"))
}

fn load_config_file(explicit_path: Option<&Path>) -> Result<ServerConfigFile, ConfigError> {
    let (path, required) = match explicit_path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(ServerConfigFile::default()),
        },
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(ServerConfigFile::default())
        }
        Err(source) => Err(ConfigError::ReadFile { path, source }),
    }
}

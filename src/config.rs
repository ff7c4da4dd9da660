//! Configuration module for line-echo server.
//!
//! Values come from command-line arguments, environment variables and an
//! optional TOML configuration file. For the listen address the order is:
//! explicit flag, then `HOST`/`PORT` environment variables, then the
//! positional port argument, then the TOML file, then built-in defaults.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::sync::Semaphore;

/// Environment variable consulted for the bind host.
pub const HOST_ENV: &str = "HOST";
/// Environment variable consulted for the bind port.
pub const PORT_ENV: &str = "PORT";

/// Command-line arguments for the line server
#[derive(Parser, Debug, Default)]
#[command(name = "line-echo")]
#[command(author = "line-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A CRLF line server: PING -> PONG, everything else echoed", long_about = None)]
pub struct CliArgs {
    /// Port to listen on (lower precedence than --port and $PORT)
    #[arg(value_name = "PORT")]
    pub positional_port: Option<u16>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host or IP address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// I/O runtime to serve connections with
    #[arg(short, long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Maximum line length in bytes, excluding CRLF (0 = unlimited)
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Which event loop drives the connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Current-thread tokio runtime, one task per connection.
    #[default]
    Tokio,
    /// Single-threaded mio poll loop.
    Mio,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub runtime: RuntimeType,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Line sent to every client right after accept
    #[serde(default = "default_welcome")]
    pub welcome: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            runtime: RuntimeType::default(),
            max_connections: default_max_connections(),
            welcome: default_welcome(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// TCP keep-alive idle time in seconds (0 disables)
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            keepalive: default_keepalive(),
            nodelay: default_nodelay(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_max_connections() -> usize {
    10_000
}

fn default_welcome() -> String {
    "WELCOME".to_string()
}

fn default_max_frame_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_keepalive() -> u64 {
    15
}

fn default_nodelay() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub runtime: RuntimeType,
    /// Longest accepted line, 0 means no limit
    pub max_frame_size: usize,
    pub max_connections: usize,
    pub keepalive: u64,
    pub nodelay: bool,
    pub welcome: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            runtime: RuntimeType::default(),
            max_frame_size: default_max_frame_size(),
            max_connections: default_max_connections(),
            keepalive: default_keepalive(),
            nodelay: default_nodelay(),
            welcome: default_welcome(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from process arguments, environment and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, |name| std::env::var(name).ok(), toml_config)
    }

    /// Merge the three configuration sources.
    ///
    /// `env` looks up an environment variable by name; empty values are
    /// treated as unset.
    pub fn resolve<F>(cli: CliArgs, env: F, toml_config: TomlConfig) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| env(name).filter(|value| !value.is_empty());

        let env_port = match lookup(PORT_ENV) {
            Some(value) => Some(value.trim().parse::<u16>().map_err(|_| {
                ConfigError::InvalidEnv {
                    var: PORT_ENV,
                    value,
                }
            })?),
            None => None,
        };

        let host = cli
            .host
            .or_else(|| lookup(HOST_ENV))
            .or(toml_config.server.host)
            .unwrap_or_else(default_host);

        let port = cli
            .port
            .or(env_port)
            .or(cli.positional_port)
            .or(toml_config.server.port)
            .unwrap_or_else(default_port);

        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 || max_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidMaxConnections(max_connections));
        }

        Ok(Config {
            host,
            port,
            runtime: cli.runtime.unwrap_or(toml_config.server.runtime),
            max_frame_size: cli
                .max_frame_size
                .unwrap_or(toml_config.connection.max_frame_size),
            max_connections,
            keepalive: toml_config.connection.keepalive,
            nodelay: toml_config.connection.nodelay,
            welcome: toml_config.server.welcome,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// `host:port` string suitable for binding.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Frame limit as an option, `None` when unlimited.
    pub fn frame_limit(&self) -> Option<usize> {
        (self.max_frame_size > 0).then_some(self.max_frame_size)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidEnv { var: &'static str, value: String },
    InvalidMaxConnections(usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidEnv { var, value } => {
                write!(f, "Invalid value for ${var}: '{value}'")
            }
            ConfigError::InvalidMaxConnections(n) => write!(
                f,
                "max_connections must be between 1 and {}, got {n}",
                Semaphore::MAX_PERMITS
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/beacon/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/beacon/` (~/.config/beacon/)
//! - Data: `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
//! - State/Logs: `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Log file name before the rotation date suffix
pub const LOG_FILE_PREFIX: &str = "beacon.log";

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Production collector address
    #[serde(default)]
    pub server: ServerConfig,

    /// Collector address used in testing mode
    #[serde(default = "ServerConfig::testing", rename = "server-testing")]
    pub server_testing: ServerConfig,

    /// Client behaviour
    #[serde(default)]
    pub client: ClientSection,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            server_testing: ServerConfig::testing(),
            client: ClientSection::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Collector host and port
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_server_hostname")]
    pub hostname: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_server_hostname(),
            port: default_server_port(),
        }
    }
}

impl ServerConfig {
    /// Defaults for the `[server-testing]` section
    pub fn testing() -> Self {
        Self {
            hostname: default_server_hostname(),
            port: default_testing_port(),
        }
    }

    /// Base URL of the collector, without the API prefix
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }
}

fn default_server_hostname() -> String {
    "localhost".to_string()
}

fn default_server_port() -> u16 {
    5600
}

fn default_testing_port() -> u16 {
    5666
}

/// `[client]` section
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSection {
    /// Seconds between heartbeat commits for watchers that batch their pulses
    #[serde(default = "default_commit_interval")]
    pub commit_interval: u64,

    /// Fixed delay between reconnect attempts while disconnected
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            commit_interval: default_commit_interval(),
            reconnect_interval_secs: default_reconnect_interval(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_commit_interval() -> u64 {
    30
}

fn default_reconnect_interval() -> u64 {
    10
}

fn default_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Everything a running client needs, resolved and injected.
///
/// Nothing in the dispatch subsystem reads global paths; the storage root
/// comes from here so tests can point it at a temp directory.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity of this client; names the overflow file and tags buckets
    pub client_name: String,
    /// Host name reported when creating buckets
    pub hostname: String,
    /// Collector base URL, e.g. `http://localhost:5600`
    pub server_url: String,
    /// Directory under which the overflow store lives
    pub storage_root: PathBuf,
    /// Fixed backoff between handshake attempts
    pub reconnect_interval: Duration,
    /// HTTP request timeout
    pub request_timeout: Duration,
    /// Whether the testing server was selected
    pub testing: bool,
}

impl ClientConfig {
    /// Config for `client_name` with defaults and the given storage root.
    pub fn new(client_name: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            client_name: client_name.into(),
            hostname: local_hostname(),
            server_url: ServerConfig::default().url(),
            storage_root: storage_root.into(),
            reconnect_interval: Duration::from_secs(default_reconnect_interval()),
            request_timeout: Duration::from_secs(default_timeout()),
            testing: false,
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.client_name.trim().is_empty() {
            return Err(Error::Config("client_name must not be empty".to_string()));
        }
        if self.client_name.contains(['/', '\\']) || self.client_name == ".." {
            return Err(Error::Config(format!(
                "client_name must not contain path separators: {}",
                self.client_name
            )));
        }
        if self.reconnect_interval.is_zero() {
            return Err(Error::Config(
                "reconnect_interval must be greater than zero".to_string(),
            ));
        }
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "server_url must start with http:// or https://: {}",
                self.server_url
            )));
        }
        Ok(())
    }

    /// Path of the overflow file for this client
    ///
    /// `<storage_root>/queued/<client_name>.jsonl`
    pub fn overflow_path(&self) -> PathBuf {
        self.storage_root
            .join("queued")
            .join(format!("{}.jsonl", self.client_name))
    }
}

/// Host name of this machine, or "unknown" when it cannot be read
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Resolve the runtime configuration for one client identity
    pub fn client_config(&self, client_name: &str, testing: bool) -> ClientConfig {
        let server = if testing {
            &self.server_testing
        } else {
            &self.server
        };

        ClientConfig {
            client_name: client_name.to_string(),
            hostname: local_hostname(),
            server_url: server.url(),
            storage_root: Self::data_dir(),
            reconnect_interval: Duration::from_secs(self.client.reconnect_interval_secs),
            request_timeout: Duration::from_secs(self.client.timeout_secs),
            testing,
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/beacon/config.toml` (~/.config/beacon/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("beacon").join("config.toml")
    }

    /// Returns the data directory path (storage root for queued requests)
    ///
    /// `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("beacon")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("beacon")
    }

    /// Returns today's log file path
    ///
    /// `$XDG_STATE_HOME/beacon/beacon.log.YYYY-MM-DD`; files rotate daily
    /// on the UTC date.
    pub fn log_path() -> PathBuf {
        Self::state_dir().join(format!(
            "{}.{}",
            LOG_FILE_PREFIX,
            chrono::Utc::now().format("%Y-%m-%d")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sections_match_empty_file() {
        let parsed: Config = toml::from_str("").unwrap();
        let defaults = Config::default();
        assert_eq!(parsed.server, defaults.server);
        assert_eq!(parsed.server_testing, defaults.server_testing);
        assert_eq!(parsed.server.port, 5600);
        assert_eq!(parsed.server_testing.port, 5666);
        assert_eq!(parsed.client.commit_interval, 30);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
hostname = "collector.lan"
port = 8080

[server-testing]
port = 9999

[client]
commit_interval = 10
reconnect_interval_secs = 3

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.server.url(), "http://collector.lan:8080");
        assert_eq!(config.server_testing.url(), "http://localhost:9999");
        assert_eq!(config.client.commit_interval, 10);
        assert_eq!(config.client.reconnect_interval_secs, 3);
        assert_eq!(config.client.timeout_secs, 30);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_client_config_selects_testing_server() {
        let config: Config = toml::from_str("[client]\nreconnect_interval_secs = 7\n").unwrap();

        let prod = config.client_config("watcher", false);
        assert_eq!(prod.server_url, "http://localhost:5600");
        assert!(!prod.testing);

        let testing = config.client_config("watcher", true);
        assert_eq!(testing.server_url, "http://localhost:5666");
        assert_eq!(testing.reconnect_interval, Duration::from_secs(7));
        assert!(testing.testing);
    }

    #[test]
    fn test_client_config_validation() {
        let config = ClientConfig::new("watcher", "/tmp/beacon");
        assert!(config.validate().is_ok());

        let config = ClientConfig::new("", "/tmp/beacon");
        assert!(config.validate().is_err());

        let config = ClientConfig::new("../escape", "/tmp/beacon");
        assert!(config.validate().is_err());

        let config = ClientConfig {
            reconnect_interval: Duration::ZERO,
            ..ClientConfig::new("watcher", "/tmp/beacon")
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            server_url: "localhost:5600".to_string(),
            ..ClientConfig::new("watcher", "/tmp/beacon")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overflow_path_is_per_client() {
        let config = ClientConfig::new("aw-watcher-window", "/data");
        assert_eq!(
            config.overflow_path(),
            PathBuf::from("/data/queued/aw-watcher-window.jsonl")
        );
    }
}

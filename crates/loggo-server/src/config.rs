//! Server configuration loading from file and environment variables.

use chrono_tz::Tz;
use loggo_events::CreateChannelParams;
use loggo_types::{parse_duration, DurationParseError, DEFAULT_ENTRY_TTL};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// IANA timezone used when reporting times in logs.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retention sweep settings.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Subscriber publish settings.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Embedded MQTT broker settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Channels created at startup when absent.
    #[serde(default)]
    pub channels: Vec<CreateChannelParams>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally visible base URL, used to build event data links.
    /// Defaults to `http://<host>:<port>`.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ServerConfig {
    /// The base URL data links are built from, without a trailing slash.
    pub fn public_base_url(&self) -> String {
        match &self.base_url {
            Some(url) if !url.trim().is_empty() => url.trim().trim_end_matches('/').to_string(),
            _ => format!("http://{}:{}", self.host, self.port),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "loggo_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Retention configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// TTL for channels without their own, in Go duration syntax.
    #[serde(default = "default_ttl")]
    pub default_ttl: String,

    /// Seconds between retention sweeps.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

/// Publish configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Messages buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_publish_capacity")]
    pub capacity: usize,
}

/// Embedded MQTT broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Whether to run the broker at all.
    #[serde(default = "default_mqtt_enabled")]
    pub enabled: bool,

    /// Address the broker listens on; shares `server.host` when unset.
    #[serde(default)]
    pub host: Option<IpAddr>,

    /// TCP port for MQTT 3.1.1 clients.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Largest accepted publish payload, in bytes.
    #[serde(default = "default_mqtt_max_payload")]
    pub max_payload_size: usize,
}

/// Where a loaded [`Config`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No file at the given path; built-in defaults plus environment.
    Defaults,
}

fn default_timezone() -> String {
    "Etc/UTC".to_string()
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "data/loggo.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ttl() -> String {
    DEFAULT_ENTRY_TTL.to_string()
}

fn default_interval_seconds() -> u64 {
    3_600
}

fn default_publish_capacity() -> usize {
    256
}

fn default_mqtt_enabled() -> bool {
    true
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_max_payload() -> usize {
    1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            retention: RetentionConfig::default(),
            publish: PublishConfig::default(),
            mqtt: MqttConfig::default(),
            channels: Vec::new(),
        }
    }
}

impl MqttConfig {
    /// The broker's bind address, falling back to `fallback_host`.
    pub fn listen_addr(&self, fallback_host: IpAddr) -> SocketAddr {
        SocketAddr::new(self.host.unwrap_or(fallback_host), self.port)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_enabled(),
            host: None,
            port: default_mqtt_port(),
            max_payload_size: default_mqtt_max_payload(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_ttl(),
            interval_seconds: default_interval_seconds(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            capacity: default_publish_capacity(),
        }
    }
}

impl Config {
    /// Parses the configured timezone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTimezone`] for a name the IANA
    /// database does not know.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    /// Checks the settings a running server cannot recover from.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unknown timezone, an unparsable
    /// default TTL, or a zero retention interval.
    pub fn validate(&self) -> Result<Tz, ConfigError> {
        let tz = self.timezone()?;
        parse_duration(&self.retention.default_ttl).map_err(|source| ConfigError::InvalidTtl {
            ttl: self.retention.default_ttl.clone(),
            source,
        })?;
        if self.retention.interval_seconds == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        Ok(tz)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The timezone is not a known IANA name.
    #[error("unknown timezone: {0:?}")]
    InvalidTimezone(String),

    /// The default TTL does not parse as a duration.
    #[error("invalid default ttl {ttl:?}: {source}")]
    InvalidTtl {
        ttl: String,
        source: DurationParseError,
    },

    /// The retention interval is zero.
    #[error("retention.interval_seconds must be greater than zero")]
    InvalidInterval,
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `LOGGO_TZ` overrides `timezone`
/// - `LOGGO_HOST` overrides `server.host`
/// - `LOGGO_PORT` overrides `server.port`
/// - `LOGGO_BASE_URL` overrides `server.base_url`
/// - `LOGGO_DB_PATH` overrides `database.path`
/// - `LOGGO_LOG_LEVEL` overrides `logging.level`
/// - `LOGGO_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `LOGGO_DEFAULT_TTL` overrides `retention.default_ttl`
/// - `LOGGO_RETENTION_INTERVAL` overrides `retention.interval_seconds`
/// - `LOGGO_MQTT_ENABLED` overrides `mqtt.enabled`
/// - `LOGGO_MQTT_PORT` overrides `mqtt.port`
///
/// Nothing is logged here since tracing is configured from the result;
/// the returned [`ConfigSource`] tells the caller whether defaults were used.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<(Config, ConfigSource), ConfigError> {
    let (mut config, source) = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => (toml::from_str(&contents)?, ConfigSource::File),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (Config::default(), ConfigSource::Defaults)
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => (Config::default(), ConfigSource::Defaults),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok((config, source))
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(tz) = var("LOGGO_TZ") {
        config.timezone = tz;
    }
    if let Some(host) = var("LOGGO_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("LOGGO_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(base_url) = var("LOGGO_BASE_URL") {
        config.server.base_url = Some(base_url);
    }
    if let Some(db_path) = var("LOGGO_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("LOGGO_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("LOGGO_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(ttl) = var("LOGGO_DEFAULT_TTL") {
        config.retention.default_ttl = ttl;
    }
    if let Some(interval) = var("LOGGO_RETENTION_INTERVAL") {
        if let Ok(parsed) = interval.parse() {
            config.retention.interval_seconds = parsed;
        }
    }
    if let Some(enabled) = var("LOGGO_MQTT_ENABLED") {
        config.mqtt.enabled = matches!(enabled.as_str(), "1" | "true" | "TRUE");
    }
    if let Some(port) = var("LOGGO_MQTT_PORT") {
        if let Ok(parsed) = port.parse() {
            config.mqtt.port = parsed;
        }
    }
}

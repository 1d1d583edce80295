//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::StreamError;

/// Streaming client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// gRPC channel configuration
    #[serde(default)]
    pub grpc: GrpcConfig,

    /// Credential configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Reconnect backoff configuration
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Calculation member identity
    #[serde(default)]
    pub member: MemberConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// gRPC channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcConfig {
    /// Platform endpoint; `https` enables TLS
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// HTTP/2 keep-alive ping interval in seconds
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_secs: u64,

    /// Time to wait for a keep-alive pong in seconds
    #[serde(default = "default_keep_alive_timeout")]
    pub keep_alive_timeout_secs: u64,

    /// Send keep-alive pings while no call is active
    #[serde(default = "default_true")]
    pub keep_alive_while_idle: bool,

    /// Maximum encoded/decoded message size in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            keep_alive_interval_secs: 10,
            keep_alive_timeout_secs: 30,
            keep_alive_while_idle: true,
            max_message_bytes: 32 * 1024 * 1024, // 32MB
            connect_timeout_secs: 10,
        }
    }
}

impl GrpcConfig {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Credential configuration.
///
/// A `static_token` wins over the client-credentials grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// OAuth2 token endpoint
    #[serde(default)]
    pub token_url: Option<String>,

    /// OAuth2 client id
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth2 client secret
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Fixed bearer token
    #[serde(default)]
    pub static_token: Option<String>,

    /// Token request timeout in seconds
    #[serde(default = "default_token_timeout")]
    pub request_timeout_secs: u64,

    /// Refresh tokens this many seconds before they expire
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: None,
            client_id: None,
            client_secret: None,
            static_token: None,
            request_timeout_secs: 10,
            refresh_margin_secs: 30,
        }
    }
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// First delay after a failed attempt, in seconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    /// Upper bound for the delay, in seconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 30,
        }
    }
}

/// Calculation member identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Owner stamped on every outbound envelope
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Tags announced in the join event
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            tags: default_tags(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "https://localhost:443".to_string()
}

fn default_keep_alive_interval() -> u64 {
    10
}

fn default_keep_alive_timeout() -> u64 {
    30
}

fn default_max_message_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_token_timeout() -> u64 {
    10
}

fn default_refresh_margin() -> u64 {
    30
}

fn default_initial_backoff() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    30
}

fn default_owner() -> String {
    "PLAY".to_string()
}

fn default_tags() -> Vec<String> {
    vec!["rust".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    /// Load configuration: defaults, then the optional file, then `CYODA__*`
    /// environment variables (e.g. `CYODA__GRPC__ENDPOINT`).
    pub fn load(path: Option<&str>) -> Result<Self, StreamError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ClientConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CYODA")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect.initial_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect.max_backoff_secs)
    }
}

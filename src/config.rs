//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides
//! (prefix `DEVICE_QUERY_`).

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub permissions: PermissionsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device data store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_connection_string")]
    pub connection_string: String,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

fn default_connection_string() -> String {
    dirs::data_local_dir()
        .map(|p| {
            p.join("device-query")
                .join("device_data.db")
                .to_string_lossy()
                .to_string()
        })
        .unwrap_or_else(|| "./device_query_data/device_data.db".to_string())
}

fn default_query_timeout() -> u64 {
    30_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection_string: default_connection_string(),
            query_timeout_ms: default_query_timeout(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9127
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
            cors_origins: Vec::new(),
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which collaborator implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    #[default]
    Http,
    /// Fixed tables from this file, for development and tests
    Static,
}

/// Identity service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub kind: ClientKind,

    #[serde(default = "default_identity_url")]
    pub url: String,

    /// Token this service presents to collaborators; the caller's token
    /// is used when unset
    #[serde(default)]
    pub server_token: Option<String>,

    #[serde(default = "default_client_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub tokens: Vec<StaticToken>,

    #[serde(default)]
    pub users: Vec<StaticUser>,
}

fn default_identity_url() -> String {
    "http://localhost:9107".to_string()
}

fn default_client_timeout() -> u64 {
    5000
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            kind: ClientKind::default(),
            url: default_identity_url(),
            server_token: None,
            request_timeout_ms: default_client_timeout(),
            tokens: Vec::new(),
            users: Vec::new(),
        }
    }
}

/// A token accepted by the static identity provider
#[derive(Debug, Clone, Deserialize)]
pub struct StaticToken {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub is_server: bool,
}

/// A user known to the static identity provider
#[derive(Debug, Clone, Deserialize)]
pub struct StaticUser {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Permission-pair service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub kind: ClientKind,

    #[serde(default = "default_permissions_url")]
    pub url: String,

    #[serde(default = "default_scope")]
    pub scope: String,

    #[serde(default = "default_client_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub pairs: Vec<StaticPair>,
}

fn default_permissions_url() -> String {
    "http://localhost:9120".to_string()
}

fn default_scope() -> String {
    "uploads".to_string()
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            kind: ClientKind::default(),
            url: default_permissions_url(),
            scope: default_scope(),
            request_timeout_ms: default_client_timeout(),
            pairs: Vec::new(),
        }
    }
}

/// A permission pair served by the static permission store
#[derive(Debug, Clone, Deserialize)]
pub struct StaticPair {
    pub user_id: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    pub id: String,
    #[serde(default)]
    pub key: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("device-query").join("config.toml")),
            Some(PathBuf::from("/etc/device-query/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply overrides looked up by variable name
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(conn) = var("DEVICE_QUERY_STORE") {
            self.store.connection_string = conn;
        }
        if let Some(ms) = var("DEVICE_QUERY_QUERY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.store.query_timeout_ms = ms;
        }

        if let Some(host) = var("DEVICE_QUERY_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = var("DEVICE_QUERY_API_PORT").and_then(|v| v.parse().ok()) {
            self.api.port = port;
        }

        if let Some(url) = var("DEVICE_QUERY_IDENTITY_URL") {
            self.identity.url = url;
        }
        if let Some(token) = var("DEVICE_QUERY_SERVER_TOKEN") {
            self.identity.server_token = Some(token);
        }
        if let Some(url) = var("DEVICE_QUERY_PERMISSIONS_URL") {
            self.permissions.url = url;
        }

        if let Some(level) = var("DEVICE_QUERY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("DEVICE_QUERY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Check settings that cannot be expressed by types alone
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.connection_string.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "store.connection_string must not be empty".to_string(),
            ));
        }
        if self.store.query_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store.query_timeout_ms must be positive".to_string(),
            ));
        }
        if self.identity.kind == ClientKind::Http && self.identity.url.is_empty() {
            return Err(ConfigError::Invalid("identity.url is required".to_string()));
        }
        if self.permissions.kind == ClientKind::Http && self.permissions.url.is_empty() {
            return Err(ConfigError::Invalid("permissions.url is required".to_string()));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Device Query Configuration
#
# Environment variables override these settings:
# - DEVICE_QUERY_STORE
# - DEVICE_QUERY_QUERY_TIMEOUT_MS
# - DEVICE_QUERY_API_HOST
# - DEVICE_QUERY_API_PORT
# - DEVICE_QUERY_IDENTITY_URL
# - DEVICE_QUERY_SERVER_TOKEN
# - DEVICE_QUERY_PERMISSIONS_URL
# - DEVICE_QUERY_LOG_LEVEL
# - DEVICE_QUERY_LOG_FORMAT

[store]
# SQLite database: a path, sqlite://path, a file: URI, or sqlite::memory:
connection_string = "~/.local/share/device-query/device_data.db"

# Upper bound on a single store query (ms)
query_timeout_ms = 30000

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 9127

# Largest accepted query body (bytes)
max_body_bytes = 65536

# Allowed CORS origins (empty disables CORS headers)
cors_origins = []

[identity]
# http: call the identity service; static: use the tables below
kind = "http"
url = "http://localhost:9107"
request_timeout_ms = 5000

# Token presented to collaborators (defaults to the caller's token)
# server_token = ""

# [[identity.tokens]]
# token = "dev-token"
# user_id = "1234"
# is_server = false

# [[identity.users]]
# user_id = "1234"
# email = "someone@example.com"

[permissions]
# http: call the permission service; static: use the tables below
kind = "http"
url = "http://localhost:9120"
scope = "uploads"
request_timeout_ms = 5000

# [[permissions.pairs]]
# user_id = "1234"
# id = "g1234"
# key = ""

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

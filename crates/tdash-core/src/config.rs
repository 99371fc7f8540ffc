//! Application configuration, loaded from TOML.
//!
//! Every field has a default so an empty file (or no file) is a valid
//! configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TdashError;

/// Row cap applied to every dynamic query.
pub const MAX_ROWS: i64 = 10_000;
/// Limit used when a request does not specify one.
pub const DEFAULT_LIMIT: i64 = 1_000;
/// Maximum length of a computed-column expression.
pub const MAX_EXPRESSION_LENGTH: usize = 500;
/// Maximum nesting of filter groups.
pub const MAX_FILTER_DEPTH: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub query: QueryLimits,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_body_limit() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/polkadot.db")
}

/// Limits and knobs for the dynamic query path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLimits {
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_max_rows")]
    pub max_rows: i64,
    #[serde(default = "default_max_filter_depth")]
    pub max_filter_depth: usize,
    #[serde(default = "default_max_expression_length")]
    pub max_expression_length: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Overrides the built-in source allow-list when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_sources: Option<Vec<String>>,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_rows: default_max_rows(),
            max_filter_depth: default_max_filter_depth(),
            max_expression_length: default_max_expression_length(),
            timeout_ms: default_timeout_ms(),
            allowed_sources: None,
        }
    }
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

fn default_max_rows() -> i64 {
    MAX_ROWS
}

fn default_max_filter_depth() -> usize {
    MAX_FILTER_DEPTH
}

fn default_max_expression_length() -> usize {
    MAX_EXPRESSION_LENGTH
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`TdashError::Io`] if the file cannot be read and
    /// [`TdashError::Config`] if it does not parse or fails validation.
    pub fn load(path: &Path) -> Result<Self, TdashError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse and validate configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`TdashError::Config`] on parse or validation failure.
    pub fn from_toml(text: &str) -> Result<Self, TdashError> {
        let cfg: Self = toml::from_str(text).map_err(|e| TdashError::Config(e.to_string()))?;
        cfg.validate().map_err(TdashError::Config)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        let q = &self.query;
        if q.max_rows < 1 {
            return Err("query.max_rows must be >= 1".into());
        }
        if q.default_limit < 1 {
            return Err("query.default_limit must be >= 1".into());
        }
        if q.default_limit > q.max_rows {
            return Err("query.default_limit must be <= query.max_rows".into());
        }
        if q.max_filter_depth == 0 || q.max_expression_length == 0 || q.timeout_ms == 0 {
            return Err(
                "query.max_filter_depth, max_expression_length and timeout_ms must be > 0".into(),
            );
        }
        if let Some(sources) = &q.allowed_sources {
            if sources.iter().any(|s| s.trim().is_empty()) {
                return Err("query.allowed_sources must not contain empty names".into());
            }
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    /// Socket address the HTTP server binds to.
    ///
    /// # Errors
    ///
    /// Returns [`TdashError::Config`] if host and port do not form an address.
    pub fn addr(&self) -> Result<SocketAddr, TdashError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| TdashError::Config(format!("invalid server address: {e}")))
    }
}

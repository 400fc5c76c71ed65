//! Server configuration.
//!
//! Loading flow:
//! 1. Start with [`ServerConfig::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `HUDDLE_*` environment variable overrides
//!
//! CLI flags are applied by the binary on top of the result.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid JSON or has wrongly typed values.
    #[error("invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for the gateway server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8888`, `0` picks a free port).
    pub port: u16,
    /// Capacity of each session's outbound queue.
    pub outbound_queue_size: usize,
    /// Display name given to a session until it sends `"user edit"`.
    pub default_user_name: String,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8888,
            outbound_queue_size: 256,
            default_user_name: "anonymous".into(),
            max_message_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional JSON file plus env overrides.
    ///
    /// A missing file yields defaults; an unreadable or invalid one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = serde_json::to_value(Self::default())?;

        let merged = match path {
            Some(path) if path.exists() => {
                debug!(?path, "loading settings from file");
                let content = std::fs::read_to_string(path)?;
                let user: Value = serde_json::from_str(&content)?;
                deep_merge(defaults, user)
            }
            Some(path) => {
                debug!(?path, "settings file not found, using defaults");
                defaults
            }
            None => defaults,
        };

        let mut config: Self = serde_json::from_value(merged)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `HUDDLE_*` environment variables. Invalid values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_string("HUDDLE_HOST") {
            self.host = v;
        }
        if let Some(v) = read_env_parsed("HUDDLE_PORT", parse_port) {
            self.port = v;
        }
        if let Some(v) = read_env_parsed("HUDDLE_OUTBOUND_QUEUE", parse_queue_size) {
            self.outbound_queue_size = v;
        }
        if let Some(v) = read_env_string("HUDDLE_DEFAULT_USER_NAME") {
            self.default_user_name = v;
        }
    }

    /// `host:port` string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`, and
/// nulls in `source` keep the `target` value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Parse a port number (0 allowed).
pub fn parse_port(val: &str) -> Option<u16> {
    val.trim().parse().ok()
}

/// Parse an outbound queue size in `1..=65536`.
pub fn parse_queue_size(val: &str) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (1..=65_536).contains(&n).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_parsed<T>(name: &str, parse: fn(&str) -> Option<T>) -> Option<T> {
    let val = std::env::var(name).ok()?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

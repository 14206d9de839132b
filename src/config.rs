//! Configuration loading.
//!
//! Settings come from an optional JSON file, fall back to defaults, and are
//! then overridden by `LITESOCKETS_*` environment variables.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::socket::server::DEFAULT_ACCEPT_BACKOFF;

/// Settings shared by the client and the server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SocketConfig {
    /// Address to bind (server) or dial (client).
    pub address: String,
    /// Per-operation deadline in milliseconds.
    pub timeout_ms: u64,
    /// Capacity of the server's accept-error channel.
    pub error_buffer_size: usize,
    /// Largest incoming message accepted. `None` trusts every length prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<u64>,
    /// Pause after a failed accept, in milliseconds.
    pub accept_backoff_ms: u64,
    /// Consecutive accept failures after which the listener is given up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_accept_errors: Option<u32>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5555".to_string(),
            timeout_ms: 10_000,
            error_buffer_size: 10,
            max_message_size: None,
            accept_backoff_ms: DEFAULT_ACCEPT_BACKOFF.as_millis() as u64,
            max_consecutive_accept_errors: None,
        }
    }
}

impl SocketConfig {
    /// Load from `path` if given, else defaults, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a variable lookup. Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(address) = lookup("LITESOCKETS_ADDRESS") {
            self.address = address;
        }

        if let Some(timeout) = lookup("LITESOCKETS_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.timeout_ms = ms;
            }
        }

        if let Some(size) = lookup("LITESOCKETS_ERROR_BUFFER") {
            if let Ok(size) = size.parse::<usize>() {
                self.error_buffer_size = size;
            }
        }

        if let Some(max) = lookup("LITESOCKETS_MAX_MESSAGE_SIZE") {
            if let Ok(max) = max.parse::<u64>() {
                self.max_message_size = Some(max);
            }
        }

        if let Some(backoff) = lookup("LITESOCKETS_ACCEPT_BACKOFF_MS") {
            if let Ok(ms) = backoff.parse::<u64>() {
                self.accept_backoff_ms = ms;
            }
        }

        if let Some(limit) = lookup("LITESOCKETS_MAX_ACCEPT_ERRORS") {
            if let Ok(limit) = limit.parse::<u32>() {
                self.max_consecutive_accept_errors = Some(limit);
            }
        }
    }

    /// Per-operation deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Pause after a failed accept.
    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SocketConfig::default();
        assert_eq!(config.address, "127.0.0.1:5555");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.error_buffer_size, 10);
        assert_eq!(config.max_message_size, None);
        assert_eq!(config.accept_backoff(), DEFAULT_ACCEPT_BACKOFF);
        assert_eq!(config.max_consecutive_accept_errors, None);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("litesockets.json");
        std::fs::write(&path, r#"{"address": "0.0.0.0:7000", "max_message_size": 1048576}"#)
            .unwrap();

        let config = SocketConfig::load_from_file(&path).unwrap();
        assert_eq!(config.address, "0.0.0.0:7000");
        assert_eq!(config.max_message_size, Some(1_048_576));
        assert_eq!(config.timeout_ms, 10_000);
        assert_eq!(config.error_buffer_size, 10);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = SocketConfig::load(Some(&tmp.path().join("absent.json"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SocketConfig::load_from_file(&path).is_err());
    }

    #[test]
    fn test_save_and_reload_preserves_settings() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("litesockets.json");
        let config = SocketConfig {
            max_consecutive_accept_errors: Some(64),
            timeout_ms: 250,
            ..SocketConfig::default()
        };
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        assert_eq!(SocketConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SocketConfig::default();
        config.apply_overrides(lookup_from(&[
            ("LITESOCKETS_ADDRESS", "10.0.0.1:9000"),
            ("LITESOCKETS_TIMEOUT_MS", "1500"),
            ("LITESOCKETS_ERROR_BUFFER", "3"),
            ("LITESOCKETS_MAX_MESSAGE_SIZE", "4096"),
            ("LITESOCKETS_ACCEPT_BACKOFF_MS", "0"),
            ("LITESOCKETS_MAX_ACCEPT_ERRORS", "12"),
        ]));

        assert_eq!(config.address, "10.0.0.1:9000");
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.error_buffer_size, 3);
        assert_eq!(config.max_message_size, Some(4096));
        assert_eq!(config.accept_backoff(), Duration::ZERO);
        assert_eq!(config.max_consecutive_accept_errors, Some(12));
    }

    #[test]
    fn test_unparseable_env_values_ignored() {
        let mut config = SocketConfig::default();
        config.apply_overrides(lookup_from(&[
            ("LITESOCKETS_TIMEOUT_MS", "soon"),
            ("LITESOCKETS_ERROR_BUFFER", "-1"),
        ]));
        assert_eq!(config, SocketConfig::default());
    }
}

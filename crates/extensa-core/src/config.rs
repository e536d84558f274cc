//! Configuration for the extension manager and its delivery surface.
//!
//! Loaded from a single TOML file (`extensa.toml`) with optional environment
//! overrides. Every section has working defaults so an empty file is valid.
//!
//! ```toml
//! [extensions]
//! paths = ["./extensions"]
//! auto_reload = true
//! debounce = "500ms"
//! cycle_timeout = "60s"
//!
//! [delivery]
//! cache_ttl = "1h"
//!
//! [server]
//! bind = "127.0.0.1:8055"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExtensionError, Result};

/// Environment variable names.
pub mod env_vars {
    pub const EXTENSIONS_PATH: &str = "EXTENSA_EXTENSIONS_PATH";
    pub const AUTO_RELOAD: &str = "EXTENSA_EXTENSIONS_AUTO_RELOAD";
    pub const CACHE_TTL: &str = "EXTENSA_CACHE_TTL";
    pub const BIND: &str = "EXTENSA_BIND";
}

/// Default values.
pub mod defaults {
    use std::time::Duration;

    pub const EXTENSIONS_PATH: &str = "./extensions";
    pub const DEBOUNCE: Duration = Duration::from_millis(500);
    pub const CYCLE_TIMEOUT: Duration = Duration::from_secs(60);
    pub const TRIGGER_CAPACITY: usize = 16;
    pub const BIND: &str = "127.0.0.1:8055";
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extensions: ManagerConfig,
    pub delivery: DeliveryConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExtensionError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without touching the environment.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ExtensionError::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Apply `EXTENSA_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Some(paths) = std::env::var_os(env_vars::EXTENSIONS_PATH) {
            let paths: Vec<PathBuf> = std::env::split_paths(&paths).collect();
            if !paths.is_empty() {
                self.extensions.paths = paths;
            }
        }
        if let Some(flag) = std::env::var(env_vars::AUTO_RELOAD)
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.extensions.auto_reload = flag;
        }
        if let Ok(ttl) = std::env::var(env_vars::CACHE_TTL) {
            match humantime::parse_duration(&ttl) {
                Ok(ttl) => self.delivery.cache_ttl = Some(ttl),
                Err(e) => tracing::warn!(value = %ttl, error = %e, "Ignoring invalid {}", env_vars::CACHE_TTL),
            }
        }
        if let Some(bind) = std::env::var(env_vars::BIND)
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.server.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.extensions.validate()
    }
}

/// Extension manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Root directories scanned for extension packages.
    pub paths: Vec<PathBuf>,

    /// Extension names forced to disabled regardless of their manifest.
    pub disabled: Vec<String>,

    /// Watch the roots and reload on change.
    pub auto_reload: bool,

    /// Quiet period after the last filesystem event before a reload starts.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,

    /// Overall budget for one reload cycle.
    #[serde(with = "humantime_serde")]
    pub cycle_timeout: Duration,

    /// Capacity of the trigger channel feeding the reload coordinator.
    pub trigger_capacity: usize,

    /// Upper bound on one aggregate payload, in bytes.
    pub max_payload_bytes: Option<usize>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from(defaults::EXTENSIONS_PATH)],
            disabled: Vec::new(),
            auto_reload: true,
            debounce: defaults::DEBOUNCE,
            cycle_timeout: defaults::CYCLE_TIMEOUT,
            trigger_capacity: defaults::TRIGGER_CAPACITY,
            max_payload_bytes: None,
        }
    }
}

impl ManagerConfig {
    /// Settings for the given roots with defaults elsewhere.
    pub fn with_paths(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.paths.is_empty() {
            return Err(ExtensionError::Config(
                "extensions.paths must list at least one directory".to_string(),
            ));
        }
        if self.trigger_capacity == 0 {
            return Err(ExtensionError::Config(
                "extensions.trigger_capacity must be greater than zero".to_string(),
            ));
        }
        if self.cycle_timeout.is_zero() {
            return Err(ExtensionError::Config(
                "extensions.cycle_timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_payload_bytes == Some(0) {
            return Err(ExtensionError::Config(
                "extensions.max_payload_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP caching behaviour for compiled payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// `max-age` for payload responses. `None` sends `no-store`.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Option<Duration>,

    /// Honour `Cache-Control: no-store` sent by the client.
    pub cache_skip_allowed: bool,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8055))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.extensions.paths, vec![PathBuf::from("./extensions")]);
        assert_eq!(config.extensions.debounce, Duration::from_millis(500));
        assert!(config.extensions.auto_reload);
        assert!(config.delivery.cache_ttl.is_none());
        assert_eq!(config.server.bind.port(), 8055);
    }

    #[test]
    fn test_parse_durations() {
        let config = Config::from_toml(
            r#"
            [extensions]
            paths = ["/srv/ext"]
            debounce = "250ms"
            cycle_timeout = "2m"

            [delivery]
            cache_ttl = "1h"
            cache_skip_allowed = true
            "#,
        )
        .unwrap();

        assert_eq!(config.extensions.debounce, Duration::from_millis(250));
        assert_eq!(config.extensions.cycle_timeout, Duration::from_secs(120));
        assert_eq!(config.delivery.cache_ttl, Some(Duration::from_secs(3600)));
        assert!(config.delivery.cache_skip_allowed);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let result = Config::from_toml("[extensions]\ndebounce = \"soon\"");
        assert!(matches!(result, Err(ExtensionError::Config(_))));
    }

    #[test]
    fn test_validation() {
        let mut config = ManagerConfig::default();
        assert!(config.validate().is_ok());

        config.paths.clear();
        assert!(config.validate().is_err());

        let config = ManagerConfig {
            cycle_timeout: Duration::ZERO,
            ..ManagerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ManagerConfig {
            trigger_capacity: 0,
            ..ManagerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

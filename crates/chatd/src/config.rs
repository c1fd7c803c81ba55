//! Daemon configuration.
//!
//! Loaded from an optional TOML file, every field defaulted, then
//! overridden from the environment:
//!
//! | Variable             | Field                  |
//! |----------------------|------------------------|
//! | `CHATD_LISTEN`       | `server.listen_addr`   |
//! | `CHATD_HTTP`         | `server.http_addr`     |
//! | `CHATD_DATABASE_URL` | `database.url`         |
//!
//! ```toml
//! [server]
//! listen_addr = "127.0.0.1:7878"
//! http_addr = "127.0.0.1:8080"
//! max_connections = 1024
//!
//! [cache]
//! size_limit = 0
//! expiration_scan_frequency_secs = 300
//! message_cache_duration_secs = 300
//!
//! [database]
//! url = "sqlite://chat.db"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::registry::MAX_CONNECTIONS;

pub const ENV_LISTEN: &str = "CHATD_LISTEN";
pub const ENV_HTTP: &str = "CHATD_HTTP";
pub const ENV_DATABASE_URL: &str = "CHATD_DATABASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Realtime socket endpoint
    pub listen_addr: SocketAddr,
    /// HTTP surface endpoint
    pub http_addr: SocketAddr,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7878)),
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum cached entries, 0 = unbounded
    pub size_limit: usize,
    /// How often expired entries are swept
    pub expiration_scan_frequency_secs: u64,
    /// Lifetime of the recent-history entry
    pub message_cache_duration_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size_limit: 0,
            expiration_scan_frequency_secs: 300,
            message_cache_duration_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn scan_frequency(&self) -> Duration {
        Duration::from_secs(self.expiration_scan_frequency_secs)
    }

    pub fn message_cache_duration(&self) -> Duration {
        Duration::from_secs(self.message_cache_duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite URL; when absent messages live in memory only
    pub url: Option<String>,
}

impl Config {
    /// Loads `path` (if given) and applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies overrides from `lookup`, then validates.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_LISTEN) {
            self.server.listen_addr = parse_addr(ENV_LISTEN, &value)?;
        }
        if let Some(value) = lookup(ENV_HTTP) {
            self.server.http_addr = parse_addr(ENV_HTTP, &value)?;
        }
        if let Some(value) = lookup(ENV_DATABASE_URL) {
            let value = value.trim();
            self.database.url = (!value.is_empty()).then(|| value.to_string());
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "server.max_connections",
                reason: "must be at least 1".into(),
            });
        }
        if self.cache.expiration_scan_frequency_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.expiration_scan_frequency_secs",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.trim().parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
        field,
        reason: format!("'{value}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = Config::default().with_overrides(no_env).unwrap();
        assert_eq!(config.server.max_connections, MAX_CONNECTIONS);
        assert_eq!(config.cache.size_limit, 0);
        assert_eq!(config.cache.message_cache_duration(), Duration::from_secs(300));
        assert_eq!(config.cache.scan_frequency(), Duration::from_secs(300));
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nmessage_cache_duration_secs = 60\n\n[database]\nurl = \"sqlite://x.db\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.cache.message_cache_duration_secs, 60);
        assert_eq!(config.cache.expiration_scan_frequency_secs, 300);
        assert_eq!(config.database.url.as_deref(), Some("sqlite://x.db"));
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nttl = 5").unwrap();
        assert!(matches!(Config::from_file(file.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file(Path::new("/nonexistent/chatd.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_LISTEN, "0.0.0.0:9000"),
            (ENV_DATABASE_URL, "sqlite://override.db"),
        ]);
        let config = Config::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.server.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.database.url.as_deref(), Some("sqlite://override.db"));
    }

    #[test]
    fn test_bad_override_reports_field() {
        let err = Config::default()
            .with_overrides(|key| (key == ENV_HTTP).then(|| "not-an-addr".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_HTTP));
    }

    #[test]
    fn test_zero_scan_frequency_rejected() {
        let mut config = Config::default();
        config.cache.expiration_scan_frequency_secs = 0;
        assert!(config.with_overrides(no_env).is_err());
    }
}

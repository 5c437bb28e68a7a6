use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::store::DB_PATH;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "TASKS_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

// All values in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_due_frequency")]
    pub due_frequency_secs: u64,
    #[serde(default = "default_overdue_frequency")]
    pub overdue_frequency_secs: u64,
    #[serde(default = "default_cleanup_frequency")]
    pub cleanup_frequency_secs: u64,
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    #[serde(default = "default_planning_timeout")]
    pub planning_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            due_frequency_secs: default_due_frequency(),
            overdue_frequency_secs: default_overdue_frequency(),
            cleanup_frequency_secs: default_cleanup_frequency(),
            retention_secs: default_retention(),
            planning_timeout_secs: default_planning_timeout(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_database_path() -> String {
    DB_PATH.to_string()
}

fn default_due_frequency() -> u64 {
    5 * 60
}

fn default_overdue_frequency() -> u64 {
    24 * 60 * 60
}

fn default_cleanup_frequency() -> u64 {
    10 * 60
}

fn default_retention() -> u64 {
    7 * 24 * 60 * 60
}

fn default_planning_timeout() -> u64 {
    10
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
}

impl Config {
    /// Load from `$TASKS_CONFIG_FILE`, else `./config.toml`.
    /// A missing default file yields the built-in defaults; a missing file
    /// named explicitly is an error.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::load_from(Path::new(&path)),
            _ => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load_from(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn planning_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scheduler.planning_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.bind_addr(), "127.0.0.1:3000");
        assert_eq!(cfg.database.path, DB_PATH);
        assert_eq!(cfg.scheduler.due_frequency_secs, 300);
        assert_eq!(cfg.scheduler.overdue_frequency_secs, 86_400);
        assert_eq!(cfg.planning_timeout(), std::time::Duration::from_secs(10));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = Config::parse(
            r#"
            log_level = "debug"

            [server]
            port = 8080

            [scheduler]
            retention_secs = 3600
            "#,
        )
        .unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        assert_eq!(cfg.scheduler.retention_secs, 3600);
        assert_eq!(cfg.scheduler.cleanup_frequency_secs, 600);
    }

    #[test]
    fn bad_toml_is_reported() {
        assert!(matches!(Config::parse("port = "), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}

//! Server configuration.
//!
//! All settings come from the command line and carry defaults, so a bare
//! `novakv` starts a usable server. Validation happens before anything
//! binds or spawns: a bad host or port aborts startup.

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;
use tracing::Level;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6380;
pub const DEFAULT_SHARD_COUNT: usize = 1024;
pub const DEFAULT_CHANNEL_BUFFER: usize = 10;
pub const DEFAULT_DATABASES: usize = 16;

/// Command-line configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "novakv", version, about = "In-memory key-value server")]
pub struct Config {
    /// IP address to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on; must lie strictly between 1024 and 65535
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory for the log file; log lines go to stdout when unset
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Number of keyspace shards per database
    #[arg(long, default_value_t = DEFAULT_SHARD_COUNT)]
    pub shards: usize,

    /// Buffer size for internal fan-out channels
    #[arg(long, default_value_t = DEFAULT_CHANNEL_BUFFER)]
    pub channel_buffer: usize,

    /// Number of selectable databases
    #[arg(long, default_value_t = DEFAULT_DATABASES)]
    pub databases: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address '{0}'")]
    InvalidHost(String),

    #[error("port must lie strictly between 1024 and 65535, got {0}")]
    InvalidPort(u16),

    #[error("shard count must be positive")]
    InvalidShards,

    #[error("database count must be positive")]
    InvalidDatabases,

    #[error("unknown log level '{0}'")]
    InvalidLogLevel(String),
}

impl Config {
    /// Checks every field; an error aborts startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidHost(self.host.clone()));
        }
        if self.port <= 1024 || self.port == u16::MAX {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.shards == 0 {
            return Err(ConfigError::InvalidShards);
        }
        if self.databases == 0 {
            return Err(ConfigError::InvalidDatabases);
        }
        self.tracing_level()?;
        Ok(())
    }

    /// The configured log level as a tracing filter level.
    pub fn tracing_level(&self) -> Result<Level, ConfigError> {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config::parse_from(["novakv"])
    }

    #[test]
    fn test_defaults_validate() {
        let config = base();
        assert!(config.validate().is_ok());
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.shards, DEFAULT_SHARD_COUNT);
        assert_eq!(config.databases, DEFAULT_DATABASES);
        assert_eq!(config.bind_address(), "127.0.0.1:6380");
    }

    #[test]
    fn test_rejects_bad_host() {
        let config = Config::parse_from(["novakv", "--host", "not-an-ip"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_port() {
        let config = Config::parse_from(["novakv", "--port", "1024"]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPort(1024))));

        let config = Config::parse_from(["novakv", "--port", "80"]);
        assert!(config.validate().is_err());

        let config = Config::parse_from(["novakv", "--port", "65535"]);
        assert!(config.validate().is_err());

        let config = Config::parse_from(["novakv", "--port", "6399"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_counts() {
        let config = Config::parse_from(["novakv", "--shards", "0"]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidShards)));

        let config = Config::parse_from(["novakv", "--databases", "0"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDatabases)
        ));
    }

    #[test]
    fn test_log_levels() {
        for (name, level) in [
            ("trace", Level::TRACE),
            ("debug", Level::DEBUG),
            ("info", Level::INFO),
            ("warn", Level::WARN),
            ("ERROR", Level::ERROR),
        ] {
            let config = Config::parse_from(["novakv", "--log-level", name]);
            assert_eq!(config.tracing_level().unwrap(), level);
        }

        let config = Config::parse_from(["novakv", "--log-level", "loud"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }
}

//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::aggregate::OverdraftPolicy;
use crate::handlers::DispatcherConfig;
use crate::ledger::LedgerConfig;
use crate::projection::ProjectionRetry;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown log format '{0}' (expected 'pretty' or 'json')")]
pub struct UnknownLogFormat(pub String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(UnknownLogFormat(other.to_string())),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL; in-memory stores are used when absent
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub log_format: LogFormat,

    /// Attempts per command before a version conflict is surfaced
    pub command_max_retries: u32,

    /// Backoff unit between command attempts (multiplied by attempt number)
    pub command_retry_base_delay: Duration,

    /// Attempts per batch before the projection worker reports a failure
    pub projection_max_retries: u32,

    pub projection_retry_delay: Duration,

    /// Period at which accounts whose projection gave up are re-driven
    pub projection_redrive_interval: Duration,

    /// Whether a debit may take the balance below zero
    pub overdraft_policy: OverdraftPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            host: "127.0.0.1".to_string(),
            port: 3000,
            environment: "development".to_string(),
            log_format: LogFormat::Pretty,
            command_max_retries: 3,
            command_retry_base_delay: Duration::from_millis(10),
            projection_max_retries: 5,
            projection_retry_delay: Duration::from_millis(50),
            projection_redrive_interval: Duration::from_secs(1),
            overdraft_policy: OverdraftPolicy::Reject,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let database_max_connections = parse_or(
            &lookup,
            "DATABASE_MAX_CONNECTIONS",
            defaults.database_max_connections,
        )?;

        let host = lookup("HOST").unwrap_or(defaults.host);
        let port = parse_or(&lookup, "PORT", defaults.port)?;
        let environment = lookup("ENVIRONMENT").unwrap_or(defaults.environment);
        let log_format = parse_or(&lookup, "LOG_FORMAT", defaults.log_format)?;

        let command_max_retries =
            parse_or(&lookup, "COMMAND_MAX_RETRIES", defaults.command_max_retries)?;
        if command_max_retries == 0 {
            return Err(ConfigError::InvalidValue("COMMAND_MAX_RETRIES"));
        }
        let command_retry_base_delay = Duration::from_millis(parse_or(
            &lookup,
            "COMMAND_RETRY_BASE_DELAY_MS",
            10u64,
        )?);

        let projection_max_retries =
            parse_or(&lookup, "PROJECTION_MAX_RETRIES", defaults.projection_max_retries)?;
        if projection_max_retries == 0 {
            return Err(ConfigError::InvalidValue("PROJECTION_MAX_RETRIES"));
        }
        let projection_retry_delay =
            Duration::from_millis(parse_or(&lookup, "PROJECTION_RETRY_DELAY_MS", 50u64)?);
        let projection_redrive_interval = Duration::from_millis(parse_or(
            &lookup,
            "PROJECTION_REDRIVE_INTERVAL_MS",
            1000u64,
        )?);
        if projection_redrive_interval.is_zero() {
            return Err(ConfigError::InvalidValue("PROJECTION_REDRIVE_INTERVAL_MS"));
        }

        let overdraft_policy = parse_or(&lookup, "OVERDRAFT_POLICY", defaults.overdraft_policy)?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            log_format,
            command_max_retries,
            command_retry_base_delay,
            projection_max_retries,
            projection_retry_delay,
            projection_redrive_interval,
            overdraft_policy,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Settings the ledger core needs
    pub fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            dispatcher: DispatcherConfig {
                max_retries: self.command_max_retries,
                retry_base_delay: self.command_retry_base_delay,
                overdraft_policy: self.overdraft_policy,
            },
            projection: ProjectionRetry {
                max_retries: self.projection_max_retries,
                delay: self.projection_retry_delay,
                redrive_interval: self.projection_redrive_interval,
            },
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.port, 3000);
        assert_eq!(config.command_max_retries, 3);
        assert_eq!(config.overdraft_policy, OverdraftPolicy::Reject);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.ledger().projection.redrive_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/ledger"),
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("OVERDRAFT_POLICY", "allow"),
            ("COMMAND_RETRY_BASE_DELAY_MS", "25"),
        ])
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/ledger"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.overdraft_policy, OverdraftPolicy::Allow);
        assert_eq!(config.ledger().dispatcher.retry_base_delay, Duration::from_millis(25));
    }

    #[test]
    fn test_invalid_values() {
        let err = load(&[("PORT", "not-a-port")]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for environment variable: PORT");

        assert!(load(&[("COMMAND_MAX_RETRIES", "0")]).is_err());
        assert!(load(&[("OVERDRAFT_POLICY", "sometimes")]).is_err());
        assert!(load(&[("PROJECTION_REDRIVE_INTERVAL_MS", "0")]).is_err());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("Json".parse::<LogFormat>(), Ok(LogFormat::Json));
        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert_eq!(err, UnknownLogFormat("xml".to_string()));
        assert!(err.to_string().contains("pretty"));
        assert!(load(&[("LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn test_blank_database_url_means_in_memory() {
        let config = load(&[("DATABASE_URL", "  ")]).unwrap();
        assert!(config.database_url.is_none());
    }
}

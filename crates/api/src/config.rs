//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroPeriod(&'static str),

    #[error("{name} must be an hour between 0 and 23, got {value}")]
    InvalidHour { name: &'static str, value: u32 },
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` (default `"0.0.0.0"`) and `PORT` (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; orders are kept in
///   memory when unset
/// - `DATABASE_MAX_CONNECTIONS` (default `10`)
/// - `LOCATION_DIRECTORY_URL`: where the location list is fetched from
/// - `LOCATION_REFRESH_SECS` (default `300`)
/// - `LOCATION_TIMEOUT_SECS`: timeout for every location call (default `30`)
/// - `PENDING_CANCEL_INTERVAL_SECS` (default `60`)
/// - `DELAY_SCAN_INTERVAL_SECS` (default `900`)
/// - `DELAY_SCAN_START_HOUR` / `DELAY_SCAN_END_HOUR`: UTC window for the
///   delay scan (default `8`..`20`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub location_directory_url: String,
    pub location_refresh: Duration,
    pub location_timeout: Duration,
    pub pending_cancel_interval: Duration,
    pub delay_scan_interval: Duration,
    pub delay_scan_start_hour: u32,
    pub delay_scan_end_hour: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            location_directory_url: std::env::var("LOCATION_DIRECTORY_URL")
                .unwrap_or(defaults.location_directory_url),
            location_refresh: secs_or("LOCATION_REFRESH_SECS", defaults.location_refresh),
            location_timeout: secs_or("LOCATION_TIMEOUT_SECS", defaults.location_timeout),
            pending_cancel_interval: secs_or(
                "PENDING_CANCEL_INTERVAL_SECS",
                defaults.pending_cancel_interval,
            ),
            delay_scan_interval: secs_or("DELAY_SCAN_INTERVAL_SECS", defaults.delay_scan_interval),
            delay_scan_start_hour: env_or("DELAY_SCAN_START_HOUR", defaults.delay_scan_start_hour),
            delay_scan_end_hour: env_or("DELAY_SCAN_END_HOUR", defaults.delay_scan_end_hour),
        }
    }

    /// Rejects values the background loops cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, period) in [
            ("LOCATION_REFRESH_SECS", self.location_refresh),
            ("LOCATION_TIMEOUT_SECS", self.location_timeout),
            ("PENDING_CANCEL_INTERVAL_SECS", self.pending_cancel_interval),
            ("DELAY_SCAN_INTERVAL_SECS", self.delay_scan_interval),
        ] {
            if period.is_zero() {
                return Err(ConfigError::ZeroPeriod(name));
            }
        }
        for (name, value) in [
            ("DELAY_SCAN_START_HOUR", self.delay_scan_start_hour),
            ("DELAY_SCAN_END_HOUR", self.delay_scan_end_hour),
        ] {
            if value > 23 {
                return Err(ConfigError::InvalidHour { name, value });
            }
        }
        Ok(())
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            database_max_connections: 10,
            location_directory_url: "http://localhost:8081/locations".to_string(),
            location_refresh: Duration::from_secs(300),
            location_timeout: Duration::from_secs(30),
            pending_cancel_interval: Duration::from_secs(60),
            delay_scan_interval: Duration::from_secs(900),
            delay_scan_start_hour: 8,
            delay_scan_end_hour: 20,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn secs_or(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

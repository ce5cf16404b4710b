//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use resilience::BreakerConfig;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Gateway configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default: `0.0.0.0:8080`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `LIBRARY_SYSTEM_URL`, `RESERVATION_SYSTEM_URL`, `RATING_SYSTEM_URL`:
///   downstream base URLs
/// - `RABBITMQ_URL`: broker for the retry queues; unset keeps them in memory
/// - `RETRY_BACKOFF_SECS`: pause before replaying an unavailable step
/// - `HTTP_TIMEOUT_SECS`: per-request timeout for downstream calls
/// - `BREAKER_FAILURE_THRESHOLD`, `BREAKER_FAILURE_WINDOW_SECS`,
///   `BREAKER_COOL_DOWN_SECS`, `BREAKER_HALF_OPEN_SUCCESSES`
///
/// Values that fail to parse fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub catalog_url: String,
    pub reservation_url: String,
    pub rating_url: String,
    pub rabbitmq_url: Option<String>,
    pub retry_backoff: Duration,
    pub http_timeout: Duration,
    pub breaker: BreakerConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            parsed(&lookup, key).map(Duration::from_secs).unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_format),
            catalog_url: lookup("LIBRARY_SYSTEM_URL").unwrap_or(defaults.catalog_url),
            reservation_url: lookup("RESERVATION_SYSTEM_URL").unwrap_or(defaults.reservation_url),
            rating_url: lookup("RATING_SYSTEM_URL").unwrap_or(defaults.rating_url),
            rabbitmq_url: lookup("RABBITMQ_URL").filter(|url| !url.trim().is_empty()),
            retry_backoff: secs("RETRY_BACKOFF_SECS", defaults.retry_backoff),
            http_timeout: secs("HTTP_TIMEOUT_SECS", defaults.http_timeout),
            breaker: BreakerConfig {
                failure_threshold: parsed(&lookup, "BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or(defaults.breaker.failure_threshold),
                failure_window: secs("BREAKER_FAILURE_WINDOW_SECS", defaults.breaker.failure_window),
                cool_down: secs("BREAKER_COOL_DOWN_SECS", defaults.breaker.cool_down),
                half_open_successes: parsed(&lookup, "BREAKER_HALF_OPEN_SUCCESSES")
                    .unwrap_or(defaults.breaker.half_open_successes),
            },
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            catalog_url: "http://localhost:8060".to_string(),
            reservation_url: "http://localhost:8070".to_string(),
            rating_url: "http://localhost:8050".to_string(),
            rabbitmq_url: None,
            retry_backoff: Duration::from_secs(10),
            http_timeout: Duration::from_secs(5),
            breaker: BreakerConfig {
                failure_threshold: 3,
                failure_window: Duration::from_secs(60),
                cool_down: Duration::from_secs(5),
                half_open_successes: 3,
            },
        }
    }
}

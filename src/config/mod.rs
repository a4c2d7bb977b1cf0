//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if a variable is present but malformed.

use crate::error::{Error, Result};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8090;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    /// Artificial delay applied to every computation (`S_DELAY`, seconds).
    pub work_delay: Duration,
    /// Buffer size of each subscriber's notify channel.
    pub notify_capacity: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| Error::Config(format!("PORT={raw:?} is not a valid port: {e}")))?,
            Err(_) => DEFAULT_PORT,
        };

        let notify_capacity = match std::env::var("NOTIFY_CAPACITY") {
            Ok(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::Config(format!(
                        "NOTIFY_CAPACITY={raw:?} must be a positive integer"
                    )));
                }
            },
            Err(_) => 1,
        };

        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            work_delay: parse_delay(std::env::var("S_DELAY").ok().as_deref()),
            notify_capacity,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Whole seconds; anything unparsable or non-positive means no delay.
fn parse_delay(raw: Option<&str>) -> Duration {
    match raw.and_then(|s| s.trim().parse::<i64>().ok()) {
        Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
        _ => Duration::ZERO,
    }
}

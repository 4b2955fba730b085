//! Server configuration parsed from environment variables.
//!
//! Optional:
//! - `BIND_ADDR`: default `0.0.0.0`
//! - `PORT`: default 8080
//! - `HANDSHAKE_MAX_ATTEMPTS`: readiness retries before `HandshakeTimeout`, default 5
//! - `HANDSHAKE_BACKOFF_MS`: delay between readiness retries, default 100
//! - `OUTBOUND_BUFFER`: per-connection outbound queue capacity, default 256
//! - `CORS_ALLOWED_ORIGINS`: comma-separated origins, or `*` for any
//! - `AUTO_JOIN_BOARD`: board every session joins right after identifying

use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HANDSHAKE_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_HANDSHAKE_BACKOFF_MS: u64 = 100;
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;
pub const DEFAULT_CORS_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{key} must be at least 1")]
    Zero { key: &'static str },
}

/// Bounds for the readiness retry loop run before identity and join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for HandshakePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_HANDSHAKE_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_HANDSHAKE_BACKOFF_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub handshake: HandshakePolicy,
    pub outbound_buffer: usize,
    pub cors_origins: CorsOrigins,
    pub auto_join_board: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_owned(),
            port: DEFAULT_PORT,
            handshake: HandshakePolicy::default(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            cors_origins: parse_origins(DEFAULT_CORS_ALLOWED_ORIGINS),
            auto_join_board: None,
        }
    }
}

impl Config {
    /// Build config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse or is zero where
    /// a positive value is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unset keys take defaults.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = lookup("BIND_ADDR")
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned());
        let port = parse_var(&lookup, "PORT", DEFAULT_PORT)?;

        let max_attempts = parse_var(&lookup, "HANDSHAKE_MAX_ATTEMPTS", DEFAULT_HANDSHAKE_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::Zero { key: "HANDSHAKE_MAX_ATTEMPTS" });
        }
        let backoff_ms = parse_var(&lookup, "HANDSHAKE_BACKOFF_MS", DEFAULT_HANDSHAKE_BACKOFF_MS)?;

        // tokio's mpsc panics on a zero capacity.
        let outbound_buffer = parse_var(&lookup, "OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?;
        if outbound_buffer == 0 {
            return Err(ConfigError::Zero { key: "OUTBOUND_BUFFER" });
        }

        let cors_origins =
            parse_origins(lookup("CORS_ALLOWED_ORIGINS").as_deref().unwrap_or(DEFAULT_CORS_ALLOWED_ORIGINS));
        let auto_join_board = lookup("AUTO_JOIN_BOARD")
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());

        Ok(Self {
            bind_addr,
            port,
            handshake: HandshakePolicy { max_attempts, backoff: Duration::from_millis(backoff_ms) },
            outbound_buffer,
            cors_origins,
            auto_join_board,
        })
    }

    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_origins(raw: &str) -> CorsOrigins {
    if raw.trim() == "*" {
        return CorsOrigins::Any;
    }
    CorsOrigins::List(
        raw.split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_owned)
            .collect(),
    )
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

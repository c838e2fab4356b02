//! Connection configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a client can start with zero
//! configuration against a local server.

use std::time::Duration;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Server hostname or IP.
    /// Env: `CHARLA_HOST`
    /// Default: `127.0.0.1`
    pub host: String,

    /// Server TCP port.
    /// Env: `CHARLA_PORT`
    /// Default: `7000`
    pub port: u16,

    /// Bound on establishing the TCP connection.
    /// Env: `CHARLA_CONNECT_TIMEOUT_MS`
    /// Default: 10 seconds.
    pub connect_timeout: Duration,

    /// Default bound on waiting for a command response.
    /// Env: `CHARLA_REQUEST_TIMEOUT_MS`
    /// Default: 5 seconds.
    pub request_timeout: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7000,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl NetConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("CHARLA_HOST") {
            if !host.is_empty() {
                config.host = host;
            }
        }

        if let Ok(port) = std::env::var("CHARLA_PORT") {
            match port.parse::<u16>() {
                Ok(p) => config.port = p,
                Err(_) => {
                    tracing::warn!(value = %port, "Invalid CHARLA_PORT, using default");
                }
            }
        }

        if let Some(ms) = parse_millis("CHARLA_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = ms;
        }
        if let Some(ms) = parse_millis("CHARLA_REQUEST_TIMEOUT_MS") {
            config.request_timeout = ms;
        }

        config
    }

    /// `host:port` form used for dialing.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_millis(var: &str) -> Option<Duration> {
    let raw = std::env::var(var).ok()?;
    match raw.parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(var, value = %raw, "Invalid duration, using default");
            None
        }
    }
}

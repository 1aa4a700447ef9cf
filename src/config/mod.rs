use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Process-wide configuration (spec §6). Everything is optional except the
/// listen address, with defaults matching the spec's stated defaults.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,

    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub call_ringing_timeout_ms: u64,

    pub dial_rate_max_attempts: u32,
    pub dial_rate_window_ms: u64,

    pub federation: FederationConfig,

    pub log_level: String,
}

#[derive(Clone, Debug, Default)]
pub struct FederationConfig {
    pub enabled: bool,
    pub peer_url: Option<String>,
    pub local_domain: Option<String>,
    pub announce_routes: Vec<String>,
    pub auth_token: Option<String>,
    pub reconnect_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
}

fn env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_owned(),
            value: v,
        }),
        Err(_) => Ok(default),
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_owned(),
            value: v,
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from the process environment. Fails fast on a
    /// malformed value (mirrors the teacher's `Config::from_env` pattern);
    /// every field has a documented default so a bare `.env`-less run works.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let federation = FederationConfig {
            enabled: env::var("FEDERATION_ENABLED").as_deref() == Ok("true"),
            peer_url: env::var("FEDERATION_PEER_URL").ok(),
            local_domain: env::var("FEDERATION_LOCAL_DOMAIN").ok(),
            announce_routes: env::var("FEDERATION_ANNOUNCE_ROUTES")
                .map(|s| s.split(',').map(str::to_owned).collect())
                .unwrap_or_default(),
            auth_token: env::var("FEDERATION_AUTH_TOKEN").ok(),
            reconnect_delay_ms: env_u64("FEDERATION_RECONNECT_DELAY_MS", 5_000)?,
            heartbeat_interval_ms: env_u64("FEDERATION_HEARTBEAT_INTERVAL_MS", 15_000)?,
        };

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env_u32("SERVER_PORT", 8080)? as u16,
            tls_cert_path: env::var("TLS_CERT_PATH").ok(),
            tls_key_path: env::var("TLS_KEY_PATH").ok(),
            heartbeat_interval_ms: env_u64("HEARTBEAT_INTERVAL_MS", 10_000)?,
            heartbeat_timeout_ms: env_u64("HEARTBEAT_TIMEOUT_MS", 30_000)?,
            call_ringing_timeout_ms: env_u64("CALL_RINGING_TIMEOUT_MS", 30_000)?,
            dial_rate_max_attempts: env_u32("DIAL_RATE_MAX_ATTEMPTS", 100)?,
            dial_rate_window_ms: env_u64("DIAL_RATE_WINDOW_MS", 60_000)?,
            federation,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn call_ringing_timeout(&self) -> Duration {
        Duration::from_millis(self.call_ringing_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_addr_combines_host_and_port() {
        let config = Config {
            server_host: "0.0.0.0".into(),
            server_port: 9000,
            tls_cert_path: None,
            tls_key_path: None,
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 30_000,
            call_ringing_timeout_ms: 30_000,
            dial_rate_max_attempts: 100,
            dial_rate_window_ms: 60_000,
            federation: FederationConfig::default(),
            log_level: "info".into(),
        };
        assert_eq!(config.server_addr(), "0.0.0.0:9000");
    }
}

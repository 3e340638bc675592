use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
pub const MAX_KEEP_ALIVE_SECS: u64 = 86_400;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
pub const DEFAULT_STREAM_BUFFER: usize = 32;
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub shutdown_grace: Duration,
    pub stream_buffer: usize,
    pub max_body_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PORT must be a valid u16")]
    InvalidPort,
    #[error("MCP_KEEP_ALIVE_SECS must be between 1 and 86400")]
    InvalidKeepAlive,
    #[error("MCP_SHUTDOWN_GRACE_SECS must be a non-negative integer")]
    InvalidShutdownGrace,
    #[error("MCP_STREAM_BUFFER must be a positive integer")]
    InvalidStreamBuffer,
    #[error("MCP_MAX_BODY_BYTES must be a positive integer")]
    InvalidMaxBody,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            stream_buffer: DEFAULT_STREAM_BUFFER,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = env::var("BIND_ADDR")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.bind_addr);
        let port = read_var("PORT", ConfigError::InvalidPort)?.unwrap_or(defaults.port);
        let keep_alive = read_var::<u64>("MCP_KEEP_ALIVE_SECS", ConfigError::InvalidKeepAlive)?
            .map(|secs| {
                if secs == 0 || secs > MAX_KEEP_ALIVE_SECS {
                    Err(ConfigError::InvalidKeepAlive)
                } else {
                    Ok(Duration::from_secs(secs))
                }
            })
            .transpose()?
            .unwrap_or(defaults.keep_alive);
        let shutdown_grace =
            read_var::<u64>("MCP_SHUTDOWN_GRACE_SECS", ConfigError::InvalidShutdownGrace)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace);
        let stream_buffer = read_var::<usize>("MCP_STREAM_BUFFER", ConfigError::InvalidStreamBuffer)?
            .map(|capacity| {
                if capacity == 0 {
                    Err(ConfigError::InvalidStreamBuffer)
                } else {
                    Ok(capacity)
                }
            })
            .transpose()?
            .unwrap_or(defaults.stream_buffer);
        let max_body_bytes = read_var::<usize>("MCP_MAX_BODY_BYTES", ConfigError::InvalidMaxBody)?
            .map(|limit| {
                if limit == 0 {
                    Err(ConfigError::InvalidMaxBody)
                } else {
                    Ok(limit)
                }
            })
            .transpose()?
            .unwrap_or(defaults.max_body_bytes);

        let config = Self {
            bind_addr,
            port,
            keep_alive,
            shutdown_grace,
            stream_buffer,
            max_body_bytes,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

fn read_var<T: std::str::FromStr>(name: &str, error: ConfigError) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            value.trim().parse::<T>().map(Some).map_err(|_| error)
        }
        _ => Ok(None),
    }
}

//! Process configuration, read from the environment (after `.env` via dotenvy).

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::hub::{SessionConfig, MIN_MAILBOX_CAPACITY};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} is not valid: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("WS_PING_PERIOD_SECS must be less than WS_PONG_WAIT_SECS")]
    PingPeriod,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub cors_origins: Vec<String>,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let bind_addr = parse(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3001".to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let defaults = SessionConfig::default();
        let mailbox_capacity: usize =
            parse(&lookup, "WS_MAILBOX_CAPACITY", defaults.mailbox_capacity)?;
        if mailbox_capacity < MIN_MAILBOX_CAPACITY {
            return Err(ConfigError::Invalid {
                key: "WS_MAILBOX_CAPACITY",
                value: mailbox_capacity.to_string(),
            });
        }
        let ping_period = secs(&lookup, "WS_PING_PERIOD_SECS", defaults.ping_period)?;
        let pong_wait = secs(&lookup, "WS_PONG_WAIT_SECS", defaults.pong_wait)?;
        if ping_period >= pong_wait {
            return Err(ConfigError::PingPeriod);
        }
        let write_timeout = secs(&lookup, "WS_WRITE_TIMEOUT_SECS", defaults.write_timeout)?;
        let max_message_size = parse(&lookup, "WS_MAX_MESSAGE_SIZE", defaults.max_message_size)?;

        Ok(Config {
            database_url,
            bind_addr,
            cors_origins,
            session: SessionConfig {
                mailbox_capacity,
                ping_period,
                pong_wait,
                write_timeout,
                max_message_size,
            },
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn secs<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse(lookup, key, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

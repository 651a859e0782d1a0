//! Miner configuration from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `CPUMINER_POOL_URL` | required |
//! | `CPUMINER_POOL_USER` | `cpuminer` |
//! | `CPUMINER_POOL_PASS` | `x` |
//! | `CPUMINER_CONNECT_TIMEOUT` | 10 (seconds) |
//!
//! Hashing settings are read by [`CpuMinerConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::cpu_miner::CpuMinerConfig;
use crate::stratum_v1::PoolConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name}={value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Read and parse an optional environment variable.
///
/// Unset or empty gives `Ok(None)`.
pub(crate) fn parse_env<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value,
                reason: e.to_string(),
            }),
        _ => Ok(None),
    }
}

/// Everything the daemon needs.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub pool: PoolConfig,
    pub cpu: CpuMinerConfig,
}

impl MinerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url: String =
            parse_env("CPUMINER_POOL_URL")?.ok_or(ConfigError::Missing("CPUMINER_POOL_URL"))?;
        let username = parse_env("CPUMINER_POOL_USER")?.unwrap_or_else(|| "cpuminer".to_string());
        let password = parse_env("CPUMINER_POOL_PASS")?.unwrap_or_else(|| "x".to_string());
        let timeout_secs: u64 = parse_env("CPUMINER_CONNECT_TIMEOUT")?.unwrap_or(10).max(1);

        Ok(Self {
            pool: PoolConfig {
                url,
                username,
                password,
                connect_timeout: Duration::from_secs(timeout_secs),
                ..PoolConfig::default()
            },
            cpu: CpuMinerConfig::from_env()?,
        })
    }
}

//! Configuration for the CPU hashing workers.
//!
//! Parses environment variables to size and tune the worker pool.

use crate::config::{parse_env, ConfigError};
use crate::sha256d::Level;

/// Worker configuration parsed from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuMinerConfig {
    /// Number of hashing threads to spawn.
    pub thread_count: usize,

    /// Forced kernel width. `None` detects the widest the CPU supports.
    pub hash_level: Option<Level>,

    /// Roll ntime forward when a worker exhausts its nonce range instead
    /// of idling until the next job.
    pub roll_ntime: bool,
}

impl CpuMinerConfig {
    /// Parse configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CPUMINER_THREADS`: Number of threads (default: available cores, minimum 1)
    /// - `CPUMINER_HASH_LEVEL`: `scalar`, `wide8` or `wide16` (default: detect)
    /// - `CPUMINER_NTIME_ROLL`: `true`/`false` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let thread_count = parse_env::<usize>("CPUMINER_THREADS")?
            .unwrap_or_else(default_thread_count)
            .max(1);

        let hash_level = parse_env::<Level>("CPUMINER_HASH_LEVEL")?;

        let roll_ntime = match std::env::var("CPUMINER_NTIME_ROLL") {
            Ok(value) => parse_flag(&value).ok_or_else(|| ConfigError::Invalid {
                name: "CPUMINER_NTIME_ROLL",
                value: value.clone(),
                reason: "expected a boolean".to_string(),
            })?,
            Err(_) => false,
        };

        Ok(Self {
            thread_count,
            hash_level,
            roll_ntime,
        })
    }
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var("CPUMINER_THREADS");
        std::env::remove_var("CPUMINER_HASH_LEVEL");
        std::env::remove_var("CPUMINER_NTIME_ROLL");
    }

    #[test]
    #[serial]
    fn test_defaults_when_not_set() {
        clear_env();

        let config = CpuMinerConfig::from_env().unwrap();
        assert_eq!(config.thread_count, default_thread_count());
        assert_eq!(config.hash_level, None);
        assert!(!config.roll_ntime);
    }

    #[test]
    #[serial]
    fn test_threads_clamped_to_one() {
        clear_env();
        std::env::set_var("CPUMINER_THREADS", "0");

        assert_eq!(CpuMinerConfig::from_env().unwrap().thread_count, 1);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_forced_level_and_roll() {
        clear_env();
        std::env::set_var("CPUMINER_THREADS", "3");
        std::env::set_var("CPUMINER_HASH_LEVEL", "wide8");
        std::env::set_var("CPUMINER_NTIME_ROLL", "yes");

        let config = CpuMinerConfig::from_env().unwrap();
        assert_eq!(
            config,
            CpuMinerConfig {
                thread_count: 3,
                hash_level: Some(Level::Wide8),
                roll_ntime: true,
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_bad_values_rejected() {
        clear_env();
        std::env::set_var("CPUMINER_HASH_LEVEL", "wide32");
        assert!(matches!(
            CpuMinerConfig::from_env(),
            Err(ConfigError::Invalid {
                name: "CPUMINER_HASH_LEVEL",
                ..
            })
        ));

        clear_env();
        std::env::set_var("CPUMINER_NTIME_ROLL", "sometimes");
        assert!(matches!(
            CpuMinerConfig::from_env(),
            Err(ConfigError::Invalid {
                name: "CPUMINER_NTIME_ROLL",
                ..
            })
        ));

        clear_env();
        std::env::set_var("CPUMINER_THREADS", "-2");
        assert!(CpuMinerConfig::from_env().is_err());
        clear_env();
    }
}

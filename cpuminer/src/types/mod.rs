//! Small value types shared across the miner.

use std::fmt;
use std::time::Duration;

mod difficulty;

pub use difficulty::{Difficulty, PoolDifficulty};

/// Hashrate measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HashRate(pub u64); // hashes per second

impl HashRate {
    /// Rate from a hash count over an interval.
    pub fn from_hashes(hashes: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return Self(0);
        }
        Self((hashes as f64 / secs) as u64)
    }

    /// Get value as kilohashes per second
    pub fn as_kilohashes(&self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    /// Get value as megahashes per second
    pub fn as_megahashes(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Get value as gigahashes per second
    pub fn as_gigahashes(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Format as human-readable string with appropriate units
    pub fn to_human_readable(&self) -> String {
        if self.0 >= 1_000_000_000 {
            format!("{:.2} GH/s", self.as_gigahashes())
        } else if self.0 >= 1_000_000 {
            format!("{:.2} MH/s", self.as_megahashes())
        } else if self.0 >= 1_000 {
            format!("{:.2} kH/s", self.as_kilohashes())
        } else {
            format!("{} H/s", self.0)
        }
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_human_readable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashrate_from_hashes() {
        let rate = HashRate::from_hashes(30_000_000, Duration::from_secs(10));
        assert_eq!(rate, HashRate(3_000_000));
        assert_eq!(HashRate::from_hashes(5, Duration::ZERO), HashRate(0));
    }

    #[test]
    fn test_hashrate_human_readable() {
        assert_eq!(HashRate(950).to_string(), "950 H/s");
        assert_eq!(HashRate(12_340).to_string(), "12.34 kH/s");
        assert_eq!(HashRate(5_000_000).to_string(), "5.00 MH/s");
        assert_eq!(HashRate(2_500_000_000).to_string(), "2.50 GH/s");
    }
}

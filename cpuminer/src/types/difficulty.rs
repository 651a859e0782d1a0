//! Difficulty types.

use std::fmt;

use crate::target::{digest_to_be, Target};
use crate::u256::U256;

/// Integer mining difficulty, as achieved by a found share.
///
/// Difficulty is a multiplier of the difficulty-1 target:
/// ```text
/// target = MAX_TARGET / difficulty
/// ```
///
/// Higher difficulty produces a smaller target, so fewer digests qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Difficulty(u64);

impl Difficulty {
    /// Create a new difficulty value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Difficulty a raw SHA-256d digest represents: `MAX_TARGET / digest`.
    ///
    /// Used for logging found shares.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        let value = U256::from_be_bytes(digest_to_be(digest));
        if value == U256::ZERO {
            return Self(u64::MAX);
        }
        Self((U256::from(Target::MAX) / value).saturating_to_u64())
    }
}

impl From<Difficulty> for u64 {
    fn from(diff: Difficulty) -> Self {
        diff.0
    }
}

/// Share difficulty set by a pool in `mining.set_difficulty`.
///
/// Pools on low-hashrate ports send fractional values such as `0.001`.
/// These are kept as sent and honoured by [`to_target`](Self::to_target).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct PoolDifficulty(f64);

impl PoolDifficulty {
    /// Returns `None` for zero, negative and non-finite values.
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Share target for this difficulty.
    pub fn to_target(self) -> Target {
        Target::from_pool_difficulty(self)
    }
}

impl From<Difficulty> for PoolDifficulty {
    fn from(diff: Difficulty) -> Self {
        Self(diff.0.max(1) as f64)
    }
}

impl fmt::Display for PoolDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 && self.0 < u64::MAX as f64 {
            fmt::Display::fmt(&Difficulty(self.0 as u64), f)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SUFFIXES: [(f64, &str); 5] = [(1e15, "P"), (1e12, "T"), (1e9, "G"), (1e6, "M"), (1e3, "K")];

        let value = self.0 as f64;
        let (scaled, suffix) = SUFFIXES
            .iter()
            .find(|(scale, _)| value >= *scale)
            .map(|(scale, suffix)| (value / scale, *suffix))
            .unwrap_or((value, ""));

        if suffix.is_empty() {
            write!(f, "{}", self.0)
        } else if scaled >= 100.0 {
            write!(f, "{:.0}{}", scaled, suffix)
        } else if scaled >= 10.0 {
            write!(f, "{:.1}{}", scaled, suffix)
        } else {
            write!(f, "{:.2}{}", scaled, suffix)
        }
    }
}

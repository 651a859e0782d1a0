//! 256-bit unsigned integer arithmetic.
//!
//! Thin wrapper over `ruint::aliases::U256` exposing only the operations the
//! target and difficulty code needs, in the byte orders it uses.

use ruint::aliases::U256 as Ruint256;
use std::ops::{Div, Shl};

/// A 256-bit unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct U256(Ruint256);

impl U256 {
    /// Zero constant.
    pub const ZERO: Self = Self(Ruint256::ZERO);

    /// Create from big-endian bytes (most significant byte first).
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(Ruint256::from_be_bytes(bytes))
    }

    /// Convert to big-endian bytes.
    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0.to_be_bytes()
    }

    /// Convert to u64, saturating at u64::MAX.
    pub fn saturating_to_u64(self) -> u64 {
        self.0.saturating_to()
    }
}

impl From<u128> for U256 {
    fn from(value: u128) -> Self {
        Self(Ruint256::from(value))
    }
}

impl Shl<usize> for U256 {
    type Output = Self;

    fn shl(self, bits: usize) -> Self::Output {
        Self(self.0 << bits)
    }
}

impl Div for U256 {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Self(self.0 / rhs.0)
    }
}

impl Div<u64> for U256 {
    type Output = Self;

    fn div(self, rhs: u64) -> Self::Output {
        Self(self.0 / Ruint256::from(rhs))
    }
}

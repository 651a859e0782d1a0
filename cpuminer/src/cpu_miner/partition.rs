//! Nonce space partitioning.

use std::fmt;

/// Size of the 32-bit nonce space.
pub const NONCE_SPACE: u64 = 1 << 32;

/// Half-open nonce range `[start, end)` owned by one worker.
///
/// `end` is a `u64` so the last range can reach 2^32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRange {
    pub start: u32,
    pub end: u64,
}

impl NonceRange {
    /// The whole nonce space.
    pub const FULL: Self = Self {
        start: 0,
        end: NONCE_SPACE,
    };

    pub fn new(start: u32, end: u64) -> Self {
        debug_assert!(u64::from(start) <= end && end <= NONCE_SPACE);
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - u64::from(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, nonce: u32) -> bool {
        nonce >= self.start && u64::from(nonce) < self.end
    }
}

impl fmt::Display for NonceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#010x}, {:#011x})", self.start, self.end)
    }
}

/// Split the nonce space evenly between `workers` ranges.
///
/// Ranges are contiguous and in order; the last one absorbs the remainder.
/// Zero workers yields no ranges.
pub fn partition(workers: usize) -> Vec<NonceRange> {
    if workers == 0 {
        return Vec::new();
    }
    let count = (workers as u64).min(NONCE_SPACE);
    let stride = NONCE_SPACE / count;

    (0..count)
        .map(|i| {
            let start = i * stride;
            let end = if i + 1 == count {
                NONCE_SPACE
            } else {
                start + stride
            };
            NonceRange::new(start as u32, end)
        })
        .collect()
}

//! SHA-256d hashing of block headers, scalar or SIMD-wide.
//!
//! Three kernels compute the same function:
//!
//! - [`scalar`]: one header per call, the reference implementation.
//! - 8-lane: [`lanes::sha256d`] instantiated for 8 headers, compiled with
//!   AVX2 on x86.
//! - 16-lane: the same kernel for 16 headers, compiled with AVX-512F.
//!
//! [`Sha256dDispatcher`] picks one once, at construction, and exposes a
//! single `hash_batch` call. It holds no mutable state and is shared by
//! reference between worker threads.

pub mod lanes;
pub mod scalar;

use std::fmt;
use std::str::FromStr;

pub use scalar::HEADER_LEN;

/// Width of the hashing kernel in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// One header per kernel call.
    Scalar,
    /// Eight headers per kernel call (AVX2 on x86).
    Wide8,
    /// Sixteen headers per kernel call (AVX-512F on x86).
    Wide16,
}

impl Level {
    /// Widest level the running CPU accelerates.
    pub fn detect() -> Self {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            if is_x86_feature_detected!("avx512f") {
                return Level::Wide16;
            }
            if is_x86_feature_detected!("avx2") {
                return Level::Wide8;
            }
            Level::Scalar
        }

        // NEON is part of the aarch64 baseline; eight lanes map onto pairs of
        // 128-bit registers.
        #[cfg(target_arch = "aarch64")]
        {
            Level::Wide8
        }

        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Level::Scalar
        }
    }

    /// Number of headers one kernel call hashes.
    pub const fn batch_size(self) -> usize {
        match self {
            Level::Scalar => 1,
            Level::Wide8 => 8,
            Level::Wide16 => 16,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Scalar => "scalar",
            Level::Wide8 => "wide8",
            Level::Wide16 => "wide16",
        };
        f.write_str(name)
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" | "1" => Ok(Level::Scalar),
            "wide8" | "8" | "avx2" => Ok(Level::Wide8),
            "wide16" | "16" | "avx512" => Ok(Level::Wide16),
            other => Err(format!("unknown hash level: {}", other)),
        }
    }
}

/// Uniform entry point to the hash kernels.
///
/// Constructed once at startup. The configured level decides the batch
/// shape; the detected level decides whether the wide kernels run through
/// their accelerated instantiations. A level wider than the CPU supports
/// still produces correct digests: 16 lanes run as two 8-lane calls on an
/// AVX2-only CPU, and as plain portable code without AVX2.
#[derive(Debug, Clone, Copy)]
pub struct Sha256dDispatcher {
    level: Level,
    detected: Level,
}

impl Sha256dDispatcher {
    /// Use the widest level the CPU supports.
    pub fn detect() -> Self {
        Self::with_level(Level::detect())
    }

    /// Use a specific level.
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            detected: Level::detect(),
        }
    }

    /// Level in use.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Natural batch size of the level in use.
    pub fn batch_size(&self) -> usize {
        self.level.batch_size()
    }

    /// Double-hash every header in `headers` into the matching slot of
    /// `outputs`.
    ///
    /// Any number of headers is accepted. Input is fed to the kernel in
    /// chunks of [`batch_size`](Self::batch_size); a short final chunk is
    /// padded by repeating its last header and the padding lanes' digests
    /// are discarded.
    ///
    /// # Panics
    ///
    /// If `headers` and `outputs` differ in length.
    pub fn hash_batch(&self, headers: &[[u8; HEADER_LEN]], outputs: &mut [[u8; 32]]) {
        assert_eq!(
            headers.len(),
            outputs.len(),
            "hash_batch needs one output per header"
        );

        match self.level {
            Level::Scalar => {
                for (header, output) in headers.iter().zip(outputs.iter_mut()) {
                    *output = scalar::sha256d_header(header);
                }
            }
            Level::Wide8 => hash_chunks(headers, outputs, |lanes| self.wide8(lanes)),
            Level::Wide16 => hash_chunks(headers, outputs, |lanes| self.wide16(lanes)),
        }
    }

    fn wide8(&self, headers: &[[u8; HEADER_LEN]; 8]) -> [[u8; 32]; 8] {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        if self.detected >= Level::Wide8 {
            // SAFETY: detection reported AVX2 (AVX-512F implies it).
            return unsafe { x86::sha256d_x8(headers) };
        }

        lanes::sha256d(headers)
    }

    fn wide16(&self, headers: &[[u8; HEADER_LEN]; 16]) -> [[u8; 32]; 16] {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            if self.detected >= Level::Wide16 {
                // SAFETY: detection reported AVX-512F.
                return unsafe { x86::sha256d_x16(headers) };
            }
            if self.detected == Level::Wide8 {
                let (low, high) = split_lanes(headers);
                let mut digests = [[0u8; 32]; 16];
                digests[..8].copy_from_slice(&self.wide8(&low));
                digests[8..].copy_from_slice(&self.wide8(&high));
                return digests;
            }
        }

        lanes::sha256d(headers)
    }
}

impl Default for Sha256dDispatcher {
    fn default() -> Self {
        Self::detect()
    }
}

/// Run a fixed-width kernel over a slice of any length.
fn hash_chunks<const N: usize>(
    headers: &[[u8; HEADER_LEN]],
    outputs: &mut [[u8; 32]],
    kernel: impl Fn(&[[u8; HEADER_LEN]; N]) -> [[u8; 32]; N],
) {
    for (chunk, out) in headers.chunks(N).zip(outputs.chunks_mut(N)) {
        let last = chunk.len() - 1;
        let lanes: [[u8; HEADER_LEN]; N] = std::array::from_fn(|i| chunk[i.min(last)]);
        let digests = kernel(&lanes);
        out.copy_from_slice(&digests[..out.len()]);
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn split_lanes(
    headers: &[[u8; HEADER_LEN]; 16],
) -> ([[u8; HEADER_LEN]; 8], [[u8; HEADER_LEN]; 8]) {
    let low = std::array::from_fn(|i| headers[i]);
    let high = std::array::from_fn(|i| headers[i + 8]);
    (low, high)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86 {
    use super::{lanes, HEADER_LEN};

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn sha256d_x8(headers: &[[u8; HEADER_LEN]; 8]) -> [[u8; 32]; 8] {
        lanes::sha256d(headers)
    }

    #[target_feature(enable = "avx512f")]
    pub(super) unsafe fn sha256d_x16(headers: &[[u8; HEADER_LEN]; 16]) -> [[u8; 32]; 16] {
        lanes::sha256d(headers)
    }
}

//! 256-bit proof-of-work targets.
//!
//! A target is held as 32 big-endian bytes. Block headers carry it in the
//! compact "nbits" form: one exponent byte followed by a 3-byte mantissa,
//! meaning `mantissa * 256^(exponent - 3)`.
//!
//! SHA-256d digests come out of the hash in little-endian numeric order, so
//! comparing one against a target reverses the digest first. The comparison
//! always covers all 32 bytes.

use std::fmt;

use crate::types::PoolDifficulty;
use crate::u256::U256;

/// Largest mantissa that is not negative in the compact encoding.
const MAX_MANTISSA: u32 = 0x007f_ffff;

/// Fractional bits kept when turning a pool difficulty into a target.
const DIFFICULTY_FRACTION_BITS: u32 = 32;

/// A 256-bit big-endian target. A digest meets it when its numeric value is
/// strictly less.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target([u8; 32]);

impl Target {
    /// The all-zero target. No digest meets it.
    pub const ZERO: Self = Self([0; 32]);

    /// Difficulty-1 target, `decode(0x1d00ffff)`.
    pub const MAX: Self = {
        let mut bytes = [0u8; 32];
        bytes[4] = 0xff;
        bytes[5] = 0xff;
        Self(bytes)
    };

    /// Wrap 32 big-endian bytes.
    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Big-endian byte representation.
    pub const fn to_be_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Expand a compact `nbits` value.
    ///
    /// Total over all inputs. Mantissa bytes that would land above the
    /// 32-byte buffer (exponent > 32) are dropped. A negative mantissa (sign
    /// bit 0x00800000 set after shifting) yields [`Target::ZERO`].
    pub fn decode(nbits: u32) -> Self {
        let exponent = (nbits >> 24) as usize;
        let mut mantissa = nbits & 0x00ff_ffff;

        if exponent <= 3 {
            mantissa >>= 8 * (3 - exponent);
        }
        if mantissa > MAX_MANTISSA {
            return Self::ZERO;
        }

        let mut bytes = [0u8; 32];
        if exponent <= 3 {
            bytes[29..].copy_from_slice(&mantissa.to_be_bytes()[1..]);
        } else {
            // Mantissa byte i goes to offset 32 - exponent + i.
            for (i, byte) in mantissa.to_be_bytes()[1..].iter().enumerate() {
                if let Some(pos) = (32 + i).checked_sub(exponent) {
                    bytes[pos] = *byte;
                }
            }
        }
        Self(bytes)
    }

    /// Share target for a pool difficulty: `MAX / difficulty`.
    ///
    /// Computed in fixed point as `(MAX << 32) / round(difficulty * 2^32)`,
    /// which is exact for integer difficulties. Difficulties below 2^-32
    /// get the target of 2^-32; the scaled divisor saturates at `u128::MAX`.
    pub fn from_pool_difficulty(difficulty: PoolDifficulty) -> Self {
        let scale = f64::from(DIFFICULTY_FRACTION_BITS).exp2();
        // Float to int casts saturate.
        let divisor = ((difficulty.value() * scale).round() as u128).max(1);
        let numerator = U256::from(Self::MAX) << DIFFICULTY_FRACTION_BITS as usize;
        Self::from(numerator / U256::from(divisor))
    }

    /// True if `digest`, a raw SHA-256d output, is strictly below this
    /// target.
    pub fn is_met_by(&self, digest: &[u8; 32]) -> bool {
        digest_to_be(digest) < self.0
    }

    /// True for the all-zero target.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }
}

/// Reorder a raw SHA-256d digest into big-endian numeric order.
pub fn digest_to_be(digest: &[u8; 32]) -> [u8; 32] {
    let mut be = *digest;
    be.reverse();
    be
}

impl From<Target> for U256 {
    fn from(target: Target) -> Self {
        U256::from_be_bytes(target.0)
    }
}

impl From<U256> for Target {
    fn from(value: U256) -> Self {
        Self(value.to_be_bytes())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::pow::{CompactTarget, Target as BitcoinTarget};
    use rand::{Rng, SeedableRng};

    fn expected(nbits: u32) -> [u8; 32] {
        BitcoinTarget::from_compact(CompactTarget::from_consensus(nbits)).to_be_bytes()
    }

    #[test]
    fn test_decode_difficulty_one() {
        assert_eq!(
            Target::decode(0x1d00ffff).to_string(),
            "00000000ffff0000000000000000000000000000000000000000000000000000"
        );
        assert_eq!(Target::decode(0x1d00ffff), Target::MAX);
        assert_eq!(Target::MAX.to_be_bytes(), BitcoinTarget::MAX.to_be_bytes());
    }

    #[test]
    fn test_decode_known_vectors() {
        // Block 881423-era mainnet bits
        assert_eq!(
            Target::decode(0x17023a04).to_string(),
            "000000000000000000023a040000000000000000000000000000000000000000"
        );
        // Regtest
        assert_eq!(
            Target::decode(0x207fffff).to_string(),
            "7fffff0000000000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_decode_small_exponents_shift_right() {
        assert_eq!(Target::decode(0x03123456).to_be_bytes()[29..], [0x12, 0x34, 0x56]);
        assert_eq!(Target::decode(0x02123456).to_be_bytes()[29..], [0x00, 0x12, 0x34]);
        assert_eq!(Target::decode(0x01123456).to_be_bytes()[29..], [0x00, 0x00, 0x12]);
        assert!(Target::decode(0x00123456).is_zero());
    }

    #[test]
    fn test_decode_large_exponents_clamp() {
        // Exponent 32: mantissa fills the top three bytes.
        assert_eq!(Target::decode(0x20123456).to_be_bytes()[..3], [0x12, 0x34, 0x56]);
        // Exponent 33: the top mantissa byte falls off.
        assert_eq!(Target::decode(0x21123456).to_be_bytes()[..2], [0x34, 0x56]);
        // Exponent 34: only the low mantissa byte remains.
        assert_eq!(Target::decode(0x22123456).to_be_bytes()[0], 0x56);
        // Nothing left to place.
        assert!(Target::decode(0x23123456).is_zero());
        assert!(Target::decode(0xff7fffff).is_zero());
    }

    #[test]
    fn test_decode_negative_mantissa_is_zero() {
        assert!(Target::decode(0x1d800000).is_zero());
        assert!(Target::decode(0x04923456).is_zero());
    }

    #[test]
    fn test_decode_matches_bitcoin_for_random_nbits() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(21);
        for _ in 0..2000 {
            let exponent: u32 = rng.gen_range(0..=34);
            let mantissa: u32 = rng.gen_range(0..=0x00ff_ffff);
            let nbits = (exponent << 24) | mantissa;
            assert_eq!(
                Target::decode(nbits).to_be_bytes(),
                expected(nbits),
                "nbits {:#010x}",
                nbits
            );
        }
    }

    #[test]
    fn test_is_met_by_compares_all_bytes() {
        let target = Target::decode(0x1d00ffff);

        // Digest bytes are little-endian: the last byte is most significant.
        let mut digest = [0u8; 32];
        digest[27] = 0xff;
        digest[26] = 0xff;
        assert!(!target.is_met_by(&digest), "equal is not below");

        digest[0] = 0x01;
        assert!(!target.is_met_by(&digest), "above in a low byte");

        digest[0] = 0x00;
        digest[26] = 0xfe;
        digest[0] = 0xff;
        assert!(target.is_met_by(&digest), "below in byte 5");

        // Differs from the target only past the first four bytes, where a
        // four-byte comparison would call it equal.
        let mut digest = [0u8; 32];
        digest[27] = 0xff;
        digest[26] = 0xff;
        digest[25] = 0x01;
        assert!(!target.is_met_by(&digest));
    }

    #[test]
    fn test_is_met_by_matches_bitcoin() {
        use bitcoin::hashes::Hash;
        use bitcoin::BlockHash;

        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        for _ in 0..500 {
            let mut target = [0u8; 32];
            let mut digest = [0u8; 32];
            rng.fill(&mut target[..]);
            rng.fill(&mut digest[..]);
            // Share most leading bytes so the comparison is decided late.
            let shared = rng.gen_range(0..32);
            let digest_be = digest_to_be(&digest);
            target[..shared].copy_from_slice(&digest_be[..shared]);

            let ours = Target::from_be_bytes(target).is_met_by(&digest);
            let theirs = BitcoinTarget::from_be_bytes(target)
                .is_met_by(BlockHash::from_byte_array(digest));
            // bitcoin accepts equality; we do not.
            assert_eq!(ours, theirs && digest_be != target);
        }
    }

    fn pool(value: f64) -> Target {
        PoolDifficulty::new(value).unwrap().to_target()
    }

    #[test]
    fn test_from_integer_pool_difficulty() {
        assert_eq!(pool(1.0), Target::MAX);

        assert_eq!(
            pool(2.0).to_string(),
            "000000007fff8000000000000000000000000000000000000000000000000000"
        );
        assert_eq!(pool(8192.0), Target::from(U256::from(Target::MAX) / 8192u64));
        assert!(pool(1000.0) < pool(100.0));
    }

    #[test]
    fn test_from_fractional_pool_difficulty() {
        // Difficulty 1/2 doubles the difficulty-1 target.
        assert_eq!(
            pool(0.5).to_string(),
            "00000001fffe0000000000000000000000000000000000000000000000000000"
        );
        assert_eq!(
            pool(0.001),
            Target::from((U256::from(Target::MAX) << 32) / U256::from(4_294_967u128))
        );
        assert!(pool(0.001) > Target::MAX);
        assert!(pool(1.5) < Target::MAX && pool(1.5) > pool(2.0));

        // Tiny and huge difficulties clamp instead of overflowing.
        assert_eq!(pool(1e-12), Target::from(U256::from(Target::MAX) << 32));
        assert!(pool(1e300) < pool(1e20));
    }
}

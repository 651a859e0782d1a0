//! 80-byte block header templates.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! 0   version      4
//! 4   prev_hash   32
//! 36  merkle_root 32
//! 68  ntime        4
//! 72  nbits        4
//! 76  nonce        4
//! ```
//!
//! A template is built once per piece of work. The search loop only ever
//! touches the nonce, and ntime when rolling.

use crate::sha256d::HEADER_LEN;

const NTIME_OFFSET: usize = 68;
const NONCE_OFFSET: usize = 76;

/// A serialized block header with a mutable nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTemplate {
    bytes: [u8; HEADER_LEN],
}

impl HeaderTemplate {
    /// Serialize a header with nonce zero.
    ///
    /// `prev_hash` and `merkle_root` are copied as given, already in
    /// header byte order.
    pub fn new(
        version: u32,
        prev_hash: &[u8; 32],
        merkle_root: &[u8; 32],
        ntime: u32,
        nbits: u32,
    ) -> Self {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&version.to_le_bytes());
        bytes[4..36].copy_from_slice(prev_hash);
        bytes[36..68].copy_from_slice(merkle_root);
        bytes[68..72].copy_from_slice(&ntime.to_le_bytes());
        bytes[72..76].copy_from_slice(&nbits.to_le_bytes());
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8; HEADER_LEN] {
        &self.bytes
    }

    pub fn ntime(&self) -> u32 {
        read_u32(&self.bytes, NTIME_OFFSET)
    }

    pub fn set_ntime(&mut self, ntime: u32) {
        self.bytes[NTIME_OFFSET..NTIME_OFFSET + 4].copy_from_slice(&ntime.to_le_bytes());
    }

    pub fn nonce(&self) -> u32 {
        read_u32(&self.bytes, NONCE_OFFSET)
    }

    pub fn set_nonce(&mut self, nonce: u32) {
        self.bytes[NONCE_OFFSET..].copy_from_slice(&nonce.to_le_bytes());
    }

    /// Copy of the header with `nonce` filled in.
    pub fn with_nonce(&self, nonce: u32) -> [u8; HEADER_LEN] {
        let mut bytes = self.bytes;
        bytes[NONCE_OFFSET..].copy_from_slice(&nonce.to_le_bytes());
        bytes
    }

    /// Fill `out` with consecutive nonces starting at `first_nonce`.
    ///
    /// Nonces wrap at `u32::MAX`; callers bound the count by their range.
    pub fn fill_batch(&self, first_nonce: u32, out: &mut [[u8; HEADER_LEN]]) {
        for (i, header) in out.iter_mut().enumerate() {
            *header = self.with_nonce(first_nonce.wrapping_add(i as u32));
        }
    }
}

fn read_u32(bytes: &[u8; HEADER_LEN], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sha256d::scalar::sha256d_header;
    use crate::target::Target;
    use crate::test_data as capture;
    use crate::types::Difficulty;
    use bitcoin::block::{Header, Version};
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::hashes::Hash;
    use bitcoin::pow::CompactTarget;
    use bitcoin::{BlockHash, Network, TxMerkleNode};

    #[test]
    fn test_layout_matches_bitcoin_serialization() {
        let prev = [0x11u8; 32];
        let root = [0x22u8; 32];
        let mut template = HeaderTemplate::new(0x2000_0004, &prev, &root, 0x6854_68d7, 0x1702_3a04);
        template.set_nonce(0xdead_beef);

        let header = Header {
            version: Version::from_consensus(0x2000_0004),
            prev_blockhash: BlockHash::from_byte_array(prev),
            merkle_root: TxMerkleNode::from_byte_array(root),
            time: 0x6854_68d7,
            bits: CompactTarget::from_consensus(0x1702_3a04),
            nonce: 0xdead_beef,
        };

        assert_eq!(
            template.bytes().as_slice(),
            bitcoin::consensus::serialize(&header).as_slice()
        );
        assert_eq!(template.nonce(), 0xdead_beef);
        assert_eq!(template.ntime(), 0x6854_68d7);
    }

    #[test]
    fn test_genesis_block_hash() {
        let genesis = genesis_block(Network::Bitcoin).header;
        let mut template = HeaderTemplate::new(
            genesis.version.to_consensus() as u32,
            &genesis.prev_blockhash.to_byte_array(),
            &genesis.merkle_root.to_byte_array(),
            genesis.time,
            genesis.bits.to_consensus(),
        );
        template.set_nonce(genesis.nonce);

        let digest = sha256d_header(template.bytes());
        assert_eq!(digest, genesis.block_hash().to_byte_array());
        assert!(Target::decode(genesis.bits.to_consensus()).is_met_by(&digest));
    }

    #[test]
    fn test_only_nonce_and_ntime_change() {
        let mut template = HeaderTemplate::new(1, &[3; 32], &[4; 32], 100, 0x1d00ffff);
        let original = template.bytes().to_owned();

        template.set_nonce(7);
        assert_eq!(template.bytes()[..76], original[..76]);

        template.set_ntime(101);
        assert_eq!(template.bytes()[..68], original[..68]);
        assert_eq!(template.bytes()[72..76], original[72..76]);
        assert_eq!(template.ntime(), 101);
    }

    #[test]
    fn test_fill_batch_consecutive_nonces() {
        let template = HeaderTemplate::new(1, &[0; 32], &[0; 32], 0, 0);
        let mut batch = [[0u8; HEADER_LEN]; 4];
        template.fill_batch(u32::MAX - 1, &mut batch);

        let nonces: Vec<u32> = batch.iter().map(|h| read_u32(h, NONCE_OFFSET)).collect();
        assert_eq!(nonces, vec![u32::MAX - 1, u32::MAX, 0, 1]);
    }

    #[test]
    fn test_captured_share_meets_pool_difficulty() {
        let mut template = HeaderTemplate::new(
            capture::ROLLED_VERSION,
            &capture::prevhash_header_order(),
            &capture::decode32(capture::MERKLE_ROOT),
            capture::NTIME,
            capture::NBITS,
        );
        template.set_nonce(capture::NONCE);

        let digest = sha256d_header(template.bytes());
        assert_eq!(hex::encode(digest), capture::SHARE_DIGEST);

        let pool_target = capture::pool_difficulty().to_target();
        assert!(pool_target.is_met_by(&digest));
        assert!(!Target::decode(capture::NBITS).is_met_by(&digest));
        assert_eq!(
            Difficulty::from_digest(&digest),
            Difficulty::new(capture::SHARE_DIFFICULTY)
        );
    }
}

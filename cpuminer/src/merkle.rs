//! Coinbase hashing and Merkle root construction.
//!
//! Stratum v1 hands out the coinbase transaction in two pieces with a gap
//! for the extranonces, plus the Merkle branch needed to fold its hash up to
//! the root. Nothing here parses the transaction; the bytes are hashed as
//! given.

use bitcoin::hashes::{sha256d, Hash};

/// SHA-256d of `coinbase1 ‖ extranonce1 ‖ extranonce2 ‖ coinbase2`.
pub fn coinbase_hash(
    coinbase1: &[u8],
    extranonce1: &[u8],
    extranonce2: &[u8],
    coinbase2: &[u8],
) -> [u8; 32] {
    let mut engine = sha256d::Hash::engine();
    for part in [coinbase1, extranonce1, extranonce2, coinbase2] {
        bitcoin::hashes::HashEngine::input(&mut engine, part);
    }
    sha256d::Hash::from_engine(engine).to_byte_array()
}

/// Fold `coinbase_hash` with each branch, left to right.
///
/// Each step double-hashes `current ‖ branch`. Branches are applied exactly
/// in the order given.
pub fn build_root(coinbase_hash: [u8; 32], branches: &[[u8; 32]]) -> [u8; 32] {
    branches.iter().fold(coinbase_hash, |current, branch| {
        let mut pair = [0u8; 64];
        pair[..32].copy_from_slice(&current);
        pair[32..].copy_from_slice(branch);
        sha256d::Hash::hash(&pair).to_byte_array()
    })
}

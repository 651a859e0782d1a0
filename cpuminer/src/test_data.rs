//! Captured pool session used as a known-good vector in tests.
//!
//! One job from a public pool and the share a miner found for it, which the
//! pool accepted at difficulty 8192. The share's own difficulty is 29588.

use crate::types::{Difficulty, PoolDifficulty};

pub const JOB_ID: &str = "875b4b7";

/// Stratum-encoded prevhash, each 4-byte word reversed.
pub const PREVHASH: &str = "6b6455fd6db962c101f2d4fc0d67f4a3bc96391d000152960000000000000000";

pub const COINBASE1: &str = "02000000010000000000000000000000000000000000000000000000000000000000000000ffffffff170330c30d5075626c69632d506f6f6c";

pub const COINBASE2: &str = "ffffffff02e5b5c61200000000220020984a77c289084ff2d434c316bdada021c6c183d507c8a20d3b159b09ac02fe280000000000000000266a24aa21a9edb98ee50410ed4abd48401ed484fc874409d086a3faf0816136a8ad6168314c5800000000";

pub const MERKLE_BRANCHES: [&str; 12] = [
    "21af451ddb51e887ff1feb5592b87290098565035eb8500031aedcc776d4e72a",
    "c5af269519c809a9546d5a58ca6445d3dbb80cb7045448ecc48309af034da8f8",
    "fb9f8f9959f6bb0ceb63fa53aed1d5a615c6b6d3f50a468ea89a45a1234bda74",
    "a4f4fee8e5fc19ca8d93e67b9236c37ddb864982010434745c0abfe9b914980c",
    "33092206642744fbe5499c3e621cd5c6b52733e54fbebd869f070082b807f740",
    "3b857e32c5cff4864efab967b9a456ca03b2167ab96bd9076ce294c8a67a7fe2",
    "881a07cd881d0c3e590b4b090ea8d58e1439dc56c63686f7de23c47045441e30",
    "315e4dbcc8e7b1c9d594a73978268791880dddb2c26eec8e75768668dad99d80",
    "69952b77c632be16b1ac7ac7048f13d4e962b2e215d79a343f01e6e281d7c304",
    "fc63eb4392c4d6c6d689788875fca35143fdcd4f4a82e8698e0e441751a70b4a",
    "09e419bbe20aa3a7640f1b91f50599ceddff899e90d3f18951ad5418c4850a6b",
    "004978aa346b4f1880bcadb3ca3792d771ee6aeca427f61e74baba44b75cfb88",
];

pub const VERSION: u32 = 0x2000_0000;
pub const NBITS: u32 = 0x1702_3a04;
pub const NTIME: u32 = 0x6854_68d7;

pub const EXTRANONCE1: &str = "4128064f";
pub const EXTRANONCE2_SIZE: u8 = 4;
pub const EXTRANONCE2_VALUE: u64 = 0x17;

/// Version the miner rolled to, base version with bits 0x00b44000 set.
pub const ROLLED_VERSION: u32 = 0x20b4_4000;
pub const NONCE: u32 = 0x7552_034c;

pub const POOL_DIFFICULTY: u64 = 8192;
pub const SHARE_DIFFICULTY: u64 = 29588;

pub fn pool_difficulty() -> PoolDifficulty {
    Difficulty::new(POOL_DIFFICULTY).into()
}

/// Merkle root for the job with extranonce2 `17000000`, in header order.
pub const MERKLE_ROOT: &str = "06ddf5f08c36414b95ea54db71a0c28761a98bcf6355919e044f88725519a7cb";

/// Raw SHA-256d of the winning header.
pub const SHARE_DIGEST: &str = "fe27887d7a685806d8516ce9da43ea948638f7bc97e9accf0437020000000000";

/// `mining.notify` line as received.
pub fn notify_line() -> String {
    let branches: Vec<String> = MERKLE_BRANCHES.iter().map(|b| format!("\"{b}\"")).collect();
    format!(
        r#"{{"id":null,"method":"mining.notify","params":["{JOB_ID}","{PREVHASH}","{COINBASE1}","{COINBASE2}",[{}],"20000000","17023a04","685468d7",false]}}"#,
        branches.join(",")
    )
}

pub fn prevhash_header_order() -> [u8; 32] {
    let wire = hex::decode(PREVHASH).unwrap();
    let mut out = [0u8; 32];
    for (dst, src) in out.chunks_exact_mut(4).zip(wire.chunks_exact(4)) {
        dst.copy_from_slice(src);
        dst.reverse();
    }
    out
}

pub fn merkle_branches() -> Vec<[u8; 32]> {
    MERKLE_BRANCHES.iter().map(|b| decode32(b)).collect()
}

pub fn decode32(hex_str: &str) -> [u8; 32] {
    hex::decode(hex_str).unwrap().try_into().unwrap()
}

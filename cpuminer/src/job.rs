//! Jobs from the pool and the work and shares derived from them.
//!
//! A [`Job`] is what `mining.notify` carries. The job dispatcher turns it
//! into one [`Work`] per worker thread: the job plus a way to get the Merkle
//! root and the target shares must meet. Workers report [`Share`]s.

use std::fmt;

use thiserror::Error;

use crate::header::HeaderTemplate;
use crate::merkle;
use crate::target::Target;
use crate::types::Difficulty;

/// Reasons a [`Work`] cannot be mined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkError {
    #[error("job id is empty")]
    EmptyJobId,

    #[error("share target is zero")]
    ZeroTarget,

    #[error("extranonce2 size {0} outside 1..=8")]
    Extranonce2Size(u8),

    #[error("extranonce2 value {value:#x} does not fit in {size} bytes")]
    Extranonce2Overflow { value: u64, size: u8 },
}

/// A unit of work as issued by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,

    /// Previous block hash in header byte order.
    pub prev_hash: [u8; 32],

    pub coinbase1: Vec<u8>,
    pub coinbase2: Vec<u8>,

    /// Applied left to right when folding the coinbase hash.
    pub merkle_branches: Vec<[u8; 32]>,

    pub version: u32,
    pub nbits: u32,
    pub ntime: u32,

    /// Work on earlier jobs is worthless once this job arrives.
    pub clean_jobs: bool,
}

/// Miner-chosen part of the coinbase, serialized little-endian and
/// zero-padded to `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extranonce2 {
    value: u64,
    size: u8,
}

impl Extranonce2 {
    pub fn new(value: u64, size: u8) -> Result<Self, WorkError> {
        if !(1..=8).contains(&size) {
            return Err(WorkError::Extranonce2Size(size));
        }
        if value > Self::max_for(size) {
            return Err(WorkError::Extranonce2Overflow { value, size });
        }
        Ok(Self { value, size })
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    /// The following value, wrapping to zero past the largest value that
    /// fits in `size` bytes.
    pub fn next(self) -> Self {
        let value = if self.value == Self::max_for(self.size) {
            0
        } else {
            self.value + 1
        };
        Self { value, ..self }
    }

    /// Wire bytes, as placed in the coinbase.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.value.to_le_bytes()[..self.size as usize].to_vec()
    }

    fn max_for(size: u8) -> u64 {
        if size >= 8 {
            u64::MAX
        } else {
            (1u64 << (size * 8)) - 1
        }
    }
}

/// Hex of the wire bytes, as sent in `mining.submit`.
impl fmt::Display for Extranonce2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

/// Where the Merkle root of a [`Work`] comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MerkleRootKind {
    /// Root supplied directly, header byte order.
    Fixed([u8; 32]),

    /// Root built from the job's coinbase halves and branches.
    Computed {
        extranonce1: Vec<u8>,
        extranonce2: Extranonce2,
    },
}

/// A job prepared for one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Work {
    pub job: Job,
    pub merkle_root: MerkleRootKind,
    pub share_target: Target,
}

impl Work {
    /// Check that the work can be mined at all.
    pub fn validate(&self) -> Result<(), WorkError> {
        if self.job.id.is_empty() {
            return Err(WorkError::EmptyJobId);
        }
        if self.share_target.is_zero() {
            return Err(WorkError::ZeroTarget);
        }
        Ok(())
    }

    pub fn merkle_root(&self) -> [u8; 32] {
        match &self.merkle_root {
            MerkleRootKind::Fixed(root) => *root,
            MerkleRootKind::Computed {
                extranonce1,
                extranonce2,
            } => {
                let coinbase = merkle::coinbase_hash(
                    &self.job.coinbase1,
                    extranonce1,
                    &extranonce2.to_bytes(),
                    &self.job.coinbase2,
                );
                merkle::build_root(coinbase, &self.job.merkle_branches)
            }
        }
    }

    pub fn extranonce2(&self) -> Option<Extranonce2> {
        match &self.merkle_root {
            MerkleRootKind::Fixed(_) => None,
            MerkleRootKind::Computed { extranonce2, .. } => Some(*extranonce2),
        }
    }

    /// Validate, then build the header with nonce zero.
    pub fn header_template(&self) -> Result<HeaderTemplate, WorkError> {
        self.validate()?;
        Ok(HeaderTemplate::new(
            self.job.version,
            &self.job.prev_hash,
            &self.merkle_root(),
            self.job.ntime,
            self.job.nbits,
        ))
    }
}

/// A nonce whose header digest met the share target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub job_id: String,
    pub extranonce2: Option<Extranonce2>,
    pub ntime: u32,
    pub nonce: u32,

    /// Raw SHA-256d of the header.
    pub digest: [u8; 32],
}

impl Share {
    pub fn difficulty(&self) -> Difficulty {
        Difficulty::from_digest(&self.digest)
    }
}

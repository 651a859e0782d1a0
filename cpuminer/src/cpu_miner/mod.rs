//! CPU mining backend.
//!
//! One `std::thread` per worker hashes its own slice of the nonce space
//! through the shared [`Sha256dDispatcher`](crate::sha256d::Sha256dDispatcher).
//! The [`JobDispatcher`] turns pool jobs into per-worker [`Work`](crate::job::Work)
//! and sends each worker an owned copy.
//!
//! # Configuration
//!
//! - `CPUMINER_THREADS=N` - Number of mining threads (default: core count)
//! - `CPUMINER_HASH_LEVEL=L` - Force `scalar`, `wide8` or `wide16`
//! - `CPUMINER_NTIME_ROLL=1` - Roll ntime after exhausting the nonce range

mod config;
mod dispatch;
mod hasher;
mod partition;
mod thread;

pub use config::CpuMinerConfig;
pub use dispatch::JobDispatcher;
pub use hasher::{HasherContext, MinerCommand, MAX_NTIME_ROLLS};
pub use partition::{partition, NonceRange, NONCE_SPACE};
pub use thread::CpuWorker;

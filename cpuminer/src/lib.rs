//! SHA-256d CPU miner speaking Stratum v1.
//!
//! Jobs arrive from a pool over [`stratum_v1`], are fanned out by
//! [`cpu_miner::JobDispatcher`] to one hashing thread per core, and shares
//! flow back to the pool. [`daemon::Daemon`] ties it together.

pub mod config;
pub mod cpu_miner;
pub mod daemon;
pub mod header;
pub mod job;
pub mod merkle;
pub mod sha256d;
pub mod stats;
pub mod stratum_v1;
pub mod target;
pub mod tracing;
pub mod types;
pub mod u256;

#[cfg(test)]
mod test_data;

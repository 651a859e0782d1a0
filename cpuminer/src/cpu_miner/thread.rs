//! Handle to one hashing thread.
//!
//! Uses the actor pattern with a dedicated `std::thread` for hashing; the
//! rest of the miner talks to it only through [`MinerCommand`]s.

use std::io;
use std::sync::mpsc;
use std::thread::JoinHandle;

use super::hasher::{self, HasherContext, MinerCommand};
use super::partition::NonceRange;
use crate::tracing::prelude::*;

/// A running hashing thread.
///
/// Dropping the handle signals the thread to stop but does not wait for
/// it; call [`join`](Self::join) for that.
pub struct CpuWorker {
    /// Human-readable name for logging.
    name: String,

    range: NonceRange,

    /// Channel for sending commands to the mining thread.
    command_tx: mpsc::Sender<MinerCommand>,

    handle: Option<JoinHandle<()>>,
}

impl CpuWorker {
    /// Spawn the mining thread.
    pub fn spawn(ctx: HasherContext) -> io::Result<Self> {
        let (command_tx, command_rx) = mpsc::channel();
        let name = ctx.name.clone();
        let range = ctx.range;

        let handle = std::thread::Builder::new()
            .name(format!("cpuminer-{}", name))
            .spawn(move || hasher::run_mining_loop(ctx, command_rx))?;

        Ok(Self {
            name,
            range,
            command_tx,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn range(&self) -> NonceRange {
        self.range
    }

    /// A sender the job dispatcher can keep.
    pub fn command_sender(&self) -> mpsc::Sender<MinerCommand> {
        self.command_tx.clone()
    }

    /// Signal the mining thread to shut down.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(MinerCommand::Shutdown);
    }

    /// Signal shutdown and wait for the thread to exit.
    pub fn join(mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(thread = %self.name, "Mining thread panicked");
            }
        }
    }
}

impl Drop for CpuWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

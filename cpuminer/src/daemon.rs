//! Daemon lifecycle management for the miner.
//!
//! This module wires the pool client to the hashing threads, relays jobs
//! and shares between them, and handles signals and graceful shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::tracing::prelude::*;
use crate::{
    config::MinerConfig,
    cpu_miner::{self, CpuWorker, HasherContext, JobDispatcher},
    job::Share,
    sha256d::Sha256dDispatcher,
    stats::MinerStats,
    stratum_v1::{ClientCommand, ClientEvent, StratumV1Client, SubmitParams},
    types::HashRate,
};

/// How often hashrate and share counts are logged.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// The main daemon.
pub struct Daemon {
    config: MinerConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    /// Create a new daemon instance.
    pub fn new(config: MinerConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run the daemon until a signal arrives or the pool connection ends.
    ///
    /// Returns an error if the pool connection failed.
    pub async fn run(self) -> anyhow::Result<()> {
        let hasher = Arc::new(match self.config.cpu.hash_level {
            Some(level) => Sha256dDispatcher::with_level(level),
            None => Sha256dDispatcher::detect(),
        });
        info!(
            pool = %self.config.pool.url,
            user = %self.config.pool.username,
            threads = self.config.cpu.thread_count,
            level = %hasher.level(),
            "CPU miner starting"
        );

        let running = Arc::new(AtomicBool::new(true));
        let epoch = Arc::new(AtomicU64::new(0));
        let stats = Arc::new(MinerStats::new());
        let (share_tx, share_rx) = mpsc::channel::<Share>(256);

        let mut workers = Vec::with_capacity(self.config.cpu.thread_count);
        for (index, range) in cpu_miner::partition(self.config.cpu.thread_count)
            .into_iter()
            .enumerate()
        {
            let ctx = HasherContext {
                name: format!("cpu{}", index),
                range,
                dispatcher: hasher.clone(),
                running: running.clone(),
                epoch: epoch.clone(),
                share_tx: share_tx.clone(),
                stats: stats.clone(),
                roll_ntime: self.config.cpu.roll_ntime,
            };
            let worker = CpuWorker::spawn(ctx).context("failed to spawn mining thread")?;
            debug!(thread = %worker.name(), range = %worker.range(), "Worker started");
            workers.push(worker);
        }
        // Workers hold the only senders; the relay sees the channel close
        // once they have all exited.
        drop(share_tx);

        let jobs = JobDispatcher::new(
            workers.iter().map(CpuWorker::command_sender).collect(),
            epoch,
        );
        debug!(workers = jobs.worker_count(), "Job dispatcher ready");

        // Pool client
        let (event_tx, event_rx) = mpsc::channel::<ClientEvent>(100);
        let (command_tx, command_rx) = mpsc::channel::<ClientCommand>(100);
        let client = StratumV1Client::with_commands(
            self.config.pool.clone(),
            event_tx,
            command_rx,
            self.shutdown.clone(),
        );
        let mut client_task = self.tracker.spawn(client.run());

        // Jobs down, shares up
        let relay = Relay {
            jobs,
            stats: stats.clone(),
            username: self.config.pool.username.clone(),
            command_tx,
        };
        self.tracker
            .spawn(relay.run(event_rx, share_rx, self.shutdown.clone()));

        self.tracker.spawn(report_stats(
            stats.clone(),
            STATS_INTERVAL,
            self.shutdown.clone(),
        ));

        self.tracker.close();

        info!("Started.");
        info!("For debugging, set RUST_LOG=cpuminer=debug or trace.");

        // Install signal handlers
        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        // Wait for a shutdown signal or the end of the pool session
        let outcome = tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT.");
                Ok(())
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM.");
                Ok(())
            },
            result = &mut client_task => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!(error = %e, "Pool connection failed.");
                    Err(anyhow::Error::new(e).context("pool connection failed"))
                }
                Err(e) => Err(anyhow::Error::new(e).context("pool client task failed")),
            },
        };

        // Initiate shutdown
        self.shutdown.cancel();
        running.store(false, Ordering::Release);

        // Wait for all tasks to complete, then the hashing threads
        self.tracker.wait().await;
        tokio::task::spawn_blocking(move || {
            for worker in workers {
                worker.join();
            }
        })
        .await
        .context("joining mining threads")?;

        let summary = stats.snapshot();
        info!(
            accepted = summary.accepted,
            rejected = summary.rejected,
            stale = summary.stale,
            "Exiting."
        );

        outcome
    }
}

/// Moves pool events to the job dispatcher and worker shares to the pool.
struct Relay {
    jobs: JobDispatcher,
    stats: Arc<MinerStats>,
    username: String,
    command_tx: mpsc::Sender<ClientCommand>,
}

impl Relay {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<ClientEvent>,
        mut shares: mpsc::Receiver<Share>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        self.jobs.idle_all();
                        break;
                    }
                },

                share = shares.recv() => match share {
                    Some(share) => self.handle_share(share).await,
                    None => break,
                },

                _ = shutdown.cancelled() => break,
            }
        }
    }

    fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Subscribed {
                extranonce1,
                extranonce2_size,
            }
            | ClientEvent::ExtranonceChanged {
                extranonce1,
                extranonce2_size,
            } => {
                if let Err(e) = self.jobs.set_subscription(extranonce1, extranonce2_size) {
                    warn!(error = %e, "Unusable extranonce from pool");
                }
            }

            ClientEvent::Authorized => {
                info!(user = %self.username, "Authorized");
            }

            ClientEvent::NewJob(job) => {
                self.jobs.dispatch(job);
            }

            ClientEvent::DifficultyChanged(difficulty) => {
                info!(difficulty = %difficulty, "Pool difficulty changed");
                self.jobs.set_difficulty(difficulty);
            }

            ClientEvent::ShareAccepted {
                job_id,
                nonce,
                latency,
            } => {
                self.stats.record_accepted(latency);
                info!(
                    job_id = %job_id,
                    nonce = %format_args!("{:#010x}", nonce),
                    latency_ms = latency.as_millis() as u64,
                    "Share accepted"
                );
            }

            ClientEvent::ShareRejected {
                job_id,
                nonce,
                reason,
                latency,
            } => {
                self.stats.record_rejected(latency);
                warn!(
                    job_id = %job_id,
                    nonce = %format_args!("{:#010x}", nonce),
                    reason = %reason,
                    "Share rejected"
                );
            }

            ClientEvent::Disconnected => {
                warn!("Pool disconnected, idling workers");
                self.jobs.idle_all();
            }
        }
    }

    async fn handle_share(&mut self, share: Share) {
        if !self.jobs.is_current(&share.job_id) {
            self.stats.record_stale();
            debug!(job_id = %share.job_id, nonce = %format_args!("{:#010x}", share.nonce), "Dropping stale share");
            return;
        }

        info!(
            job_id = %share.job_id,
            nonce = %format_args!("{:#010x}", share.nonce),
            difficulty = %share.difficulty(),
            "Submitting share"
        );
        self.stats.record_submitted();

        let params = SubmitParams {
            username: self.username.clone(),
            job_id: share.job_id,
            extranonce2: share.extranonce2,
            ntime: share.ntime,
            nonce: share.nonce,
        };
        if self
            .command_tx
            .send(ClientCommand::SubmitShare(params))
            .await
            .is_err()
        {
            debug!("Pool client gone, share dropped");
        }
    }
}

/// Log hashrate and share counts every `interval`.
async fn report_stats(stats: Arc<MinerStats>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    let mut last_hashes = stats.hashes();
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = stats.snapshot();
                let hashrate = HashRate::from_hashes(
                    snapshot.hashes.saturating_sub(last_hashes),
                    last_tick.elapsed(),
                );
                last_hashes = snapshot.hashes;
                last_tick = Instant::now();

                info!(
                    hashrate = %hashrate,
                    submitted = snapshot.submitted,
                    accepted = snapshot.accepted,
                    rejected = snapshot.rejected,
                    stale = snapshot.stale,
                    latency_ms = snapshot.average_latency.map(|d| d.as_millis() as u64).unwrap_or(0),
                    "Mining stats"
                );
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

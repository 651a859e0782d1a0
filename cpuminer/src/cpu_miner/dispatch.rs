//! Job fan-out from the pool client to the hashing threads.
//!
//! The dispatcher owns the session state a worker needs to turn a
//! [`Job`] into [`Work`]: extranonce1, the extranonce2 counter and the
//! share difficulty. Every dispatch sends each worker its own deep copy
//! over its command channel; nothing about a job is shared by pointer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

use super::hasher::MinerCommand;
use crate::{
    job::{Extranonce2, Job, MerkleRootKind, Work, WorkError},
    target::Target,
    tracing::prelude::*,
    types::PoolDifficulty,
};

/// Job ids kept as valid targets for share submission.
const RECENT_JOBS: usize = 8;

#[derive(Debug, Clone)]
struct Session {
    extranonce1: Vec<u8>,
    next_extranonce2: Extranonce2,
}

/// Hands jobs to workers.
#[derive(Debug)]
pub struct JobDispatcher {
    workers: Vec<mpsc::Sender<MinerCommand>>,

    /// Shared with every worker; bumped on each clean job.
    epoch: Arc<AtomicU64>,

    session: Option<Session>,
    difficulty: Option<PoolDifficulty>,

    /// Latest job, kept for re-dispatch when the session changes.
    current: Option<Job>,

    /// Ids still worth submitting shares for, oldest first.
    recent: VecDeque<String>,
}

impl JobDispatcher {
    pub fn new(workers: Vec<mpsc::Sender<MinerCommand>>, epoch: Arc<AtomicU64>) -> Self {
        Self {
            workers,
            epoch,
            session: None,
            difficulty: None,
            current: None,
            recent: VecDeque::with_capacity(RECENT_JOBS),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Install extranonce parameters from `mining.subscribe` or
    /// `mining.set_extranonce`.
    ///
    /// Resets the extranonce2 counter. A held job is dispatched as clean,
    /// since work built on the old extranonce1 is no longer valid.
    pub fn set_subscription(
        &mut self,
        extranonce1: Vec<u8>,
        extranonce2_size: u8,
    ) -> Result<(), WorkError> {
        let next_extranonce2 = Extranonce2::new(0, extranonce2_size)?;
        self.session = Some(Session {
            extranonce1,
            next_extranonce2,
        });

        if let Some(mut job) = self.current.take() {
            job.clean_jobs = true;
            self.dispatch(job);
        }
        Ok(())
    }

    /// Share difficulty for jobs dispatched from now on.
    pub fn set_difficulty(&mut self, difficulty: PoolDifficulty) {
        self.difficulty = Some(difficulty);
    }

    pub fn difficulty(&self) -> Option<PoolDifficulty> {
        self.difficulty
    }

    /// Fan a job out to every worker.
    ///
    /// Returns the number of workers that received it. Before a
    /// subscription exists the job is held and nothing is sent.
    pub fn dispatch(&mut self, job: Job) -> usize {
        let Some(session) = self.session.as_mut() else {
            debug!(job_id = %job.id, "Holding job until subscribed");
            self.current = Some(job);
            return 0;
        };

        let extranonce2 = session.next_extranonce2;
        session.next_extranonce2 = extranonce2.next();

        let share_target = match self.difficulty {
            Some(difficulty) => difficulty.to_target(),
            None => Target::decode(job.nbits),
        };

        let epoch = if job.clean_jobs {
            self.recent.clear();
            self.epoch.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.epoch.load(Ordering::Acquire)
        };

        if self.recent.len() == RECENT_JOBS {
            self.recent.pop_front();
        }
        self.recent.push_back(job.id.clone());

        let work = Work {
            job: job.clone(),
            merkle_root: MerkleRootKind::Computed {
                extranonce1: session.extranonce1.clone(),
                extranonce2,
            },
            share_target,
        };

        let delivered = self
            .workers
            .iter()
            .filter(|tx| {
                tx.send(MinerCommand::Assign {
                    work: Box::new(work.clone()),
                    epoch,
                })
                .is_ok()
            })
            .count();

        debug!(
            job_id = %job.id,
            clean = job.clean_jobs,
            extranonce2 = %extranonce2,
            target = %share_target,
            workers = delivered,
            "Dispatched job"
        );

        self.current = Some(job);
        delivered
    }

    /// Whether a share for `job_id` is still worth submitting.
    pub fn is_current(&self, job_id: &str) -> bool {
        self.recent.iter().any(|id| id == job_id)
    }

    /// Stop all workers hashing, e.g. after the pool connection drops.
    ///
    /// Forgets the session; a new subscription is needed before more work
    /// goes out.
    pub fn idle_all(&mut self) {
        self.session = None;
        self.current = None;
        self.recent.clear();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        for tx in &self.workers {
            let _ = tx.send(MinerCommand::Idle);
        }
    }
}

//! CPU mining loop.
//!
//! Runs in a dedicated `std::thread` to avoid blocking the Tokio runtime.
//! Work arrives as owned [`Work`] values over an `mpsc` channel; the
//! header template built from it is local to the thread and never shared.
//!
//! The loop hashes in chunks of kernel-sized batches. Before each batch it
//! checks the shared running flag, the clean-job epoch and the command
//! queue, so shutdown and job replacement take effect within one batch. A
//! non-clean job only waits for the batch in flight.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc::{self, RecvTimeoutError, TryRecvError},
    Arc,
};
use std::time::Duration;

use tokio::sync::mpsc as tokio_mpsc;

use super::partition::NonceRange;
use crate::{
    header::HeaderTemplate,
    job::{Share, Work},
    sha256d::{Level, Sha256dDispatcher, HEADER_LEN},
    stats::MinerStats,
    tracing::prelude::*,
};

/// Largest batch any kernel hashes in one call.
const MAX_BATCH: usize = Level::Wide16.batch_size();

/// Batches between hash count updates.
const BATCHES_PER_CHUNK: usize = 256;

/// How long an idle worker waits for a command before re-checking the
/// running flag.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Upper bound on ntime rolls for one piece of work.
pub const MAX_NTIME_ROLLS: u32 = 600;

/// Commands sent to the mining thread.
#[derive(Debug)]
pub enum MinerCommand {
    /// Start on new work.
    ///
    /// `epoch` is the clean-job epoch the work was issued under. When the
    /// shared epoch moves past it, the work is abandoned mid-chunk.
    Assign { work: Box<Work>, epoch: u64 },

    /// Go idle (stop hashing).
    Idle,

    /// Shutdown the thread.
    Shutdown,
}

/// Everything a mining thread shares with the rest of the miner.
#[derive(Debug, Clone)]
pub struct HasherContext {
    /// Name for logging.
    pub name: String,

    /// Nonces this thread owns.
    pub range: NonceRange,

    pub dispatcher: Arc<Sha256dDispatcher>,

    /// Cleared once to stop every thread.
    pub running: Arc<AtomicBool>,

    /// Bumped by the job dispatcher on every clean job.
    pub epoch: Arc<AtomicU64>,

    pub share_tx: tokio_mpsc::Sender<Share>,
    pub stats: Arc<MinerStats>,
    pub roll_ntime: bool,
}

impl HasherContext {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

/// Search state for the work in hand.
struct Search {
    work: Work,
    template: HeaderTemplate,
    epoch: u64,
    next_nonce: u64,
    rolls: u32,
}

enum Progress {
    /// More nonces left in the range.
    Continue,
    /// Range finished without being interrupted.
    Exhausted,
    /// A clean job superseded this work.
    Superseded,
    /// Running flag cleared or the command channel closed.
    Stopped,
    /// A command arrived mid-chunk.
    Command(MinerCommand),
}

/// Run the CPU mining loop until shutdown.
///
/// Returns when the running flag is cleared, a `Shutdown` command arrives,
/// or the command channel closes.
pub fn run_mining_loop(ctx: HasherContext, cmd_rx: mpsc::Receiver<MinerCommand>) {
    let mut current: Option<Search> = None;
    let mut headers = [[0u8; HEADER_LEN]; MAX_BATCH];
    let mut digests = [[0u8; 32]; MAX_BATCH];

    debug!(thread = %ctx.name, range = %ctx.range, level = %ctx.dispatcher.level(), "Mining thread started");

    loop {
        if !ctx.is_running() {
            break;
        }

        // Idle threads wait for work.
        if current.is_none() {
            match cmd_rx.recv_timeout(IDLE_POLL) {
                Ok(command) => {
                    if !apply_command(&ctx, &mut current, command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            continue;
        }
        let Some(search) = current.as_mut() else {
            continue;
        };

        match search_chunk(&ctx, search, &cmd_rx, &mut headers, &mut digests) {
            Progress::Continue => {}
            Progress::Exhausted => {
                if ctx.roll_ntime && search.rolls < MAX_NTIME_ROLLS {
                    let ntime = search.template.ntime().wrapping_add(1);
                    search.template.set_ntime(ntime);
                    search.next_nonce = u64::from(ctx.range.start);
                    search.rolls += 1;
                    trace!(thread = %ctx.name, ntime = %format_args!("{:08x}", ntime), "Rolled ntime");
                } else {
                    debug!(
                        thread = %ctx.name,
                        job_id = %search.work.job.id,
                        "Nonce range exhausted, idling"
                    );
                    current = None;
                }
            }
            Progress::Superseded => {
                trace!(thread = %ctx.name, job_id = %search.work.job.id, "Work superseded by clean job");
                current = None;
            }
            Progress::Command(command) => {
                // Later commands are picked up before the next batch.
                if !apply_command(&ctx, &mut current, command) {
                    break;
                }
            }
            Progress::Stopped => break,
        }
    }

    debug!(thread = %ctx.name, "Mining thread exiting");
}

/// Act on a command. Returns false when the thread should exit.
fn apply_command(ctx: &HasherContext, current: &mut Option<Search>, command: MinerCommand) -> bool {
    match command {
        MinerCommand::Assign { work, epoch } => {
            *current = start_search(ctx, *work, epoch);
        }
        MinerCommand::Idle => {
            if current.take().is_some() {
                debug!(thread = %ctx.name, "Going idle");
            }
        }
        MinerCommand::Shutdown => return false,
    }
    true
}

/// Nonces to hash in the next batch: the kernel batch size, or what is
/// left of the range if that is smaller.
fn batch_len(remaining: u64, batch: usize) -> usize {
    remaining.min(batch as u64) as usize
}

/// Build the header for new work, or idle if the work is unusable.
fn start_search(ctx: &HasherContext, work: Work, epoch: u64) -> Option<Search> {
    if epoch != ctx.current_epoch() {
        trace!(thread = %ctx.name, job_id = %work.job.id, "Skipping work from an old epoch");
        return None;
    }

    match work.header_template() {
        Ok(template) => {
            debug!(
                thread = %ctx.name,
                job_id = %work.job.id,
                target = %work.share_target,
                "Starting work"
            );
            Some(Search {
                work,
                template,
                epoch,
                next_nonce: u64::from(ctx.range.start),
                rolls: 0,
            })
        }
        Err(e) => {
            warn!(thread = %ctx.name, job_id = %work.job.id, error = %e, "Invalid work, idling");
            None
        }
    }
}

/// Hash up to [`BATCHES_PER_CHUNK`] batches of the current search.
///
/// Stops early for shutdown, a clean job, or any queued command.
fn search_chunk(
    ctx: &HasherContext,
    search: &mut Search,
    cmd_rx: &mpsc::Receiver<MinerCommand>,
    headers: &mut [[u8; HEADER_LEN]; MAX_BATCH],
    digests: &mut [[u8; 32]; MAX_BATCH],
) -> Progress {
    let batch = ctx.dispatcher.batch_size().min(MAX_BATCH);
    let mut hashed = 0u64;

    let progress = 'chunk: {
        for _ in 0..BATCHES_PER_CHUNK {
            if !ctx.is_running() {
                break 'chunk Progress::Stopped;
            }
            if ctx.current_epoch() != search.epoch {
                break 'chunk Progress::Superseded;
            }
            match cmd_rx.try_recv() {
                Ok(command) => break 'chunk Progress::Command(command),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break 'chunk Progress::Stopped,
            }

            let remaining = ctx.range.end.saturating_sub(search.next_nonce);
            if remaining == 0 {
                break 'chunk Progress::Exhausted;
            }
            let count = batch_len(remaining, batch);
            let first_nonce = search.next_nonce as u32;

            search
                .template
                .fill_batch(first_nonce, &mut headers[..count]);
            ctx.dispatcher
                .hash_batch(&headers[..count], &mut digests[..count]);

            for (i, digest) in digests[..count].iter().enumerate() {
                if search.work.share_target.is_met_by(digest) {
                    emit_share(ctx, search, first_nonce.wrapping_add(i as u32), *digest);
                }
            }

            search.next_nonce += count as u64;
            hashed += count as u64;
        }

        if search.next_nonce >= ctx.range.end {
            Progress::Exhausted
        } else {
            Progress::Continue
        }
    };

    ctx.stats.add_hashes(hashed);
    progress
}

fn emit_share(ctx: &HasherContext, search: &Search, nonce: u32, digest: [u8; 32]) {
    let share = Share {
        job_id: search.work.job.id.clone(),
        extranonce2: search.work.extranonce2(),
        ntime: search.template.ntime(),
        nonce,
        digest,
    };

    debug!(
        thread = %ctx.name,
        job_id = %share.job_id,
        nonce = %format_args!("{:#010x}", nonce),
        difficulty = %share.difficulty(),
        "Share found"
    );

    // Blocking send is fine here: we're in a std::thread.
    if ctx.share_tx.blocking_send(share).is_err() {
        trace!(thread = %ctx.name, "Share channel closed, dropping share");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_miner::NONCE_SPACE;
    use crate::job::{Job, MerkleRootKind};
    use crate::sha256d::scalar::sha256d_header;
    use crate::target::{digest_to_be, Target};
    use std::thread::JoinHandle;
    use std::time::Instant;

    const MERKLE_ROOT: [u8; 32] = [0x3b; 32];

    fn scenario_job(id: &str) -> Job {
        Job {
            id: id.into(),
            prev_hash: [0; 32],
            coinbase1: Vec::new(),
            coinbase2: Vec::new(),
            merkle_branches: Vec::new(),
            version: 1,
            nbits: 0x1d00ffff,
            ntime: 0x5f00_0000,
            clean_jobs: true,
        }
    }

    fn fixed_work(id: &str, share_target: Target) -> Work {
        Work {
            job: scenario_job(id),
            merkle_root: MerkleRootKind::Fixed(MERKLE_ROOT),
            share_target,
        }
    }

    /// Met only by an all-zero digest.
    fn hard_target() -> Target {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        Target::from_be_bytes(bytes)
    }

    /// Met by roughly one digest in 256.
    fn easy_target() -> Target {
        let mut bytes = [0xff; 32];
        bytes[0] = 0;
        Target::from_be_bytes(bytes)
    }

    struct Harness {
        cmd_tx: mpsc::Sender<MinerCommand>,
        share_rx: tokio_mpsc::Receiver<Share>,
        running: Arc<AtomicBool>,
        epoch: Arc<AtomicU64>,
        stats: Arc<MinerStats>,
        handle: JoinHandle<()>,
    }

    impl Harness {
        fn start(range: NonceRange, level: Level, roll_ntime: bool) -> Self {
            let (cmd_tx, cmd_rx) = mpsc::channel();
            let (share_tx, share_rx) = tokio_mpsc::channel(4096);
            let running = Arc::new(AtomicBool::new(true));
            let epoch = Arc::new(AtomicU64::new(0));
            let stats = Arc::new(MinerStats::new());

            let ctx = HasherContext {
                name: "test".into(),
                range,
                dispatcher: Arc::new(Sha256dDispatcher::with_level(level)),
                running: running.clone(),
                epoch: epoch.clone(),
                share_tx,
                stats: stats.clone(),
                roll_ntime,
            };
            let handle = std::thread::spawn(move || run_mining_loop(ctx, cmd_rx));

            Self {
                cmd_tx,
                share_rx,
                running,
                epoch,
                stats,
                handle,
            }
        }

        fn assign(&self, work: Work) {
            let epoch = self.epoch.load(Ordering::Acquire);
            self.cmd_tx
                .send(MinerCommand::Assign {
                    work: Box::new(work),
                    epoch,
                })
                .unwrap();
        }

        fn wait_for_hashes(&self, at_least: u64) {
            let deadline = Instant::now() + Duration::from_secs(30);
            while self.stats.hashes() < at_least {
                assert!(Instant::now() < deadline, "worker made no progress");
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        fn stop(mut self) -> Vec<Share> {
            self.cmd_tx.send(MinerCommand::Shutdown).unwrap();
            self.handle.join().unwrap();
            let mut shares = Vec::new();
            while let Ok(share) = self.share_rx.try_recv() {
                shares.push(share);
            }
            shares
        }
    }

    fn scenario_digests() -> Vec<[u8; 32]> {
        let template = fixed_work("1", Target::MAX).header_template().unwrap();
        (0..1000u32)
            .map(|nonce| sha256d_header(&template.with_nonce(nonce)))
            .collect()
    }

    #[test]
    fn test_reports_unique_nonce_below_lowered_target() {
        let digests = scenario_digests();
        let mut sorted: Vec<[u8; 32]> = digests.iter().map(digest_to_be).collect();
        sorted.sort();
        // Only the smallest digest is strictly below the second smallest.
        let target = Target::from_be_bytes(sorted[1]);
        let expected_nonce = digests
            .iter()
            .position(|d| digest_to_be(d) == sorted[0])
            .unwrap() as u32;

        for level in [Level::Scalar, Level::Wide8, Level::Wide16] {
            let harness = Harness::start(NonceRange::new(0, 1000), level, false);
            harness.assign(fixed_work("1", target));
            harness.wait_for_hashes(1000);

            let shares = harness.stop();
            assert_eq!(shares.len(), 1, "level {}", level);
            let share = &shares[0];
            assert_eq!(share.job_id, "1");
            assert_eq!(share.nonce, expected_nonce);
            assert_eq!(share.ntime, 0x5f00_0000);
            assert_eq!(share.extranonce2, None);

            // Independent re-hash of the exact header.
            let template = fixed_work("1", target).header_template().unwrap();
            let rehash = sha256d_header(&template.with_nonce(share.nonce));
            assert_eq!(rehash, share.digest);
            assert!(target.is_met_by(&rehash));
        }
    }

    #[test]
    fn test_exhausted_range_hashes_exactly_once() {
        let harness = Harness::start(NonceRange::new(100, 237), Level::Wide8, false);
        harness.assign(fixed_work("1", hard_target()));
        harness.wait_for_hashes(137);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(harness.stats.hashes(), 137);
        assert!(harness.stop().is_empty());
    }

    #[test]
    fn test_ntime_rolls_after_exhaustion() {
        let mut target = [0xff; 32];
        target[0] = 0x7f;
        let harness = Harness::start(NonceRange::new(0, 4), Level::Scalar, true);
        harness.assign(fixed_work("1", Target::from_be_bytes(target)));
        harness.wait_for_hashes(4 * (1 + u64::from(MAX_NTIME_ROLLS)));
        std::thread::sleep(Duration::from_millis(50));

        // Range restarts after each roll until the roll budget is spent.
        assert_eq!(harness.stats.hashes(), 4 * (1 + u64::from(MAX_NTIME_ROLLS)));
        let shares = harness.stop();
        assert!(!shares.is_empty());
        assert!(shares.iter().any(|s| s.ntime > 0x5f00_0000));
        assert!(shares
            .iter()
            .all(|s| s.ntime <= 0x5f00_0000 + MAX_NTIME_ROLLS && s.nonce < 4));
    }

    #[test]
    fn test_clean_job_abandons_search() {
        let harness = Harness::start(NonceRange::FULL, Level::Wide8, false);
        harness.assign(fixed_work("old", hard_target()));
        harness.wait_for_hashes(1);

        harness.epoch.fetch_add(1, Ordering::AcqRel);
        harness.assign(fixed_work("new", easy_target()));

        let before = harness.stats.hashes();
        harness.wait_for_hashes(before + 64);
        let shares = harness.stop();
        assert!(!shares.is_empty());
        assert!(shares.iter().all(|s| s.job_id == "new"));
    }

    #[test]
    fn test_non_clean_job_replaces_search() {
        let harness = Harness::start(NonceRange::FULL, Level::Wide8, false);
        harness.assign(fixed_work("old", hard_target()));
        harness.wait_for_hashes(1);

        // Same epoch: only the queued command moves the worker on.
        harness.assign(fixed_work("new", easy_target()));

        let before = harness.stats.hashes();
        harness.wait_for_hashes(before + 4096);
        let shares = harness.stop();
        assert!(!shares.is_empty());
        assert!(shares.iter().all(|s| s.job_id == "new"));
    }

    fn direct_context(range: NonceRange, level: Level) -> (HasherContext, tokio_mpsc::Receiver<Share>) {
        let (share_tx, share_rx) = tokio_mpsc::channel(4096);
        let ctx = HasherContext {
            name: "direct".into(),
            range,
            dispatcher: Arc::new(Sha256dDispatcher::with_level(level)),
            running: Arc::new(AtomicBool::new(true)),
            epoch: Arc::new(AtomicU64::new(0)),
            share_tx,
            stats: Arc::new(MinerStats::new()),
            roll_ntime: false,
        };
        (ctx, share_rx)
    }

    #[test]
    fn test_queued_command_interrupts_chunk_at_batch_boundary() {
        let (ctx, _share_rx) = direct_context(NonceRange::FULL, Level::Wide8);
        let mut search = start_search(&ctx, fixed_work("old", hard_target()), 0).unwrap();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let mut headers = [[0u8; HEADER_LEN]; MAX_BATCH];
        let mut digests = [[0u8; 32]; MAX_BATCH];

        let progress = search_chunk(&ctx, &mut search, &cmd_rx, &mut headers, &mut digests);
        assert!(matches!(progress, Progress::Continue));
        let after_chunk = search.next_nonce;
        assert_eq!(after_chunk, (BATCHES_PER_CHUNK * ctx.dispatcher.batch_size()) as u64);

        cmd_tx
            .send(MinerCommand::Assign {
                work: Box::new(fixed_work("new", easy_target())),
                epoch: 0,
            })
            .unwrap();
        let progress = search_chunk(&ctx, &mut search, &cmd_rx, &mut headers, &mut digests);
        assert!(matches!(progress, Progress::Command(MinerCommand::Assign { .. })));

        // Nothing was hashed after the command was queued.
        assert_eq!(search.next_nonce, after_chunk);
        assert_eq!(ctx.stats.hashes(), after_chunk);
    }

    #[test]
    fn test_full_range_search_advances() {
        let (ctx, _share_rx) = direct_context(NonceRange::FULL, Level::Wide16);
        let mut search = start_search(&ctx, fixed_work("1", hard_target()), 0).unwrap();
        let (_cmd_tx, cmd_rx) = mpsc::channel();
        let mut headers = [[0u8; HEADER_LEN]; MAX_BATCH];
        let mut digests = [[0u8; 32]; MAX_BATCH];

        let progress = search_chunk(&ctx, &mut search, &cmd_rx, &mut headers, &mut digests);
        assert!(matches!(progress, Progress::Continue));
        assert_eq!(search.next_nonce, (BATCHES_PER_CHUNK * 16) as u64);
    }

    #[test]
    fn test_batch_len_never_truncates_large_ranges() {
        assert_eq!(batch_len(NONCE_SPACE, 16), 16);
        assert_eq!(batch_len(u64::from(u32::MAX) + 5, 8), 8);
        assert_eq!(batch_len(u64::MAX, 1), 1);
        assert_eq!(batch_len(3, 16), 3);
        assert_eq!(batch_len(0, 16), 0);
    }

    #[test]
    fn test_invalid_work_idles_then_recovers() {
        let harness = Harness::start(NonceRange::new(0, 64), Level::Scalar, false);
        harness.assign(fixed_work("", Target::MAX));
        harness.assign(fixed_work("zero", Target::ZERO));
        harness.assign(fixed_work("ok", Target::from_be_bytes([0xff; 32])));
        harness.wait_for_hashes(64);

        let shares = harness.stop();
        assert!(!shares.is_empty());
        assert!(shares.iter().all(|s| s.job_id == "ok"));
    }

    #[test]
    fn test_running_flag_stops_hashing_thread() {
        let harness = Harness::start(NonceRange::FULL, Level::Scalar, false);
        harness.assign(fixed_work("1", hard_target()));
        harness.wait_for_hashes(1);

        harness.running.store(false, Ordering::Release);
        let Harness { handle, .. } = harness;
        handle.join().unwrap();
    }

    #[test]
    fn test_idle_command_stops_search() {
        let harness = Harness::start(NonceRange::FULL, Level::Scalar, false);
        harness.assign(fixed_work("1", hard_target()));
        harness.wait_for_hashes(1);
        harness.cmd_tx.send(MinerCommand::Idle).unwrap();

        std::thread::sleep(Duration::from_millis(100));
        let settled = harness.stats.hashes();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(harness.stats.hashes(), settled);
        harness.stop();
    }
}

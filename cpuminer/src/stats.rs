//! Share and hashrate counters.
//!
//! Plain atomics bumped as events happen; the daemon reads a snapshot
//! periodically for logging.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Submission latencies kept for the rolling average.
const LATENCY_WINDOW: usize = 64;

#[derive(Debug, Default)]
pub struct MinerStats {
    submitted: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    stale: AtomicU64,
    hashes: AtomicU64,
    latencies: Mutex<VecDeque<Duration>>,
}

/// Point-in-time copy of [`MinerStats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub stale: u64,
    pub hashes: u64,
    pub average_latency: Option<Duration>,
}

impl MinerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self, latency: Duration) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_rejected(&self, latency: Duration) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    /// A share found for a job the pool no longer wants; never submitted.
    pub fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_hashes(&self, count: u64) {
        self.hashes.fetch_add(count, Ordering::Relaxed);
    }

    /// Total hashes since start.
    pub fn hashes(&self) -> u64 {
        self.hashes.load(Ordering::Relaxed)
    }

    fn record_latency(&self, latency: Duration) {
        let mut window = self.latencies.lock().unwrap();
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency);
    }

    /// Mean of the last few submission round trips.
    pub fn average_latency(&self) -> Option<Duration> {
        let window = self.latencies.lock().unwrap();
        if window.is_empty() {
            return None;
        }
        let total: Duration = window.iter().sum();
        Some(total / window.len() as u32)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            hashes: self.hashes(),
            average_latency: self.average_latency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = MinerStats::new();
        stats.record_submitted();
        stats.record_submitted();
        stats.record_accepted(Duration::from_millis(10));
        stats.record_rejected(Duration::from_millis(30));
        stats.record_stale();
        stats.add_hashes(1000);
        stats.add_hashes(24);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                submitted: 2,
                accepted: 1,
                rejected: 1,
                stale: 1,
                hashes: 1024,
                average_latency: Some(Duration::from_millis(20)),
            }
        );
    }

    #[test]
    fn test_latency_window_rolls() {
        let stats = MinerStats::new();
        assert_eq!(stats.average_latency(), None);

        for _ in 0..LATENCY_WINDOW {
            stats.record_accepted(Duration::from_millis(100));
        }
        for _ in 0..LATENCY_WINDOW {
            stats.record_accepted(Duration::from_millis(10));
        }
        assert_eq!(stats.average_latency(), Some(Duration::from_millis(10)));
        assert_eq!(stats.snapshot().accepted, 2 * LATENCY_WINDOW as u64);
    }

    #[test]
    fn test_concurrent_hash_counting() {
        let stats = std::sync::Arc::new(MinerStats::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.add_hashes(16);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(stats.hashes(), 4 * 1000 * 16);
    }
}

//! Run statistics
//! Live counters for the concurrent sender/counter pair and the final result

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Outcome of one performance test run. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestResult {
    pub sent_packets: u64,
    pub received_packets: u64,
}

impl TestResult {
    pub fn new(sent_packets: u64, received_packets: u64) -> Self {
        Self {
            sent_packets,
            received_packets,
        }
    }

    /// Requests without a matching reply.
    ///
    /// Negative when stray or duplicated replies outnumber the requests of
    /// this run. That is a measurement anomaly to report, not an error.
    pub fn lost_packets(&self) -> i64 {
        self.sent_packets as i64 - self.received_packets as i64
    }

    /// Loss as a percentage of sent packets. NaN when nothing was sent.
    pub fn loss_percent(&self) -> f64 {
        (self.lost_packets() as f64 / self.sent_packets as f64) * 100.0
    }

    /// Whether this run saw genuine loss.
    pub fn has_loss(&self) -> bool {
        self.received_packets < self.sent_packets
    }
}

/// Thread-safe counters shared between the sender and the reply counter while
/// a run is in flight: atomics on the hot path, a lock only around the start
/// timestamp.
#[derive(Default)]
pub struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    started_at: RwLock<Option<Instant>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a run for elapsed-time reporting.
    pub fn start(&self) {
        *self.started_at.write() = Some(Instant::now());
    }

    #[inline]
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at
            .read()
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Freeze the current counts into a result.
    pub fn result(&self) -> TestResult {
        TestResult::new(self.sent(), self.received())
    }
}

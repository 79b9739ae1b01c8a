//! Progress tracking for uploads
//!
//! Parts of a chunked transfer report bytes independently and in any order.
//! [`ProgressAggregator`] folds those raw per-part figures into a single
//! monotonic [`ProgressSnapshot`], and [`ProgressReporter`] ships snapshots to
//! whoever renders them over an unbounded tokio channel.
//!
//! # Examples
//!
//! ```no_run
//! use clouddeck::protocol::s3::progress::{ProgressEvent, ProgressReporter};
//!
//! # async fn demo() {
//! let (reporter, mut receiver) = ProgressReporter::new();
//!
//! tokio::spawn(async move {
//!     while let Some(event) = receiver.recv().await {
//!         if let ProgressEvent::Progress(snapshot) = event {
//!             println!("{}% ({:.1}/{:.1} MB)", snapshot.percentage, snapshot.uploaded_mb, snapshot.total_mb);
//!         }
//!     }
//! });
//! # let _ = reporter;
//! # }
//! ```

use super::strategy::TransferMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Aggregated progress of one transfer request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Percentage complete (0-100)
    pub percentage: u8,
    /// Bytes transferred so far, summed over parts
    pub bytes_transferred: u64,
    /// Total bytes of the payload
    pub total_bytes: u64,
    /// `bytes_transferred` in MiB
    pub uploaded_mb: f64,
    /// `total_bytes` in MiB
    pub total_mb: f64,
    /// Part that produced this update, if chunked
    pub part: Option<u32>,
    /// Average transfer rate in bytes/sec
    pub rate_bps: f64,
    /// Estimated seconds remaining
    pub eta_secs: Option<u64>,
}

/// Progress event for uploads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// An attempt started
    TransferStarted {
        /// Key being transferred
        key: String,
        /// Total bytes to transfer
        total_bytes: u64,
        /// Chosen transfer mode
        mode: TransferMode,
        /// 1-based attempt number
        attempt: u32,
    },

    /// Aggregated progress update
    Progress(ProgressSnapshot),

    /// A part was accepted by the store
    PartCompleted {
        /// Part number
        part_number: u32,
        /// Bytes in this part
        part_bytes: u64,
    },

    /// A failed attempt will be retried after `delay`
    Retrying {
        /// Attempt that just failed
        attempt: u32,
        /// Backoff before the next attempt
        delay: Duration,
        /// Failure that triggered the retry
        error: String,
    },

    /// Transfer completed successfully
    TransferCompleted {
        /// Key that was written
        key: String,
        /// Total bytes transferred
        total_bytes: u64,
        /// Duration of transfer
        duration: Duration,
    },

    /// Transfer failed for good
    TransferFailed {
        /// Key that was not written
        key: String,
        /// Error message
        error: String,
    },
}

/// Progress reporter for sending progress events
#[derive(Clone)]
pub struct ProgressReporter {
    sender: Arc<UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    /// Report a progress event
    pub fn report(&self, event: ProgressEvent) {
        // Ignore send errors (receiver might be dropped)
        let _ = self.sender.send(event);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        let (sender, _) = unbounded_channel();
        Self {
            sender: Arc::new(sender),
        }
    }
}

/// Folds per-part byte counts into monotonic snapshots
#[derive(Debug)]
pub struct ProgressAggregator {
    total_bytes: u64,
    parts: BTreeMap<u32, u64>,
    started: Instant,
}

impl ProgressAggregator {
    /// Create an aggregator for a payload of `total_bytes`
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            parts: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    /// Record `transferred` bytes of a part of `part_len` bytes.
    ///
    /// Each part keeps the largest value seen, so a restarted part never
    /// pulls the sum back.
    pub fn record(&mut self, part_number: u32, part_len: u64, transferred: u64) -> ProgressSnapshot {
        let value = transferred.min(part_len);
        let entry = self.parts.entry(part_number).or_insert(0);
        *entry = (*entry).max(value);
        self.snapshot(Some(part_number))
    }

    /// Bytes transferred so far
    pub fn bytes_transferred(&self) -> u64 {
        self.parts.values().sum::<u64>().min(self.total_bytes)
    }

    /// Current snapshot without recording anything
    pub fn snapshot(&self, part: Option<u32>) -> ProgressSnapshot {
        let bytes = self.bytes_transferred();
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate_bps = if elapsed > 0.0 { bytes as f64 / elapsed } else { 0.0 };
        let eta_secs = if rate_bps > 0.0 {
            Some((self.total_bytes.saturating_sub(bytes) as f64 / rate_bps).ceil() as u64)
        } else {
            None
        };

        ProgressSnapshot {
            percentage: percentage(bytes, self.total_bytes),
            bytes_transferred: bytes,
            total_bytes: self.total_bytes,
            uploaded_mb: bytes as f64 / BYTES_PER_MB,
            total_mb: self.total_bytes as f64 / BYTES_PER_MB,
            part,
            rate_bps,
            eta_secs,
        }
    }
}

/// `round(100 * bytes / total)` clamped to 100; an empty payload is complete
pub fn percentage(bytes: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let bytes = bytes.min(total) as u128;
    let total = total as u128;
    ((bytes * 100 + total / 2) / total).min(100) as u8
}

/// Aggregator plus reporter, shared by every worker of one request
#[derive(Clone)]
pub struct ProgressTracker {
    aggregator: Arc<Mutex<ProgressAggregator>>,
    reporter: ProgressReporter,
}

impl ProgressTracker {
    /// Track a payload of `total_bytes`, reporting through `reporter`
    pub fn new(total_bytes: u64, reporter: ProgressReporter) -> Self {
        Self {
            aggregator: Arc::new(Mutex::new(ProgressAggregator::new(total_bytes))),
            reporter,
        }
    }

    /// Record raw part progress and emit one snapshot
    pub fn update(&self, part_number: u32, part_len: u64, transferred: u64) {
        // Sending under the lock keeps channel order equal to aggregation order
        let aggregator = &mut *self.aggregator.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = aggregator.record(part_number, part_len, transferred);
        self.reporter.report(ProgressEvent::Progress(snapshot));
    }

    /// Emit a non-progress event
    pub fn event(&self, event: ProgressEvent) {
        self.reporter.report(event);
    }

    /// Latest aggregated snapshot
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(0, 1000), 0);
        assert_eq!(percentage(4, 1000), 0);
        assert_eq!(percentage(5, 1000), 1);
        assert_eq!(percentage(994, 1000), 99);
        assert_eq!(percentage(995, 1000), 100);
        assert_eq!(percentage(2000, 1000), 100);
        assert_eq!(percentage(0, 0), 100);
    }

    #[tokio::test]
    async fn test_interleaved_parts_never_regress() {
        let part_len = 100;
        let mut aggregator = ProgressAggregator::new(3 * part_len);
        let events = [
            (2, 40),
            (1, 10),
            (3, 100),
            (2, 20), // stale report for part 2
            (1, 100),
            (2, 100),
        ];

        let mut last = 0;
        for (part, transferred) in events {
            let snapshot = aggregator.record(part, part_len, transferred);
            assert!(snapshot.percentage >= last);
            assert_eq!(snapshot.part, Some(part));
            last = snapshot.percentage;
        }
        assert_eq!(last, 100);
        assert_eq!(aggregator.bytes_transferred(), 300);
    }

    #[tokio::test]
    async fn test_part_values_are_clamped() {
        let mut aggregator = ProgressAggregator::new(150);
        let snapshot = aggregator.record(1, 100, 500);
        assert_eq!(snapshot.bytes_transferred, 100);
        assert_eq!(snapshot.percentage, 67);
    }

    #[tokio::test]
    async fn test_empty_payload_is_complete() {
        let mut aggregator = ProgressAggregator::new(0);
        let snapshot = aggregator.record(1, 0, 0);
        assert_eq!(snapshot.percentage, 100);
        assert_eq!(snapshot.eta_secs, None);
    }

    #[tokio::test]
    async fn test_tracker_reports_each_update() {
        let (reporter, mut receiver) = ProgressReporter::new();
        let tracker = ProgressTracker::new(200, reporter);

        tracker.update(1, 100, 50);
        tracker.update(2, 100, 100);
        tracker.event(ProgressEvent::PartCompleted {
            part_number: 2,
            part_bytes: 100,
        });

        match receiver.recv().await.unwrap() {
            ProgressEvent::Progress(snapshot) => assert_eq!(snapshot.percentage, 25),
            other => panic!("Expected Progress event, got {:?}", other),
        }
        match receiver.recv().await.unwrap() {
            ProgressEvent::Progress(snapshot) => {
                assert_eq!(snapshot.percentage, 75);
                assert_eq!(snapshot.bytes_transferred, 150);
            }
            other => panic!("Expected Progress event, got {:?}", other),
        }
        assert!(matches!(
            receiver.recv().await.unwrap(),
            ProgressEvent::PartCompleted { part_number: 2, .. }
        ));
        assert_eq!(tracker.snapshot().bytes_transferred, 150);
    }

    #[tokio::test]
    async fn test_reporter_without_receiver_does_not_fail() {
        let reporter = ProgressReporter::default();
        reporter.report(ProgressEvent::TransferFailed {
            key: "a".to_string(),
            error: "boom".to_string(),
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_and_eta() {
        let mut aggregator = ProgressAggregator::new(1000);
        tokio::time::advance(Duration::from_secs(2)).await;
        let snapshot = aggregator.record(1, 1000, 500);
        assert!((snapshot.rate_bps - 250.0).abs() < 1.0);
        assert_eq!(snapshot.eta_secs, Some(2));
    }
}

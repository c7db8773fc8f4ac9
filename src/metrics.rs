// Run metrics module
//
// Lock-free counters shared between the traversal thread and the update tasks

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Per-run metrics
///
/// Uses atomic operations so the directory walker and every update task can
/// record outcomes without locking. Summarized once the run completes.
#[derive(Debug)]
pub struct Metrics {
    /// Files rewritten with a fresh block
    pub files_updated: AtomicUsize,

    /// Subset of `files_updated` where an existing block was stripped first
    pub blocks_replaced: AtomicUsize,

    /// Files already carrying the current block
    pub files_unchanged: AtomicUsize,

    /// Files that vanished between discovery and update
    pub files_missing: AtomicUsize,

    /// Files whose update failed (I/O error, unterminated block, timeout)
    pub files_failed: AtomicUsize,

    /// Subset of `files_failed` that hit the per-task timeout
    pub files_timed_out: AtomicUsize,

    /// Files discovered but never updated because the run was cancelled
    pub files_cancelled: AtomicUsize,

    /// Regular files with no matching rule
    pub files_skipped: AtomicUsize,

    /// Total time spent inside update tasks in milliseconds
    pub total_update_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            files_updated: AtomicUsize::new(0),
            blocks_replaced: AtomicUsize::new(0),
            files_unchanged: AtomicUsize::new(0),
            files_missing: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            files_timed_out: AtomicUsize::new(0),
            files_cancelled: AtomicUsize::new(0),
            files_skipped: AtomicUsize::new(0),
            total_update_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_file_updated(&self, block_replaced: bool) {
        self.files_updated.fetch_add(1, Ordering::Relaxed);
        if block_replaced {
            self.blocks_replaced.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_file_unchanged(&self) {
        self.files_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_missing(&self) {
        self.files_missing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_timed_out(&self) {
        self.files_timed_out.fetch_add(1, Ordering::Relaxed);
        self.record_file_failed();
    }

    pub fn record_file_cancelled(&self) {
        self.files_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_time(&self, duration: Duration) {
        self.total_update_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Files that reached an update task and finished it, whatever the result
    pub fn files_processed(&self) -> usize {
        self.files_updated.load(Ordering::Relaxed)
            + self.files_unchanged.load(Ordering::Relaxed)
            + self.files_missing.load(Ordering::Relaxed)
            + self.files_failed.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average time per processed file in milliseconds
    pub fn avg_update_time_ms(&self) -> f64 {
        let total = self.total_update_time_ms.load(Ordering::Relaxed);
        let count = self.files_processed();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Run Summary ===");
        tracing::info!("Elapsed: {:.2}s", self.elapsed().as_secs_f64());
        tracing::info!(
            "Files: {} updated ({} blocks replaced), {} unchanged, {} missing, {} failed",
            self.files_updated.load(Ordering::Relaxed),
            self.blocks_replaced.load(Ordering::Relaxed),
            self.files_unchanged.load(Ordering::Relaxed),
            self.files_missing.load(Ordering::Relaxed),
            self.files_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Not processed: {} without a rule, {} cancelled, {} timed out",
            self.files_skipped.load(Ordering::Relaxed),
            self.files_cancelled.load(Ordering::Relaxed),
            self.files_timed_out.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Update time: {:.2}s total (avg: {:.2}ms per file)",
            self.total_update_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_update_time_ms()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

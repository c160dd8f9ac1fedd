//! Compression report for one processed document.

use std::fmt;
use std::time::Duration;

use crate::walker::RunStats;

/// Sizes, counters, and timing for one document run.
#[derive(Debug, Clone)]
pub struct Report {
    pub pages: usize,
    /// Strategy invocations that ran to completion, replaced or skipped.
    pub images_processed: usize,
    pub images_replaced: usize,
    pub images_skipped: usize,
    pub recoverable_faults: usize,
    pub fallback_pages: usize,
    pub cleanup_applied: bool,
    pub source_len: u64,
    pub dest_len: u64,
    pub elapsed: Duration,
}

impl Report {
    pub fn new(stats: RunStats, source_len: u64, dest_len: u64, elapsed: Duration) -> Self {
        Report {
            pages: stats.pages,
            images_processed: stats.images_processed,
            images_replaced: stats.images_replaced,
            images_skipped: stats.images_skipped,
            recoverable_faults: stats.recoverable_faults,
            fallback_pages: stats.fallback_pages,
            cleanup_applied: stats.cleanup_applied,
            source_len,
            dest_len,
            elapsed,
        }
    }

    /// How many times smaller the output is than the input.
    pub fn size_ratio(&self) -> f64 {
        if self.dest_len == 0 {
            return 0.0;
        }
        self.source_len as f64 / self.dest_len as f64
    }

    /// Output size as a percentage of the input size.
    pub fn percent_of_original(&self) -> f64 {
        if self.source_len == 0 {
            return 0.0;
        }
        self.dest_len as f64 / self.source_len as f64 * 100.0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages, {} images recompressed, {} skipped, {} faults, \
             {} fallback pages; {} -> {} bytes ({:.1}% of original, {:.2}x smaller) in {:.2?}",
            self.pages,
            self.images_replaced,
            self.images_skipped,
            self.recoverable_faults,
            self.fallback_pages,
            self.source_len,
            self.dest_len,
            self.percent_of_original(),
            self.size_ratio(),
            self.elapsed,
        )
    }
}

//! Counters for the bundling pipeline
//!
//! Shared between the resolver, the staging downloader and the archive
//! writer through an `Arc`; every counter is an atomic so concurrent
//! resolver workers can record without locking.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub lookups_attempted: AtomicU64,
    pub lookup_retries: AtomicU64,
    pub items_resolved: AtomicU64,
    pub items_failed: AtomicU64,
    pub files_staged: AtomicU64,
    pub bytes_staged: AtomicU64,
    pub entries_archived: AtomicU64,
}

impl PipelineMetrics {
    pub fn record_lookup(&self) {
        self.lookups_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.lookup_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolved(&self) {
        self.items_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.items_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_staged(&self, size: u64) {
        self.files_staged.fetch_add(1, Ordering::Relaxed);
        self.bytes_staged.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_archived(&self) {
        self.entries_archived.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            lookups_attempted: self.lookups_attempted.load(Ordering::Relaxed),
            lookup_retries: self.lookup_retries.load(Ordering::Relaxed),
            items_resolved: self.items_resolved.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            files_staged: self.files_staged.load(Ordering::Relaxed),
            bytes_staged: self.bytes_staged.load(Ordering::Relaxed),
            entries_archived: self.entries_archived.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of pipeline metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineMetricsSnapshot {
    pub lookups_attempted: u64,
    pub lookup_retries: u64,
    pub items_resolved: u64,
    pub items_failed: u64,
    pub files_staged: u64,
    pub bytes_staged: u64,
    pub entries_archived: u64,
}

impl PipelineMetricsSnapshot {
    /// Share of resolved items among all finished ones (0.0 to 1.0)
    pub fn resolve_success_rate(&self) -> f64 {
        let finished = self.items_resolved + self.items_failed;
        if finished == 0 {
            0.0
        } else {
            self.items_resolved as f64 / finished as f64
        }
    }

    pub fn average_staged_size(&self) -> f64 {
        if self.files_staged == 0 {
            0.0
        } else {
            self.bytes_staged as f64 / self.files_staged as f64
        }
    }
}

//! URL resolution with a bounded worker pool and exponential-backoff retry
//!
//! Workers are plain futures polled together on the caller's task, so the
//! only shared state is the work queue (locked just long enough to pop) and
//! the processed counter.

pub mod http;

pub use http::HttpUrlLookup;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BundleConfig;
use crate::core::progress::emit;
use crate::core::{
    BundleError, PipelineMetrics, ProgressCallback, ProgressEvent, ResolvableItem, ResolvedItem,
    Result, Stage,
};

/// Remote lookup from an item id to its download URL
///
/// Every error returned here is treated as transient and retried.
#[async_trait]
pub trait UrlLookup: Send + Sync {
    async fn lookup(&self, id: &str) -> Result<String>;
}

/// An item that could not be resolved, with the last error's message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveFailure {
    pub item: ResolvableItem,
    pub reason: String,
}

/// Outcome of a resolve run
///
/// `successes` keep the input order; `failures` are in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub successes: Vec<ResolvedItem>,
    pub failures: Vec<ResolveFailure>,
}

impl ResolveReport {
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

type Queue = Mutex<VecDeque<(usize, ResolvableItem)>>;

#[derive(Default)]
struct WorkerOutput {
    successes: Vec<(usize, ResolvedItem)>,
    failures: Vec<ResolveFailure>,
    cancelled: bool,
}

/// Bounded-concurrency resolver
pub struct RetryableResolver {
    config: BundleConfig,
    metrics: Arc<PipelineMetrics>,
}

impl RetryableResolver {
    pub fn new(config: BundleConfig) -> Self {
        Self::with_metrics(config, Arc::new(PipelineMetrics::default()))
    }

    pub fn with_metrics(config: BundleConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self { config, metrics }
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Resolve every item, tolerating per-item failure
    pub async fn resolve<L: UrlLookup + ?Sized>(
        &self,
        items: Vec<ResolvableItem>,
        concurrency: usize,
        lookup: &L,
        progress_callback: Option<ProgressCallback>,
    ) -> ResolveReport {
        let never = CancellationToken::new();
        let (report, _) = self.run(items, concurrency, lookup, &never, progress_callback).await;
        report
    }

    /// Like `resolve`, but stops pulling new work once `cancel` trips
    ///
    /// A cancelled run yields `BundleError::Cancelled` rather than a partial
    /// report, so no item is silently dropped.
    pub async fn resolve_cancellable<L: UrlLookup + ?Sized>(
        &self,
        items: Vec<ResolvableItem>,
        concurrency: usize,
        lookup: &L,
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<ResolveReport> {
        let (report, cancelled) = self.run(items, concurrency, lookup, cancel, progress_callback).await;
        if cancelled {
            info!("URL resolution cancelled after {} items", report.total());
            return Err(BundleError::cancelled(Stage::Resolve));
        }
        Ok(report)
    }

    async fn run<L: UrlLookup + ?Sized>(
        &self,
        items: Vec<ResolvableItem>,
        concurrency: usize,
        lookup: &L,
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> (ResolveReport, bool) {
        let total = items.len();
        if total == 0 {
            return (ResolveReport::default(), false);
        }

        let workers = concurrency.clamp(1, total);
        debug!("Resolving {} items with {} workers", total, workers);

        let queue: Queue = Mutex::new(items.into_iter().enumerate().collect());
        let processed = AtomicUsize::new(0);

        let outputs = join_all((0..workers).map(|_| {
            self.worker(&queue, &processed, total, lookup, cancel, progress_callback.as_ref())
        }))
        .await;

        let mut successes = Vec::new();
        let mut report = ResolveReport::default();
        let mut cancelled = false;
        for output in outputs {
            successes.extend(output.successes);
            report.failures.extend(output.failures);
            cancelled |= output.cancelled;
        }

        successes.sort_by_key(|(index, _)| *index);
        report.successes = successes.into_iter().map(|(_, item)| item).collect();

        info!(
            "Resolved {}/{} items ({} failed)",
            report.successes.len(),
            total,
            report.failures.len()
        );
        (report, cancelled)
    }

    async fn worker<L: UrlLookup + ?Sized>(
        &self,
        queue: &Queue,
        processed: &AtomicUsize,
        total: usize,
        lookup: &L,
        cancel: &CancellationToken,
        progress_callback: Option<&ProgressCallback>,
    ) -> WorkerOutput {
        let mut output = WorkerOutput::default();

        loop {
            if cancel.is_cancelled() {
                output.cancelled = true;
                break;
            }

            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some((index, item)) = next else {
                break;
            };

            match self.lookup_with_retry(lookup, &item.id, cancel, progress_callback).await {
                Ok(url) => {
                    self.metrics.record_resolved();
                    output.successes.push((index, ResolvedItem::new(item, url)));
                }
                Err(e) if e.is_cancelled() => {
                    output.cancelled = true;
                    break;
                }
                Err(e) => {
                    warn!(
                        category = e.category(),
                        severity = ?e.severity(),
                        "Giving up on {}: {}",
                        item.id,
                        e
                    );
                    self.metrics.record_failed();
                    let reason = match e {
                        BundleError::MaxRetriesExceeded { last_error, .. } => last_error,
                        other => other.to_string(),
                    };
                    output.failures.push(ResolveFailure { item, reason });
                }
            }

            let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
            emit(progress_callback, ProgressEvent::ResolveProgress { processed: done, total });
        }

        output
    }

    /// Look up one id, retrying with backoff until the attempt budget is spent
    async fn lookup_with_retry<L: UrlLookup + ?Sized>(
        &self,
        lookup: &L,
        id: &str,
        cancel: &CancellationToken,
        progress_callback: Option<&ProgressCallback>,
    ) -> Result<String> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.metrics.record_lookup();
            let error = match lookup.lookup(id).await {
                Ok(url) => return Ok(url),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return Err(BundleError::MaxRetriesExceeded {
                    id: id.to_string(),
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            let delay = self.config.retry_delay(attempt);
            debug!(
                recoverable = error.is_recoverable(),
                "Lookup {} failed on attempt {}: {}; retrying in {:?}",
                id,
                attempt,
                error,
                delay
            );

            attempt += 1;
            self.metrics.record_retry();
            emit(progress_callback, ProgressEvent::RetryAttempt {
                id: id.to_string(),
                attempt,
                max_attempts,
            });

            tokio::select! {
                _ = cancel.cancelled() => return Err(BundleError::cancelled(Stage::Resolve)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

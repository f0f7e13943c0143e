//! One-call pipeline: resolve ids, stage their bodies, write one archive
//!
//! The bundler owns cleanup. Scratch storage is removed whether the run
//! succeeds or not, and a partially written archive is deleted when the
//! archive write fails or is cancelled. A staging failure never touches the
//! output path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::{ArchiveWriter, ArchivedEntry};
use crate::config::BundleConfig;
use crate::core::{
    DownloadItem, PipelineMetrics, PipelineMetricsSnapshot, ProgressCallback, ResolvableItem,
    ResolvedItem, Result,
};
use crate::direct::{DirectDownloadBroker, DirectSession, HostStateChange};
use crate::resolver::{ResolveFailure, ResolveReport, RetryableResolver, UrlLookup};
use crate::selection::{count_valid_tasks, resolve_direct, Generation, Task};
use crate::staging::{
    stage_bytes, BodySource, HttpBodySource, ScratchStorage, StagedFile, StagingDownloader,
};

/// In-memory file added to the archive after the downloaded items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl InlineFile {
    pub fn new<S: Into<String>, D: Into<Vec<u8>>>(name: S, data: D) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// What a bundle run produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleReport {
    /// Items that resolved, in input order
    pub resolved: Vec<ResolvedItem>,
    pub failures: Vec<ResolveFailure>,
    pub entries: Vec<ArchivedEntry>,
    /// `None` when there was nothing to archive
    pub archive_path: Option<PathBuf>,
    pub archive_bytes: u64,
}

impl BundleReport {
    pub fn requested(&self) -> usize {
        self.resolved.len() + self.failures.len()
    }
}

/// Resolve, stage and archive with shared configuration and metrics
pub struct Bundler {
    config: BundleConfig,
    metrics: Arc<PipelineMetrics>,
    resolver: RetryableResolver,
    staging: StagingDownloader,
    archive: ArchiveWriter,
}

impl Bundler {
    pub fn new(config: BundleConfig, source: Arc<dyn BodySource>) -> Self {
        let config = config.clamped();
        let metrics = Arc::new(PipelineMetrics::default());
        Self {
            resolver: RetryableResolver::with_metrics(config.clone(), metrics.clone()),
            staging: StagingDownloader::with_metrics(config.clone(), source, metrics.clone()),
            archive: ArchiveWriter::with_metrics(config.clone(), metrics.clone()),
            config,
            metrics,
        }
    }

    /// Bundler that downloads bodies over HTTP
    pub fn http(config: BundleConfig) -> Result<Self> {
        config.validate()?;
        let source = HttpBodySource::from_config(&config)?;
        Ok(Self::new(config, Arc::new(source)))
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Resolve ids with the configured worker count and retry budget
    pub async fn resolve<L: UrlLookup + ?Sized>(
        &self,
        items: Vec<ResolvableItem>,
        lookup: &L,
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<ResolveReport> {
        self.resolver
            .resolve_cancellable(items, self.config.resolve_concurrency, lookup, cancel, progress_callback)
            .await
    }

    /// Resolve generations from the URLs their listing already carries
    ///
    /// Uses the configured quality and performs no lookups.
    pub fn resolve_listed(&self, generations: &[Generation]) -> ResolveReport {
        let report = resolve_direct(generations, self.config.quality);
        info!(
            "Took {} URLs from the listing ({} quality, {} without URL)",
            report.successes.len(),
            self.config.quality,
            report.failures.len()
        );
        report
    }

    /// Whether a listing is small enough for direct delivery
    ///
    /// Counts tasks with at least one downloadable generation against the
    /// configured `max_tasks`.
    pub fn direct_allowed(&self, tasks: &[Task]) -> bool {
        let valid = count_valid_tasks(tasks);
        if valid > self.config.max_tasks {
            info!(
                "{} downloadable tasks exceed the direct limit of {}",
                valid, self.config.max_tasks
            );
            return false;
        }
        true
    }

    /// Download items named by the configured file-name pattern
    pub fn download_items(&self, resolved: &[ResolvedItem]) -> Vec<DownloadItem> {
        resolved
            .iter()
            .map(|item| item.to_download_item(&self.config.file_name_pattern))
            .collect()
    }

    /// Resolve `items`, stage every resolved body plus `extras`, and write
    /// the archive to `output`
    ///
    /// Lookup failures are reported, not fatal. A staging or archive failure
    /// fails the whole run and leaves no partial archive behind.
    pub async fn bundle<L: UrlLookup + ?Sized>(
        &self,
        items: Vec<ResolvableItem>,
        lookup: &L,
        extras: &[InlineFile],
        output: &Path,
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<BundleReport> {
        let resolved = self.resolve(items, lookup, cancel, progress_callback.clone()).await?;
        let mut report = BundleReport {
            resolved: resolved.successes,
            failures: resolved.failures,
            ..BundleReport::default()
        };

        let downloads = self.download_items(&report.resolved);
        if downloads.is_empty() && extras.is_empty() {
            warn!("Nothing to archive: {} items failed to resolve", report.failures.len());
            return Ok(report);
        }

        let scratch = ScratchStorage::create()?;
        let staged = match self.stage(&scratch, &downloads, extras, cancel, progress_callback.clone()).await {
            Ok(staged) => staged,
            Err(e) => {
                discard_scratch(scratch);
                return Err(e);
            }
        };

        let written = self
            .archive
            .write_archive_to_path(&staged, output, cancel, progress_callback)
            .await;
        discard_scratch(scratch);

        match written {
            Ok(summary) => {
                info!(
                    "Bundled {} entries into {} ({} unresolved)",
                    summary.entries.len(),
                    output.display(),
                    report.failures.len()
                );
                report.entries = summary.entries;
                report.archive_bytes = summary.total_bytes;
                report.archive_path = Some(output.to_path_buf());
                Ok(report)
            }
            Err(e) => {
                discard_partial_archive(output).await;
                Err(e)
            }
        }
    }

    async fn stage(
        &self,
        scratch: &ScratchStorage,
        downloads: &[DownloadItem],
        extras: &[InlineFile],
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<Vec<StagedFile>> {
        let mut staged = self
            .staging
            .stage_into(scratch, downloads, cancel, progress_callback)
            .await?;

        for extra in extras {
            let file = stage_bytes(scratch, &extra.name, &extra.data, self.config.max_file_name_len).await?;
            self.metrics.record_staged(file.size as u64);
            staged.push(file);
        }
        Ok(staged)
    }

    /// Hand resolved items to the host download manager
    pub fn deliver_direct(
        &self,
        broker: &DirectDownloadBroker,
        resolved: &[ResolvedItem],
        host_events: mpsc::UnboundedReceiver<HostStateChange>,
    ) -> Result<DirectSession> {
        broker.start(
            self.download_items(resolved),
            self.config.direct_concurrency,
            self.config.save_as_prompt,
            host_events,
        )
    }
}

fn discard_scratch(scratch: ScratchStorage) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.remove() {
        warn!("Failed to remove scratch directory {}: {}", path.display(), e);
    }
}

async fn discard_partial_archive(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Removed partial archive {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial archive {}: {}", path.display(), e),
    }
}

//! Sequential download of resolved items into scratch storage
//!
//! One body is read at a time. Each chunk goes through the checksum engine
//! and straight to disk, so a staged file is never held in memory. Staging
//! is all-or-nothing: the first failed or cancelled item ends the run.

pub mod scratch;
pub mod source;

pub use scratch::{sanitize_file_name, ScratchStorage};
pub use source::{BodySource, ByteStream, HttpBodySource};

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::BundleConfig;
use crate::core::progress::emit;
use crate::core::{
    BundleError, Crc32, DownloadItem, FileOperation, PipelineMetrics, ProgressCallback,
    ProgressEvent, Result, Stage,
};
use scratch::{close_file, close_file_quietly};

/// A fully drained file in scratch storage
///
/// `size` and `crc32` describe exactly the bytes at `path`; the archive
/// writer trusts them and never recomputes the checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub size: u32,
    pub crc32: u32,
    pub path: PathBuf,
}

/// Staged files together with the scratch storage holding them
#[derive(Debug)]
pub struct StagingRun {
    pub staged_files: Vec<StagedFile>,
    pub scratch: ScratchStorage,
}

impl StagingRun {
    /// Add an in-memory file (a manifest, a script) as a regular staged file
    pub async fn stage_inline(&mut self, name: &str, data: &[u8], max_name_len: usize) -> Result<&StagedFile> {
        let staged = stage_bytes(&self.scratch, name, data, max_name_len).await?;
        self.staged_files.push(staged);
        Ok(&self.staged_files[self.staged_files.len() - 1])
    }

    /// Remove the scratch directory, keeping nothing
    pub fn cleanup(self) -> Result<()> {
        self.scratch.remove()
    }
}

/// Write `data` into scratch storage and describe it as a staged file
pub async fn stage_bytes(
    scratch: &ScratchStorage,
    name: &str,
    data: &[u8],
    max_name_len: usize,
) -> Result<StagedFile> {
    let size = checked_size(data.len() as u64)?;
    let (name, path) = scratch
        .unique_path(&sanitize_file_name(name, max_name_len), max_name_len)
        .await?;

    let mut file = scratch.create_file(&path).await?;
    if let Err(e) = file.write_all(data).await {
        close_file_quietly(file, &path).await;
        return Err(BundleError::fs(&path, FileOperation::Write, e));
    }
    close_file(file, &path).await?;

    Ok(StagedFile {
        name,
        size,
        crc32: crate::core::crc32(data),
        path,
    })
}

fn checked_size(size: u64) -> Result<u32> {
    u32::try_from(size).map_err(|_| BundleError::ArchiveLimit {
        what: "staged file size",
        value: size,
        limit: u32::MAX as u64,
    })
}

/// Streams resolved items into scratch storage one at a time
pub struct StagingDownloader {
    source: Arc<dyn BodySource>,
    config: BundleConfig,
    metrics: Arc<PipelineMetrics>,
}

impl StagingDownloader {
    pub fn new(config: BundleConfig, source: Arc<dyn BodySource>) -> Self {
        Self::with_metrics(config, source, Arc::new(PipelineMetrics::default()))
    }

    pub fn with_metrics(config: BundleConfig, source: Arc<dyn BodySource>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { source, config, metrics }
    }

    /// Staging downloader that fetches over HTTP
    pub fn http(config: BundleConfig) -> Result<Self> {
        let source = HttpBodySource::from_config(&config)?;
        Ok(Self::new(config, Arc::new(source)))
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Stage every item into a fresh scratch directory
    ///
    /// On error the scratch directory is dropped, which removes it.
    pub async fn stage_all(
        &self,
        items: &[DownloadItem],
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<StagingRun> {
        let scratch = ScratchStorage::create()?;
        let staged_files = self.stage_into(&scratch, items, cancel, progress_callback).await?;
        Ok(StagingRun { staged_files, scratch })
    }

    /// Stage every item into caller-owned scratch storage
    ///
    /// Files written before a failure stay in `scratch`; removing it is the
    /// caller's job.
    pub async fn stage_into(
        &self,
        scratch: &ScratchStorage,
        items: &[DownloadItem],
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<Vec<StagedFile>> {
        let span = info_span!("stage", files = items.len(), dir = %scratch.path().display());
        async move {
            let total = items.len();
            let mut staged_files = Vec::with_capacity(total);

            for (i, item) in items.iter().enumerate() {
                if cancel.is_cancelled() {
                    info!("Staging cancelled before item {}/{}", i + 1, total);
                    return Err(BundleError::cancelled(Stage::Staging));
                }

                let staged = self
                    .stage_one(scratch, item, i + 1, total, cancel, progress_callback.as_ref())
                    .await?;

                self.metrics.record_staged(staged.size as u64);
                emit(progress_callback.as_ref(), ProgressEvent::StageFileDone {
                    file: staged.name.clone(),
                    index: i + 1,
                    total,
                    size: staged.size,
                    crc32: staged.crc32,
                });
                staged_files.push(staged);
            }

            info!("Staged {} files", staged_files.len());
            Ok(staged_files)
        }
        .instrument(span)
        .await
    }

    async fn stage_one(
        &self,
        scratch: &ScratchStorage,
        item: &DownloadItem,
        index: usize,
        total: usize,
        cancel: &CancellationToken,
        progress_callback: Option<&ProgressCallback>,
    ) -> Result<StagedFile> {
        let safe_name = sanitize_file_name(&item.filename, self.config.max_file_name_len);
        let (name, path) = scratch
            .unique_path(&safe_name, self.config.max_file_name_len)
            .await?;
        debug!("Staging {} -> {}", item.url, path.display());

        let mut file = scratch.create_file(&path).await?;

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                close_file_quietly(file, &path).await;
                return Err(BundleError::cancelled(Stage::Staging));
            }
            opened = self.source.open(&item.url) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Fetch failed for {}: {}", name, e);
                close_file_quietly(file, &path).await;
                return Err(e);
            }
        };

        let mut crc = Crc32::new();
        let mut size: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Staging cancelled while downloading {}", name);
                    close_file_quietly(file, &path).await;
                    return Err(BundleError::cancelled(Stage::Staging));
                }
                next = stream.next() => next,
            };

            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!("Body stream failed for {}: {}", name, e);
                    close_file_quietly(file, &path).await;
                    return Err(e);
                }
            };

            crc.update(&chunk);
            size += chunk.len() as u64;
            if size > u32::MAX as u64 {
                close_file_quietly(file, &path).await;
                return Err(BundleError::ArchiveLimit {
                    what: "staged file size",
                    value: size,
                    limit: u32::MAX as u64,
                });
            }

            if let Err(e) = file.write_all(&chunk).await {
                close_file_quietly(file, &path).await;
                return Err(BundleError::fs(&path, FileOperation::Write, e));
            }

            emit(progress_callback, ProgressEvent::StageProgress {
                file: name.clone(),
                index,
                total,
                bytes: size,
            });
        }

        close_file(file, &path).await?;

        Ok(StagedFile {
            name,
            size: checked_size(size)?,
            crc32: crc.finalize(),
            path,
        })
    }
}

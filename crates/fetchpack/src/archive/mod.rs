//! Stored (uncompressed) ZIP writer over staged files
//!
//! Entries are written in the order given: local header, then the file's
//! bytes streamed from scratch storage, repeated per file, followed by the
//! central directory and the end record. Checksums and sizes come from the
//! [`StagedFile`] records and are not recomputed.

pub mod records;

pub use records::{
    CentralDirectoryHeader, DosDateTime, EndOfCentralDirectory, EntryMeta, LeWriter, LocalFileHeader,
};

use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::BundleConfig;
use crate::core::progress::emit;
use crate::core::{
    BundleError, FileOperation, PipelineMetrics, ProgressCallback, ProgressEvent, Result, Stage,
};
use crate::staging::StagedFile;

const MAX_ENTRIES: u64 = u16::MAX as u64;
const MAX_NAME_LEN: u64 = u16::MAX as u64;
const MAX_OFFSET: u64 = u32::MAX as u64;

/// Where one entry landed in the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedEntry {
    pub name: String,
    pub size: u32,
    pub crc32: u32,
    pub local_header_offset: u32,
}

/// Layout of a finished archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: Vec<ArchivedEntry>,
    pub cd_offset: u32,
    pub cd_size: u32,
    /// Total bytes written, end record included
    pub total_bytes: u64,
}

/// Writes staged files into a single stored ZIP archive
pub struct ArchiveWriter {
    config: BundleConfig,
    metrics: Arc<PipelineMetrics>,
}

impl ArchiveWriter {
    pub fn new(config: BundleConfig) -> Self {
        Self::with_metrics(config, Arc::new(PipelineMetrics::default()))
    }

    pub fn with_metrics(config: BundleConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self { config, metrics }
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Create `path` and write the archive into it
    ///
    /// A partially written file is left in place on error; the caller
    /// decides whether to delete it.
    pub async fn write_archive_to_path<P: AsRef<Path>>(
        &self,
        files: &[StagedFile],
        path: P,
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<ArchiveSummary> {
        let path = path.as_ref();
        let mut output = fs::File::create(path)
            .await
            .map_err(|e| BundleError::fs(path, FileOperation::Create, e))?;
        self.write_with_label(files, &mut output, path, cancel, progress_callback)
            .await
    }

    /// Write the archive to `output`, closing it afterwards
    ///
    /// The output is shut down on success, on failure and on cancellation.
    pub async fn write_archive<W>(
        &self,
        files: &[StagedFile],
        output: &mut W,
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<ArchiveSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.write_with_label(files, output, Path::new("<archive output>"), cancel, progress_callback)
            .await
    }

    async fn write_with_label<W>(
        &self,
        files: &[StagedFile],
        output: &mut W,
        label: &Path,
        cancel: &CancellationToken,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<ArchiveSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let span = info_span!("archive", entries = files.len(), output = %label.display());
        async move {
            let result = self
                .write_records(files, output, label, cancel, progress_callback.as_ref())
                .await;

            match result {
                Ok(summary) => {
                    output
                        .shutdown()
                        .await
                        .map_err(|e| BundleError::fs(label, FileOperation::Close, e))?;
                    info!(
                        "Wrote {} entries ({} bytes)",
                        summary.entries.len(),
                        summary.total_bytes
                    );
                    emit(progress_callback.as_ref(), ProgressEvent::ArchiveDone {
                        entries: summary.entries.len(),
                        bytes: summary.total_bytes,
                    });
                    Ok(summary)
                }
                Err(e) => {
                    if e.is_cancelled() {
                        info!("Archive write cancelled");
                    } else {
                        warn!(
                            category = e.category(),
                            severity = ?e.severity(),
                            "Archive write failed: {}",
                            e
                        );
                        debug!("{}", e.detailed_report());
                        emit(progress_callback.as_ref(), ProgressEvent::Error {
                            context: "archive".to_string(),
                            error: e.to_string(),
                        });
                    }
                    if let Err(close_err) = output.shutdown().await {
                        warn!("Failed to close {}: {}", label.display(), close_err);
                    }
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn write_records<W>(
        &self,
        files: &[StagedFile],
        output: &mut W,
        label: &Path,
        cancel: &CancellationToken,
        progress_callback: Option<&ProgressCallback>,
    ) -> Result<ArchiveSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        check_limits(files)?;

        let total = files.len();
        let modified = DosDateTime::now();
        let mut sink = CountingSink { output, label, written: 0 };
        let mut entries = Vec::with_capacity(total);
        let mut buffer = vec![0u8; self.config.read_buffer_size.max(1)];

        for (i, file) in files.iter().enumerate() {
            ensure_not_cancelled(cancel)?;

            let local_header_offset = offset_u32("local header offset", sink.written)?;
            let header = LocalFileHeader {
                meta: EntryMeta {
                    name: file.name.as_bytes(),
                    crc32: file.crc32,
                    size: file.size,
                    modified,
                },
            };
            sink.write(&header.to_bytes()).await?;

            self.copy_data(file, &mut sink, &mut buffer, cancel, progress_callback)
                .await?;

            self.metrics.record_archived();
            entries.push(ArchivedEntry {
                name: file.name.clone(),
                size: file.size,
                crc32: file.crc32,
                local_header_offset,
            });
            debug!("Archived {} at offset {}", file.name, local_header_offset);
            emit(progress_callback, ProgressEvent::ArchiveFileDone {
                file: file.name.clone(),
                done: i + 1,
                total,
            });
        }

        ensure_not_cancelled(cancel)?;
        let cd_offset = offset_u32("central directory offset", sink.written)?;
        for entry in &entries {
            ensure_not_cancelled(cancel)?;
            let record = CentralDirectoryHeader {
                meta: EntryMeta {
                    name: entry.name.as_bytes(),
                    crc32: entry.crc32,
                    size: entry.size,
                    modified,
                },
                local_header_offset: entry.local_header_offset,
            };
            sink.write(&record.to_bytes()).await?;
        }
        let cd_size = offset_u32("central directory size", sink.written - cd_offset as u64)?;

        ensure_not_cancelled(cancel)?;
        let end = EndOfCentralDirectory {
            entries: total as u16,
            cd_size,
            cd_offset,
        };
        sink.write(&end.to_bytes()).await?;
        sink.flush().await?;

        Ok(ArchiveSummary {
            entries,
            cd_offset,
            cd_size,
            total_bytes: sink.written,
        })
    }

    /// Stream one staged file into the archive, checking its recorded size
    async fn copy_data<W>(
        &self,
        file: &StagedFile,
        sink: &mut CountingSink<'_, W>,
        buffer: &mut [u8],
        cancel: &CancellationToken,
        progress_callback: Option<&ProgressCallback>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut input = fs::File::open(&file.path)
            .await
            .map_err(|e| BundleError::fs(&file.path, FileOperation::Read, e))?;

        let expected = file.size as u64;
        let mut copied: u64 = 0;
        loop {
            ensure_not_cancelled(cancel)?;

            let n = input
                .read(buffer)
                .await
                .map_err(|e| BundleError::fs(&file.path, FileOperation::Read, e))?;
            if n == 0 {
                break;
            }
            copied += n as u64;
            if copied > expected {
                return Err(size_mismatch(&file.path, expected, copied));
            }

            sink.write(&buffer[..n]).await?;
            emit(progress_callback, ProgressEvent::ArchiveProgress {
                file: file.name.clone(),
            });
        }

        if copied != expected {
            return Err(size_mismatch(&file.path, expected, copied));
        }
        Ok(())
    }
}

/// Output writer that tracks the current archive offset
struct CountingSink<'a, W> {
    output: &'a mut W,
    label: &'a Path,
    written: u64,
}

impl<W: AsyncWrite + Unpin + Send> CountingSink<'_, W> {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.output
            .write_all(bytes)
            .await
            .map_err(|e| BundleError::fs(self.label, FileOperation::Write, e))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.output
            .flush()
            .await
            .map_err(|e| BundleError::fs(self.label, FileOperation::Write, e))
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(BundleError::cancelled(Stage::Archive));
    }
    Ok(())
}

fn check_limits(files: &[StagedFile]) -> Result<()> {
    if files.len() as u64 > MAX_ENTRIES {
        return Err(BundleError::ArchiveLimit {
            what: "entry count",
            value: files.len() as u64,
            limit: MAX_ENTRIES,
        });
    }
    if let Some(file) = files.iter().find(|f| f.name.len() as u64 > MAX_NAME_LEN) {
        return Err(BundleError::ArchiveLimit {
            what: "entry name length",
            value: file.name.len() as u64,
            limit: MAX_NAME_LEN,
        });
    }
    Ok(())
}

fn offset_u32(what: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| BundleError::ArchiveLimit {
        what,
        value,
        limit: MAX_OFFSET,
    })
}

fn size_mismatch(path: &Path, expected: u64, actual: u64) -> BundleError {
    BundleError::SizeMismatch {
        file: path.to_path_buf(),
        expected,
        actual,
        diff: actual as i64 - expected as i64,
    }
}

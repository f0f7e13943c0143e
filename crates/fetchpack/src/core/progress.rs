//! Progress tracking and reporting for the resolve, staging and archive stages

use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress callback for pipeline operations
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Events emitted while resolving, staging and archiving
///
/// Events from different stages are not globally ordered; consumers should
/// tolerate a late `StageProgress` after an `ArchiveFileDone` and the like.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// One more item finished resolving (successfully or not)
    ResolveProgress {
        processed: usize,
        total: usize,
    },
    RetryAttempt {
        id: String,
        attempt: usize,
        max_attempts: usize,
    },
    /// A chunk of `file` was written to scratch storage
    StageProgress {
        file: String,
        index: usize,
        total: usize,
        bytes: u64,
    },
    StageFileDone {
        file: String,
        index: usize,
        total: usize,
        size: u32,
        crc32: u32,
    },
    /// A chunk of `file` was copied into the archive
    ArchiveProgress {
        file: String,
    },
    ArchiveFileDone {
        file: String,
        done: usize,
        total: usize,
    },
    ArchiveDone {
        entries: usize,
        bytes: u64,
    },
    Error {
        context: String,
        error: String,
    },
}

/// Trait for progress reporting with more granular control
pub trait ProgressReporter: Send + Sync {
    fn on_resolve_progress(&self, _processed: usize, _total: usize) {}
    fn on_retry_attempt(&self, _id: &str, _attempt: usize, _max_attempts: usize) {}
    fn on_stage_progress(&self, _file: &str, _index: usize, _total: usize, _bytes: u64) {}
    fn on_stage_file_done(&self, _file: &str, _index: usize, _total: usize, _size: u32, _crc32: u32) {}
    fn on_archive_progress(&self, _file: &str) {}
    fn on_archive_file_done(&self, _file: &str, _done: usize, _total: usize) {}
    fn on_archive_done(&self, _entries: usize, _bytes: u64) {}
    fn on_error(&self, _context: &str, _error: &str) {}
}

/// Extension trait to convert ProgressReporter to ProgressCallback
pub trait IntoProgressCallback {
    fn into_callback(self) -> ProgressCallback;
}

impl<T: ProgressReporter + 'static> IntoProgressCallback for T {
    fn into_callback(self) -> ProgressCallback {
        Arc::new(move |event| match event {
            ProgressEvent::ResolveProgress { processed, total } => {
                self.on_resolve_progress(processed, total);
            }
            ProgressEvent::RetryAttempt { id, attempt, max_attempts } => {
                self.on_retry_attempt(&id, attempt, max_attempts);
            }
            ProgressEvent::StageProgress { file, index, total, bytes } => {
                self.on_stage_progress(&file, index, total, bytes);
            }
            ProgressEvent::StageFileDone { file, index, total, size, crc32 } => {
                self.on_stage_file_done(&file, index, total, size, crc32);
            }
            ProgressEvent::ArchiveProgress { file } => {
                self.on_archive_progress(&file);
            }
            ProgressEvent::ArchiveFileDone { file, done, total } => {
                self.on_archive_file_done(&file, done, total);
            }
            ProgressEvent::ArchiveDone { entries, bytes } => {
                self.on_archive_done(entries, bytes);
            }
            ProgressEvent::Error { context, error } => {
                self.on_error(&context, &error);
            }
        })
    }
}

/// Invoke an optional callback
pub(crate) fn emit(callback: Option<&ProgressCallback>, event: ProgressEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}

/// Progress reporter that writes through `tracing`
///
/// Per-chunk events are logged at debug level only when `verbose` is set.
#[derive(Debug, Default)]
pub struct LogProgressReporter {
    pub verbose: bool,
}

impl LogProgressReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for LogProgressReporter {
    fn on_resolve_progress(&self, processed: usize, total: usize) {
        info!("Fetching URLs ({}/{})", processed, total);
    }

    fn on_retry_attempt(&self, id: &str, attempt: usize, max_attempts: usize) {
        warn!("Retry {}/{} for {}", attempt, max_attempts, id);
    }

    fn on_stage_progress(&self, file: &str, index: usize, total: usize, bytes: u64) {
        if self.verbose {
            debug!("Downloading {}/{}: {} ({} bytes)", index, total, file, bytes);
        }
    }

    fn on_stage_file_done(&self, file: &str, index: usize, total: usize, size: u32, crc32: u32) {
        info!("Downloaded {}/{}: {} ({} bytes, crc32 {:08x})", index, total, file, size, crc32);
    }

    fn on_archive_progress(&self, file: &str) {
        if self.verbose {
            debug!("Archiving {}", file);
        }
    }

    fn on_archive_file_done(&self, file: &str, done: usize, total: usize) {
        info!("Archived {}/{}: {}", done, total, file);
    }

    fn on_archive_done(&self, entries: usize, bytes: u64) {
        info!("Archive complete: {} entries, {} bytes", entries, bytes);
    }

    fn on_error(&self, context: &str, error: &str) {
        warn!("Error in {}: {}", context, error);
    }
}

/// Null progress reporter that does nothing
#[derive(Debug, Default)]
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {}

/// Composite progress reporter that forwards events to multiple reporters
pub struct CompositeProgressReporter {
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl std::fmt::Debug for CompositeProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeProgressReporter")
            .field("reporters_count", &self.reporters.len())
            .finish()
    }
}

impl CompositeProgressReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn add_reporter<R: ProgressReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for CompositeProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for CompositeProgressReporter {
    fn on_resolve_progress(&self, processed: usize, total: usize) {
        for reporter in &self.reporters {
            reporter.on_resolve_progress(processed, total);
        }
    }

    fn on_retry_attempt(&self, id: &str, attempt: usize, max_attempts: usize) {
        for reporter in &self.reporters {
            reporter.on_retry_attempt(id, attempt, max_attempts);
        }
    }

    fn on_stage_progress(&self, file: &str, index: usize, total: usize, bytes: u64) {
        for reporter in &self.reporters {
            reporter.on_stage_progress(file, index, total, bytes);
        }
    }

    fn on_stage_file_done(&self, file: &str, index: usize, total: usize, size: u32, crc32: u32) {
        for reporter in &self.reporters {
            reporter.on_stage_file_done(file, index, total, size, crc32);
        }
    }

    fn on_archive_progress(&self, file: &str) {
        for reporter in &self.reporters {
            reporter.on_archive_progress(file);
        }
    }

    fn on_archive_file_done(&self, file: &str, done: usize, total: usize) {
        for reporter in &self.reporters {
            reporter.on_archive_file_done(file, done, total);
        }
    }

    fn on_archive_done(&self, entries: usize, bytes: u64) {
        for reporter in &self.reporters {
            reporter.on_archive_done(entries, bytes);
        }
    }

    fn on_error(&self, context: &str, error: &str) {
        for reporter in &self.reporters {
            reporter.on_error(context, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ProgressReporter for Recorder {
        fn on_archive_file_done(&self, file: &str, done: usize, total: usize) {
            self.seen.lock().unwrap().push(format!("{file}:{done}/{total}"));
        }
    }

    #[test]
    fn test_composite_forwards_to_every_reporter() {
        let first = Recorder::default();
        let second = Recorder::default();
        let first_seen = first.seen.clone();
        let second_seen = second.seen.clone();

        let callback = CompositeProgressReporter::new()
            .add_reporter(first)
            .add_reporter(second)
            .add_reporter(NullProgressReporter)
            .into_callback();

        callback(ProgressEvent::ArchiveFileDone { file: "a.mp4".into(), done: 1, total: 2 });
        callback(ProgressEvent::ArchiveDone { entries: 2, bytes: 10 });

        assert_eq!(*first_seen.lock().unwrap(), vec!["a.mp4:1/2".to_string()]);
        assert_eq!(*second_seen.lock().unwrap(), vec!["a.mp4:1/2".to_string()]);
    }
}

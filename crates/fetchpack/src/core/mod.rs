//! Core types used throughout the bundling pipeline
//!
//! Everything the stages share lives here: errors, progress events,
//! metrics, the checksum engine and the item types that flow from
//! resolution into staging or direct delivery.

pub mod checksum;
pub mod error;
pub mod metrics;
pub mod progress;

pub use checksum::{crc32, Crc32};
pub use error::{BundleError, ErrorSeverity, FileOperation, Result, Stage};
pub use metrics::{PipelineMetrics, PipelineMetricsSnapshot};
pub use progress::{
    CompositeProgressReporter, IntoProgressCallback, LogProgressReporter, NullProgressReporter,
    ProgressCallback, ProgressEvent, ProgressReporter,
};

use serde::{Deserialize, Serialize};

/// Input unit for URL resolution; identity is `id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvableItem {
    pub id: String,
    pub task_id: String,
}

impl ResolvableItem {
    pub fn new<S: Into<String>, T: Into<String>>(id: S, task_id: T) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
        }
    }
}

/// A resolvable item together with its download URL
///
/// Only produced by a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedItem {
    pub id: String,
    pub task_id: String,
    pub url: String,
}

impl ResolvedItem {
    pub fn new(item: ResolvableItem, url: String) -> Self {
        Self {
            id: item.id,
            task_id: item.task_id,
            url,
        }
    }

    /// Build a download item, naming the file from `pattern`
    ///
    /// `{id}` and `{task_id}` are substituted.
    pub fn to_download_item(&self, pattern: &str) -> DownloadItem {
        let filename = pattern
            .replace("{id}", &self.id)
            .replace("{task_id}", &self.task_id);
        DownloadItem::new(self.url.clone(), filename)
    }
}

/// URL plus target file name, consumed by staging and direct delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub url: String,
    pub filename: String,
}

impl DownloadItem {
    pub fn new<S: Into<String>, F: Into<String>>(url: S, filename: F) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
        }
    }
}

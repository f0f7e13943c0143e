//! Fetchpack Library
//!
//! This library resolves batches of remotely hosted media items to their
//! download URLs, streams them into private scratch storage with a running
//! CRC-32, and packs them into a single uncompressed ZIP archive. As an
//! alternative to the archive, resolved items can be handed one by one to a
//! host download manager under a bounded queue.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fetchpack::{
//!     BundleConfig, Bundler, HttpUrlLookup, InlineFile, ProgressEvent, ResolvableItem,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> fetchpack::Result<()> {
//! // Load settings from FETCHPACK_* variables (and .env, if present)
//! let config = BundleConfig::from_env()?;
//!
//! let lookup = HttpUrlLookup::from_config(&config)?;
//! let bundler = Bundler::http(config)?;
//!
//! let items = vec![
//!     ResolvableItem::new("gen_01", "task_01"),
//!     ResolvableItem::new("gen_02", "task_01"),
//! ];
//! let manifest = InlineFile::new("manifest.txt", "gen_01\ngen_02\n");
//!
//! let progress_callback = Arc::new(|event: ProgressEvent| match event {
//!     ProgressEvent::ResolveProgress { processed, total } => {
//!         println!("Fetching URLs ({}/{})", processed, total);
//!     }
//!     ProgressEvent::StageFileDone { file, index, total, .. } => {
//!         println!("Downloaded {}/{}: {}", index, total, file);
//!     }
//!     ProgressEvent::ArchiveDone { entries, bytes } => {
//!         println!("Archive ready: {} entries, {} bytes", entries, bytes);
//!     }
//!     _ => {}
//! });
//!
//! let cancel = CancellationToken::new();
//! let report = bundler
//!     .bundle(items, &lookup, &[manifest], Path::new("videos.zip"), &cancel, Some(progress_callback))
//!     .await?;
//!
//! for failure in &report.failures {
//!     println!("Could not resolve {}: {}", failure.item.id, failure.reason);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Bounded resolution**: a fixed pool of lookup workers with exponential backoff and jitter
//! - **Order preservation**: resolved items come back in input order regardless of completion order
//! - **Streaming staging**: bodies go to disk chunk by chunk, with size and CRC-32 computed on the way
//! - **Stored ZIP output**: byte-exact local headers, central directory and end record, no ZIP64
//! - **Listing selection**: downloadable generations picked from a task listing, with skip reasons
//! - **Direct delivery**: a cancellable queue feeding the host download manager
//! - **Cooperative cancellation**: every stage honours a `CancellationToken` and closes its files

pub mod archive;
pub mod bundler;
pub mod config;
pub mod core;
pub mod direct;
pub mod resolver;
pub mod selection;
pub mod staging;

// Re-export commonly used types for convenience
pub use archive::{ArchiveSummary, ArchiveWriter, ArchivedEntry};
pub use bundler::{BundleReport, Bundler, InlineFile};
pub use config::BundleConfig;
pub use crate::core::{
    crc32, BundleError, Crc32, DownloadItem, PipelineMetrics, ProgressCallback, ProgressEvent,
    ResolvableItem, ResolvedItem, Result,
};
pub use direct::{
    DirectDownloadBroker, DirectEvent, DirectOutcome, DirectSession, DownloadHost, HostStateChange,
    ItemState,
};
pub use resolver::{HttpUrlLookup, ResolveFailure, ResolveReport, RetryableResolver, UrlLookup};
pub use selection::{
    count_valid_tasks, filter_generations, resolve_direct, Generation, GenerationSelection, Quality,
    SkippedItem, Task, TaskListing,
};
pub use staging::{BodySource, HttpBodySource, ScratchStorage, StagedFile, StagingDownloader, StagingRun};

//! Boundary to the host's native download manager

use async_trait::async_trait;

/// Identifier the host assigns to an accepted download
pub type HostId = u64;

/// What the host should do when the target file already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Pick a fresh name such as `clip (1).mp4`
    #[default]
    Uniquify,
    Overwrite,
    Prompt,
}

/// One download handed to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDownloadRequest {
    pub url: String,
    pub filename: String,
    pub conflict: ConflictPolicy,
    /// Show a save dialog instead of saving silently
    pub save_as: bool,
}

/// Host-side state of one download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    InProgress,
    Complete,
    Interrupted,
}

/// Notification from the host about one of its downloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStateChange {
    pub id: HostId,
    pub state: HostState,
    pub bytes_received: Option<u64>,
    pub total_bytes: Option<u64>,
}

impl HostStateChange {
    pub fn complete(id: HostId) -> Self {
        Self { id, state: HostState::Complete, bytes_received: None, total_bytes: None }
    }

    pub fn interrupted(id: HostId) -> Self {
        Self { id, state: HostState::Interrupted, bytes_received: None, total_bytes: None }
    }

    pub fn progress(id: HostId, bytes_received: u64, total_bytes: Option<u64>) -> Self {
        Self {
            id,
            state: HostState::InProgress,
            bytes_received: Some(bytes_received),
            total_bytes,
        }
    }

    /// True when the change carries a non-zero byte count
    pub fn has_byte_counts(&self) -> bool {
        self.bytes_received.is_some_and(|b| b > 0) || self.total_bytes.is_some_and(|b| b > 0)
    }
}

/// Native download manager
///
/// State changes for accepted downloads arrive separately, over the channel
/// handed to the broker when a batch starts.
#[async_trait]
pub trait DownloadHost: Send + Sync {
    /// Start a download; `None` means the host refused it
    async fn submit(&self, request: HostDownloadRequest) -> Option<HostId>;

    /// Ask the host to stop a download; a terminal state change follows
    async fn cancel(&self, id: HostId);
}

//! Error types for the bundling pipeline with context and recovery information

use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the resolve, staging, archive and direct-delivery stages
#[derive(Error, Debug)]
pub enum BundleError {
    /// HTTP transport errors with context
    #[error("HTTP request to '{url}' failed")]
    HttpRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("HTTP {status} from '{url}'")]
    HttpStatus {
        url: String,
        status: u16,
    },

    /// Lookup response was well-formed but carried no URL
    #[error("URL field missing in lookup response for '{id}'")]
    MissingUrl {
        id: String,
    },

    /// Lookup failure reported by a custom lookup implementation
    #[error("Lookup for '{id}' failed: {message}")]
    Lookup {
        id: String,
        message: String,
    },

    /// Response body could not be decoded
    #[error("Malformed response from '{url}': {message}")]
    MalformedResponse {
        url: String,
        message: String,
    },

    /// File system I/O errors with file context
    #[error("File operation failed on '{path}' while {operation}")]
    FileSystem {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    /// URL parsing errors with helpful suggestions
    #[error("Invalid URL '{url}': {suggestion}")]
    InvalidUrl {
        url: String,
        suggestion: String,
        #[source]
        source: url::ParseError,
    },

    /// Staged file on disk does not match its recorded size
    #[error("File size mismatch for '{file}': expected {expected} bytes, got {actual} bytes (difference: {diff} bytes)")]
    SizeMismatch {
        file: PathBuf,
        expected: u64,
        actual: u64,
        diff: i64,
    },

    /// A value does not fit the classic (non-ZIP64) archive fields
    #[error("Archive limit exceeded: {what} is {value}, maximum is {limit}")]
    ArchiveLimit {
        what: &'static str,
        value: u64,
        limit: u64,
    },

    /// Retry exhaustion with context
    #[error("Maximum attempts ({attempts}) exceeded for '{id}': {last_error}")]
    MaxRetriesExceeded {
        id: String,
        attempts: usize,
        last_error: String,
    },

    /// Configuration errors
    #[error("Invalid configuration: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
        suggestion: Option<String>,
    },

    /// Work stopped by the caller's cancellation token
    #[error("{stage} cancelled")]
    Cancelled {
        stage: Stage,
    },

    /// A direct-download batch is already running
    #[error("A direct download batch is already active")]
    BatchActive,

    /// A direct-download batch was started without items
    #[error("Direct download batch has no items")]
    EmptyBatch,

    /// A background task panicked or was aborted
    #[error("{task} task failed: {message}")]
    TaskFailed {
        task: &'static str,
        message: String,
    },
}

/// Pipeline stage, used to say where a cancellation landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Staging,
    Archive,
    Direct,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Resolve => write!(f, "URL resolution"),
            Stage::Staging => write!(f, "Staging"),
            Stage::Archive => write!(f, "Archive write"),
            Stage::Direct => write!(f, "Direct download"),
        }
    }
}

/// Types of file operations for error context
#[derive(Debug, Clone, PartialEq)]
pub enum FileOperation {
    Read,
    Write,
    Create,
    Delete,
    Metadata,
    CreateDir,
    Close,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Read => write!(f, "reading"),
            FileOperation::Write => write!(f, "writing"),
            FileOperation::Create => write!(f, "creating"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::Metadata => write!(f, "reading metadata"),
            FileOperation::CreateDir => write!(f, "creating directory"),
            FileOperation::Close => write!(f, "closing"),
        }
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;

impl BundleError {
    /// Build a file system error for the given path and operation
    pub fn fs<P: Into<PathBuf>>(path: P, operation: FileOperation, source: std::io::Error) -> Self {
        BundleError::FileSystem {
            path: path.into(),
            operation,
            source,
        }
    }

    pub fn cancelled(stage: Stage) -> Self {
        BundleError::Cancelled { stage }
    }

    /// True when the error is the cancellation outcome rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BundleError::Cancelled { .. })
    }

    /// Check if error is recoverable (worth another attempt)
    pub fn is_recoverable(&self) -> bool {
        match self {
            BundleError::HttpRequest { source, .. } => {
                source.status().map_or(true, |status| status.is_server_error() || status == 429)
            }
            BundleError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            BundleError::MissingUrl { .. } => true,
            BundleError::Lookup { .. } => true,
            BundleError::MalformedResponse { .. } => true,
            BundleError::FileSystem { source, .. } => {
                matches!(source.kind(),
                    std::io::ErrorKind::Interrupted |
                    std::io::ErrorKind::TimedOut |
                    std::io::ErrorKind::WouldBlock
                )
            }
            BundleError::InvalidUrl { .. } => false,
            BundleError::SizeMismatch { .. } => false,
            BundleError::ArchiveLimit { .. } => false,
            BundleError::MaxRetriesExceeded { .. } => false,
            BundleError::Configuration { .. } => false,
            BundleError::Cancelled { .. } => false,
            BundleError::BatchActive => false,
            BundleError::EmptyBatch => false,
            BundleError::TaskFailed { .. } => false,
        }
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            BundleError::HttpRequest { .. } => "http_request",
            BundleError::HttpStatus { .. } => "http_status",
            BundleError::MissingUrl { .. } => "missing_url",
            BundleError::Lookup { .. } => "lookup",
            BundleError::MalformedResponse { .. } => "malformed_response",
            BundleError::FileSystem { .. } => "file_system",
            BundleError::InvalidUrl { .. } => "invalid_url",
            BundleError::SizeMismatch { .. } => "size_mismatch",
            BundleError::ArchiveLimit { .. } => "archive_limit",
            BundleError::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            BundleError::Configuration { .. } => "configuration",
            BundleError::Cancelled { .. } => "cancelled",
            BundleError::BatchActive => "batch_active",
            BundleError::EmptyBatch => "empty_batch",
            BundleError::TaskFailed { .. } => "task_failed",
        }
    }

    /// Get severity level for error prioritization
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BundleError::HttpRequest { .. } => ErrorSeverity::Medium,
            BundleError::HttpStatus { .. } => ErrorSeverity::Medium,
            BundleError::MissingUrl { .. } => ErrorSeverity::Medium,
            BundleError::Lookup { .. } => ErrorSeverity::Medium,
            BundleError::MalformedResponse { .. } => ErrorSeverity::Medium,
            BundleError::FileSystem { .. } => ErrorSeverity::High,
            BundleError::InvalidUrl { .. } => ErrorSeverity::High,
            BundleError::SizeMismatch { .. } => ErrorSeverity::High,
            BundleError::ArchiveLimit { .. } => ErrorSeverity::High,
            BundleError::MaxRetriesExceeded { .. } => ErrorSeverity::High,
            BundleError::Configuration { .. } => ErrorSeverity::High,
            BundleError::Cancelled { .. } => ErrorSeverity::Low,
            BundleError::BatchActive => ErrorSeverity::Medium,
            BundleError::EmptyBatch => ErrorSeverity::Low,
            BundleError::TaskFailed { .. } => ErrorSeverity::Critical,
        }
    }

    /// Get user-friendly suggestion for resolving the error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            BundleError::InvalidUrl { suggestion, .. } => Some(suggestion),
            BundleError::Configuration { suggestion, .. } => suggestion.as_deref(),
            BundleError::ArchiveLimit { .. } => {
                Some("Split the batch into smaller archives")
            }
            BundleError::BatchActive => {
                Some("Wait for the running batch to finish or cancel it first")
            }
            BundleError::HttpStatus { status: 401 | 403, .. } => {
                Some("Check that a valid bearer token is configured")
            }
            _ => None,
        }
    }

    /// Create a detailed error report for debugging
    pub fn detailed_report(&self) -> String {
        let mut report = format!("Error: {}\n", self);
        report.push_str(&format!("Category: {}\n", self.category()));
        report.push_str(&format!("Severity: {:?}\n", self.severity()));
        report.push_str(&format!("Recoverable: {}\n", self.is_recoverable()));

        if let Some(suggestion) = self.suggestion() {
            report.push_str(&format!("Suggestion: {}\n", suggestion));
        }

        if let Some(source) = self.source() {
            report.push_str(&format!("Root cause: {}\n", source));
        }

        report
    }
}

/// Error severity levels for prioritization
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<reqwest::Error> for BundleError {
    fn from(error: reqwest::Error) -> Self {
        let url = error.url().map(|u| u.to_string()).unwrap_or_else(|| "<unknown>".to_string());
        if let Some(status) = error.status() {
            return BundleError::HttpStatus { url, status: status.as_u16() };
        }
        BundleError::HttpRequest { url, source: error }
    }
}

impl From<std::io::Error> for BundleError {
    fn from(error: std::io::Error) -> Self {
        BundleError::FileSystem {
            path: PathBuf::from("<unknown>"),
            operation: FileOperation::Read,
            source: error,
        }
    }
}

impl From<url::ParseError> for BundleError {
    fn from(error: url::ParseError) -> Self {
        let suggestion = match error {
            url::ParseError::EmptyHost => "URL must have a valid hostname",
            url::ParseError::InvalidPort => "Port number must be between 1 and 65535",
            url::ParseError::RelativeUrlWithoutBase => "URL must be absolute (include http:// or https://)",
            _ => "Check URL format and try again",
        }.to_string();

        BundleError::InvalidUrl {
            url: "<unparseable>".to_string(),
            suggestion,
            source: error,
        }
    }
}

impl From<serde_json::Error> for BundleError {
    fn from(error: serde_json::Error) -> Self {
        BundleError::MalformedResponse {
            url: "<unknown>".to_string(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_not_recoverable() {
        let err = BundleError::cancelled(Stage::Archive);
        assert!(err.is_cancelled());
        assert!(!err.is_recoverable());
        assert_eq!(err.category(), "cancelled");
        assert_eq!(err.to_string(), "Archive write cancelled");
    }

    #[test]
    fn test_http_status_recoverability() {
        let server = BundleError::HttpStatus { url: "u".into(), status: 503 };
        let throttled = BundleError::HttpStatus { url: "u".into(), status: 429 };
        let missing = BundleError::HttpStatus { url: "u".into(), status: 404 };
        assert!(server.is_recoverable());
        assert!(throttled.is_recoverable());
        assert!(!missing.is_recoverable());
    }

    #[test]
    fn test_detailed_report_includes_suggestion() {
        let err = BundleError::HttpStatus { url: "https://api/x".into(), status: 401 };
        let report = err.detailed_report();
        assert!(report.contains("Category: http_status"));
        assert!(report.contains("bearer token"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        let err: BundleError = io.into();
        assert_eq!(err.category(), "file_system");
        assert!(err.is_recoverable());
    }
}

//! Configuration types for the bundling pipeline

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::core::{BundleError, Result};
use crate::selection::Quality;

pub const MAX_RESOLVE_CONCURRENCY: usize = 20;
pub const MAX_DIRECT_CONCURRENCY: usize = 6;
pub const MAX_DIRECT_TASKS: usize = 100;

/// Configuration for resolve, staging, archive and direct-delivery operations
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Number of lookup workers (clamped to 1..=20)
    pub resolve_concurrency: usize,
    /// Lookup attempts per item, including the first one
    pub max_attempts: usize,
    /// Delay before the second attempt (doubles each retry)
    pub retry_base_delay: Duration,
    /// Upper bound of the random delay added to each backoff
    pub retry_jitter: Duration,
    /// Downloads kept in flight by the direct broker (clamped to 1..=6)
    pub direct_concurrency: usize,
    /// Ask the host to show a save dialog for each direct download
    pub save_as_prompt: bool,
    /// Direct delivery is only offered for listings with at most this many
    /// downloadable tasks (clamped to 1..=100)
    pub max_tasks: usize,
    /// Rendition taken when URLs come straight from a listing
    pub quality: Quality,
    pub timeout: Duration,
    pub user_agent: String,
    /// Base URL of the lookup API
    pub api_base: String,
    pub bearer_token: Option<String>,
    /// File name for a resolved item; `{id}` and `{task_id}` are substituted
    pub file_name_pattern: String,
    /// Scratch file names are truncated to this many characters
    pub max_file_name_len: usize,
    /// Chunk size used when copying staged files into the archive
    pub read_buffer_size: usize,
}

impl BundleConfig {
    /// Backoff before the next attempt, `attempt` being the 1-based attempt that just failed
    ///
    /// `2^(attempt-1) * retry_base_delay + random(0..retry_jitter)`
    pub fn retry_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let base = self.retry_base_delay.saturating_mul(2_u32.pow(exponent));
        let jitter_ms = self.retry_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..jitter_ms)
        };
        base + Duration::from_millis(jitter)
    }

    /// Copy of this configuration with every bounded field pulled into range
    pub fn clamped(&self) -> Self {
        let mut config = self.clone();
        config.resolve_concurrency = config.resolve_concurrency.clamp(1, MAX_RESOLVE_CONCURRENCY);
        config.direct_concurrency = config.direct_concurrency.clamp(1, MAX_DIRECT_CONCURRENCY);
        config.max_tasks = config.max_tasks.clamp(1, MAX_DIRECT_TASKS);
        config.max_attempts = config.max_attempts.max(1);
        config.max_file_name_len = config.max_file_name_len.max(1);
        config.read_buffer_size = config.read_buffer_size.max(1);
        config
    }

    /// Reject settings that cannot be clamped into something sensible
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(BundleError::Configuration {
                message: "max_attempts must be at least 1".to_string(),
                field: Some("max_attempts".to_string()),
                suggestion: Some("Use 5 to match the default retry budget".to_string()),
            });
        }
        if self.file_name_pattern.trim().is_empty() {
            return Err(BundleError::Configuration {
                message: "file_name_pattern is empty".to_string(),
                field: Some("file_name_pattern".to_string()),
                suggestion: Some("Use a pattern such as \"{id}.mp4\"".to_string()),
            });
        }
        url::Url::parse(&self.api_base).map_err(|e| BundleError::Configuration {
            message: format!("api_base '{}' is not a valid URL: {}", self.api_base, e),
            field: Some("api_base".to_string()),
            suggestion: Some("Include the scheme, e.g. https://".to_string()),
        })?;
        Ok(())
    }

    /// Load configuration from the process environment
    ///
    /// A `.env` file in the working directory is read first if present.
    /// Recognised variables: `FETCHPACK_API_BASE`, `FETCHPACK_BEARER_TOKEN`,
    /// `FETCHPACK_WORKERS`, `FETCHPACK_MAX_ATTEMPTS`, `FETCHPACK_DIRECT_PARALLEL`,
    /// `FETCHPACK_SAVE_AS`, `FETCHPACK_FILE_NAME_PATTERN`, `FETCHPACK_TIMEOUT_SECS`,
    /// `FETCHPACK_MAX_TASKS`, `FETCHPACK_QUALITY`.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }

        let mut config = Self::default();
        if let Ok(value) = std::env::var("FETCHPACK_API_BASE") {
            config.api_base = value;
        }
        if let Ok(value) = std::env::var("FETCHPACK_BEARER_TOKEN") {
            if !value.is_empty() {
                config.bearer_token = Some(value);
            }
        }
        if let Ok(value) = std::env::var("FETCHPACK_FILE_NAME_PATTERN") {
            config.file_name_pattern = value;
        }
        if let Some(value) = env_number("FETCHPACK_WORKERS")? {
            config.resolve_concurrency = value;
        }
        if let Some(value) = env_number("FETCHPACK_MAX_ATTEMPTS")? {
            config.max_attempts = value;
        }
        if let Some(value) = env_number("FETCHPACK_DIRECT_PARALLEL")? {
            config.direct_concurrency = value;
        }
        if let Some(value) = env_number("FETCHPACK_MAX_TASKS")? {
            config.max_tasks = value;
        }
        if let Ok(value) = std::env::var("FETCHPACK_QUALITY") {
            config.quality = value.parse()?;
        }
        if let Some(value) = env_number("FETCHPACK_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(value as u64);
        }
        if let Ok(value) = std::env::var("FETCHPACK_SAVE_AS") {
            config.save_as_prompt = matches!(value.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config.clamped())
    }
}

fn env_number(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse::<usize>().map(Some).map_err(|_| BundleError::Configuration {
            message: format!("{} must be a non-negative integer, got '{}'", name, value),
            field: Some(name.to_string()),
            suggestion: None,
        }),
        Err(_) => Ok(None),
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            resolve_concurrency: 8,
            max_attempts: 5,
            retry_base_delay: Duration::from_millis(1000),
            retry_jitter: Duration::from_millis(300),
            direct_concurrency: 3,
            save_as_prompt: false,
            max_tasks: 10,
            quality: Quality::Source,
            timeout: Duration::from_secs(30),
            user_agent: "fetchpack/0.1.0".to_string(),
            api_base: "https://sora.chatgpt.com/backend".to_string(),
            bearer_token: None,
            file_name_pattern: "{id}.mp4".to_string(),
            max_file_name_len: 180,
            read_buffer_size: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_without_jitter() {
        let config = BundleConfig {
            retry_jitter: Duration::ZERO,
            ..BundleConfig::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_millis(1000));
        assert_eq!(config.retry_delay(2), Duration::from_millis(2000));
        assert_eq!(config.retry_delay(3), Duration::from_millis(4000));
        assert_eq!(config.retry_delay(4), Duration::from_millis(8000));
    }

    #[test]
    fn test_retry_delay_jitter_is_bounded() {
        let config = BundleConfig::default();
        for _ in 0..100 {
            let delay = config.retry_delay(2);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay < Duration::from_millis(2300));
        }
    }

    #[test]
    fn test_clamped_pulls_values_into_range() {
        let config = BundleConfig {
            resolve_concurrency: 0,
            direct_concurrency: 50,
            ..BundleConfig::default()
        }
        .clamped();
        assert_eq!(config.resolve_concurrency, 1);
        assert_eq!(config.direct_concurrency, MAX_DIRECT_CONCURRENCY);

        let config = BundleConfig {
            resolve_concurrency: 99,
            ..BundleConfig::default()
        }
        .clamped();
        assert_eq!(config.resolve_concurrency, MAX_RESOLVE_CONCURRENCY);
    }

    #[test]
    fn test_max_tasks_clamped_to_one_through_hundred() {
        let clamp = |max_tasks| BundleConfig { max_tasks, ..BundleConfig::default() }.clamped().max_tasks;
        assert_eq!(BundleConfig::default().max_tasks, 10);
        assert_eq!(clamp(0), 1);
        assert_eq!(clamp(1), 1);
        assert_eq!(clamp(42), 42);
        assert_eq!(clamp(100), 100);
        assert_eq!(clamp(500), MAX_DIRECT_TASKS);
    }

    #[test]
    fn test_validate_rejects_bad_api_base() {
        let config = BundleConfig {
            api_base: "not a url".to_string(),
            ..BundleConfig::default()
        };
        match config.validate() {
            Err(BundleError::Configuration { field, .. }) => {
                assert_eq!(field.as_deref(), Some("api_base"));
            }
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_default_is_valid() {
        assert!(BundleConfig::default().validate().is_ok());
    }
}

//! Picking downloadable generations out of a task listing
//!
//! A listing holds tasks, each with zero or more generations. Only
//! generations of succeeded tasks that carry at least one encoded video are
//! worth resolving; everything else is reported as skipped with a reason.
//! When the listing already carries encoding paths, [`resolve_direct`] turns
//! generations into resolved items without any lookups.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{BundleError, ResolvableItem, ResolvedItem, Result};
use crate::resolver::{ResolveFailure, ResolveReport};

const SUCCEEDED: &str = "succeeded";

/// Encoding preferred when taking URLs straight from a listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Source,
    Md,
    Ld,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Source => write!(f, "source"),
            Quality::Md => write!(f, "md"),
            Quality::Ld => write!(f, "ld"),
        }
    }
}

impl FromStr for Quality {
    type Err = BundleError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "source" => Ok(Quality::Source),
            "md" => Ok(Quality::Md),
            "ld" => Ok(Quality::Ld),
            other => Err(BundleError::Configuration {
                message: format!("unknown quality '{}'", other),
                field: Some("quality".to_string()),
                suggestion: Some("Use one of: source, md, ld".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoding {
    #[serde(default)]
    pub path: Option<String>,
}

/// Encoded renditions of one generation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encodings {
    #[serde(default)]
    pub source: Option<Encoding>,
    #[serde(default)]
    pub md: Option<Encoding>,
    #[serde(default)]
    pub ld: Option<Encoding>,
}

impl Encodings {
    /// Path of the given rendition, if it has a non-empty one
    pub fn path(&self, quality: Quality) -> Option<&str> {
        let encoding = match quality {
            Quality::Source => &self.source,
            Quality::Md => &self.md,
            Quality::Ld => &self.ld,
        };
        encoding
            .as_ref()
            .and_then(|e| e.path.as_deref())
            .filter(|path| !path.is_empty())
    }

    /// First available path, trying source, md, then ld
    pub fn any_path(&self) -> Option<&str> {
        [Quality::Source, Quality::Md, Quality::Ld]
            .into_iter()
            .find_map(|quality| self.path(quality))
    }
}

/// One generated video inside a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub encodings: Option<Encodings>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Generation {
    /// True when at least one rendition has a path
    pub fn has_video(&self) -> bool {
        self.encodings.as_ref().and_then(Encodings::any_path).is_some()
    }

    /// URL to download without a lookup
    ///
    /// The preferred rendition wins, then the generation's own `url`, then
    /// any other rendition in source, md, ld order.
    pub fn direct_url(&self, quality: Quality) -> Option<&str> {
        let encodings = self.encodings.as_ref();
        encodings
            .and_then(|e| e.path(quality))
            .or_else(|| self.url.as_deref().filter(|url| !url.is_empty()))
            .or_else(|| encodings.and_then(Encodings::any_path))
    }

    pub fn to_resolvable(&self) -> ResolvableItem {
        ResolvableItem::new(self.id.clone(), self.task_id.clone().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationResult {
    #[serde(default)]
    pub is_output_rejection: bool,
}

/// One entry of a task listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub generations: Option<Vec<Generation>>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub moderation_result: Option<ModerationResult>,
}

impl Task {
    pub fn succeeded(&self) -> bool {
        self.status == SUCCEEDED
    }

    /// Succeeded with at least one generation that has a video
    pub fn has_video(&self) -> bool {
        self.succeeded()
            && self
                .generations
                .as_deref()
                .is_some_and(|gens| gens.iter().any(Generation::has_video))
    }
}

/// Listing response body: `{"task_responses": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListing {
    #[serde(default)]
    pub task_responses: Vec<Task>,
}

/// A task or generation left out, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub id: String,
    pub reason: String,
}

impl SkippedItem {
    fn new<S: Into<String>>(id: &str, reason: S) -> Self {
        Self {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result of [`filter_generations`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSelection {
    /// Generations with a video, in listing order, `task_id` filled in
    pub valid: Vec<Generation>,
    pub skipped: Vec<SkippedItem>,
}

impl GenerationSelection {
    /// Items for the retrying resolver
    pub fn resolvable_items(&self) -> Vec<ResolvableItem> {
        self.valid.iter().map(Generation::to_resolvable).collect()
    }
}

/// Split a listing into downloadable generations and skipped entries
///
/// - a task that did not succeed is skipped with its failure reason
/// - a succeeded task without generations is skipped as a content policy
///   rejection when moderation says so, otherwise as having none
/// - a generation without any encoded video is skipped on its own
pub fn filter_generations(tasks: &[Task]) -> GenerationSelection {
    let mut selection = GenerationSelection::default();

    for task in tasks {
        if !task.succeeded() {
            let reason = task
                .failure_reason
                .clone()
                .filter(|reason| !reason.is_empty())
                .unwrap_or_else(|| "Task not succeeded".to_string());
            selection.skipped.push(SkippedItem::new(&task.id, reason));
            continue;
        }

        let generations = match task.generations.as_deref() {
            Some(gens) if !gens.is_empty() => gens,
            _ => {
                let rejected = task
                    .moderation_result
                    .as_ref()
                    .is_some_and(|m| m.is_output_rejection);
                let reason = if rejected { "Content policy rejection" } else { "No generations" };
                selection.skipped.push(SkippedItem::new(&task.id, reason));
                continue;
            }
        };

        for generation in generations {
            if generation.has_video() {
                let mut generation = generation.clone();
                if generation.task_id.is_none() {
                    generation.task_id = Some(task.id.clone());
                }
                selection.valid.push(generation);
            } else {
                let id = if generation.id.is_empty() { &task.id } else { &generation.id };
                selection
                    .skipped
                    .push(SkippedItem::new(id, "Missing video file (encodings)"));
            }
        }
    }

    debug!(
        "Selected {} generations from {} tasks ({} skipped)",
        selection.valid.len(),
        tasks.len(),
        selection.skipped.len()
    );
    selection
}

/// Number of tasks with at least one downloadable generation
pub fn count_valid_tasks(tasks: &[Task]) -> usize {
    tasks.iter().filter(|task| task.has_video()).count()
}

/// Resolve generations from their listing URLs, without lookups
///
/// Successes keep the input order. A generation with no usable URL becomes a
/// failure.
pub fn resolve_direct(generations: &[Generation], quality: Quality) -> ResolveReport {
    let mut report = ResolveReport::default();
    for generation in generations {
        let item = generation.to_resolvable();
        match generation.direct_url(quality) {
            Some(url) => report.successes.push(ResolvedItem::new(item, url.to_string())),
            None => report.failures.push(ResolveFailure {
                item,
                reason: format!("No {} URL in listing", quality),
            }),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encodings(source: Option<&str>, md: Option<&str>, ld: Option<&str>) -> Option<Encodings> {
        let encoding = |path: Option<&str>| path.map(|p| Encoding { path: Some(p.to_string()) });
        Some(Encodings {
            source: encoding(source),
            md: encoding(md),
            ld: encoding(ld),
        })
    }

    #[test]
    fn test_quality_parses_case_insensitively() {
        assert_eq!("MD".parse::<Quality>().unwrap(), Quality::Md);
        assert_eq!(" source ".parse::<Quality>().unwrap(), Quality::Source);
        assert!(matches!(
            "hd".parse::<Quality>(),
            Err(BundleError::Configuration { .. })
        ));
    }

    #[test]
    fn test_direct_url_fallback_order() {
        let generation = Generation {
            id: "g".into(),
            encodings: encodings(Some("src"), None, Some("low")),
            url: Some("plain".into()),
            ..Generation::default()
        };
        assert_eq!(generation.direct_url(Quality::Source), Some("src"));
        assert_eq!(generation.direct_url(Quality::Ld), Some("low"));
        assert_eq!(generation.direct_url(Quality::Md), Some("plain"));

        let no_url = Generation { url: None, ..generation };
        assert_eq!(no_url.direct_url(Quality::Md), Some("src"));

        let md_only = Generation {
            id: "m".into(),
            encodings: encodings(None, Some("mid"), None),
            ..Generation::default()
        };
        assert_eq!(md_only.direct_url(Quality::Source), Some("mid"));
    }

    #[test]
    fn test_empty_paths_do_not_count_as_video() {
        let generation = Generation {
            id: "g".into(),
            encodings: encodings(Some(""), None, None),
            ..Generation::default()
        };
        assert!(!generation.has_video());
        assert_eq!(generation.direct_url(Quality::Source), None);
    }
}

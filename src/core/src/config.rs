use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// What to do when a single tag fails to copy during a repository sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Attempt every tag; failures are logged as warnings and the run only
    /// fails when no tag could be copied.
    #[default]
    BestEffort,
    /// The first failure stops workers from taking further tags and fails
    /// the run. Copies already in flight are allowed to finish.
    FailFast,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BestEffort => write!(f, "best-effort"),
            Self::FailFast => write!(f, "fail-fast"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "best-effort" => Ok(Self::BestEffort),
            "fail-fast" => Ok(Self::FailFast),
            _ => Err(format!(
                "unknown failure policy: '{}' (supported: best-effort, fail-fast)",
                s
            )),
        }
    }
}

/// Sync configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Verify TLS certificates of the source registry
    pub source_strict_tls: bool,

    /// Verify TLS certificates of the destination registry
    pub destination_strict_tls: bool,

    /// Only tags matching this regex are synced
    pub tags_include_pattern: Option<String>,

    /// Tags matching this regex are never synced
    pub tags_exclude_pattern: Option<String>,

    /// Tags that are never synced
    pub skip_tags_list: Vec<String>,

    /// Copy every selected tag even if it already exists at the destination
    pub overwrite: bool,

    /// Maximum number of tags copied in parallel
    pub max_concurrent_tags: usize,

    /// Per-tag failure handling
    pub failure_policy: FailurePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_strict_tls: false,
            destination_strict_tls: false,
            tags_include_pattern: None,
            tags_exclude_pattern: None,
            skip_tags_list: Vec::new(),
            overwrite: false,
            max_concurrent_tags: 1,
            failure_policy: FailurePolicy::BestEffort,
        }
    }
}

impl SyncConfig {
    /// Check every setting once, before any classification or network call.
    ///
    /// Both tag patterns are compiled here so that a bad regex never costs a
    /// registry round trip.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tags == 0 {
            return Err(SyncError::ConfigError(
                "max concurrent tags must be at least 1".to_string(),
            ));
        }
        if self.skip_tags_list.iter().any(|t| t.trim().is_empty()) {
            return Err(SyncError::ConfigError(
                "skip tags list contains an empty tag".to_string(),
            ));
        }
        crate::tags::TagFilter::from_config(self)?;
        Ok(())
    }
}

/// Split a comma separated tag list, ignoring whitespace and empty entries.
pub fn parse_tag_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

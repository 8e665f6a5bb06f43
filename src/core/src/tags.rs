//! Tag-set filtering and diffing.
//!
//! Turns the raw tag list of a source repository into the [`SyncPlan`]: the
//! tags that pass the configured filters and are not yet present at the
//! destination.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Sorted, duplicate-free set of tags belonging to one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet(Vec<String>);

impl TagSet {
    /// Build a tag set, sorting ascending and dropping duplicates.
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        tags.sort();
        tags.dedup();
        Self(tags)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0
            .binary_search_by(|t| t.as_str().cmp(tag))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Which tags of a repository are in scope.
///
/// Rules are applied in a fixed order: the explicit skip list, then the
/// include pattern, then the exclude pattern.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    skip: Vec<String>,
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl TagFilter {
    /// Compile the filter rules of a sync configuration.
    ///
    /// An invalid pattern is a configuration error.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            skip: config.skip_tags_list.clone(),
            include: compile_pattern(config.tags_include_pattern.as_deref())?,
            exclude: compile_pattern(config.tags_exclude_pattern.as_deref())?,
        })
    }

    /// Whether a single tag survives all three rules.
    pub fn accepts(&self, tag: &str) -> bool {
        if self.skip.iter().any(|s| s == tag) {
            return false;
        }
        if let Some(ref include) = self.include {
            if !include.is_match(tag) {
                return false;
            }
        }
        if let Some(ref exclude) = self.exclude {
            if exclude.is_match(tag) {
                return false;
            }
        }
        true
    }

    /// Filter a tag set, preserving its order.
    pub fn apply(&self, tags: &TagSet) -> Vec<String> {
        tags.iter()
            .filter(|tag| self.accepts(tag))
            .map(str::to_string)
            .collect()
    }
}

/// An empty pattern means "no rule", matching the CLI where the flag defaults
/// to an empty string.
fn compile_pattern(pattern: Option<&str>) -> Result<Option<Regex>> {
    match pattern {
        None => Ok(None),
        Some(p) if p.is_empty() => Ok(None),
        Some(p) => Regex::new(p)
            .map(Some)
            .map_err(|e| SyncError::ConfigError(format!("{:?} is not a valid regexp: {}", p, e))),
    }
}

/// Ordered list of tags to copy in one repository sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    tags: Vec<String>,
}

impl SyncPlan {
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn into_tags(self) -> Vec<String> {
        self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// An empty plan means source and destination are already in sync.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Compute the tags that have to be copied.
///
/// `destination` is `None` when the destination tags could not be listed,
/// typically because the repository does not exist yet. In that case, and
/// when `overwrite` is set, every filtered source tag is planned.
pub fn resolve_plan(
    source: &TagSet,
    destination: Option<&TagSet>,
    filter: &TagFilter,
    overwrite: bool,
) -> SyncPlan {
    let filtered = filter.apply(source);

    let tags = match destination {
        Some(existing) if !overwrite => filtered
            .into_iter()
            .filter(|tag| !existing.contains(tag))
            .collect(),
        _ => filtered,
    };

    SyncPlan { tags }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(skip: &[&str], include: Option<&str>, exclude: Option<&str>) -> TagFilter {
        let config = SyncConfig {
            skip_tags_list: skip.iter().map(|s| s.to_string()).collect(),
            tags_include_pattern: include.map(str::to_string),
            tags_exclude_pattern: exclude.map(str::to_string),
            ..Default::default()
        };
        TagFilter::from_config(&config).unwrap()
    }

    #[test]
    fn test_tag_set_sorts_and_dedups() {
        let set = TagSet::new(["1.1", "latest", "1.0", "1.1"]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["1.0", "1.1", "latest"]);
        assert_eq!(set.len(), 3);
        assert!(set.contains("latest"));
        assert!(!set.contains("2.0"));
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let f = TagFilter::default();
        let source = TagSet::new(["a", "b"]);
        assert_eq!(f.apply(&source), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_pattern_is_no_rule() {
        let f = filter(&[], Some(""), Some(""));
        assert!(f.accepts("anything"));
    }

    #[test]
    fn test_invalid_include_pattern() {
        let config = SyncConfig {
            tags_include_pattern: Some("([a-z".to_string()),
            ..Default::default()
        };
        let err = TagFilter::from_config(&config).unwrap_err();
        assert!(matches!(err, SyncError::ConfigError(_)));
        assert!(err.to_string().contains("([a-z"));
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let config = SyncConfig {
            tags_exclude_pattern: Some("*".to_string()),
            ..Default::default()
        };
        assert!(TagFilter::from_config(&config).is_err());
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let f = filter(&[], Some("^v"), Some("-rc$"));
        assert!(f.accepts("v1.0"));
        assert!(!f.accepts("v1.1-rc"));
        assert!(!f.accepts("latest"));
    }

    #[test]
    fn test_skip_list_wins_over_include() {
        let f = filter(&["v1.0"], Some("^v"), None);
        assert!(!f.accepts("v1.0"));
        assert!(f.accepts("v2.0"));
    }

    #[test]
    fn test_skip_list_is_exact_match() {
        let f = filter(&["1"], None, None);
        assert!(!f.accepts("1"));
        assert!(f.accepts("1.0"));
    }

    #[test]
    fn test_plan_filters_and_diffs() {
        let source = TagSet::new(["a", "b", "c", "latest"]);
        let destination = TagSet::new(["a"]);
        let f = filter(&["b"], Some("^[ac]$"), None);

        let plan = resolve_plan(&source, Some(&destination), &f, false);
        assert_eq!(plan.tags(), &["c".to_string()]);
    }

    #[test]
    fn test_plan_overwrite_skips_diff() {
        let source = TagSet::new(["a", "b"]);
        let destination = TagSet::new(["a", "b"]);
        let plan = resolve_plan(&source, Some(&destination), &TagFilter::default(), true);
        assert_eq!(plan.tags(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_plan_without_destination_listing() {
        let source = TagSet::new(["2.0", "1.0", "latest"]);
        let f = filter(&[], None, Some("latest"));

        for overwrite in [false, true] {
            let plan = resolve_plan(&source, None, &f, overwrite);
            assert_eq!(plan.tags(), &["1.0".to_string(), "2.0".to_string()]);
        }
    }

    #[test]
    fn test_plan_identical_sets_is_empty() {
        let source = TagSet::new(["1.0", "1.1", "1.2"]);
        let destination = source.clone();
        let plan = resolve_plan(&source, Some(&destination), &TagFilter::default(), false);
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
    }

    #[test]
    fn test_plan_is_subset_of_source_and_disjoint_from_destination() {
        let source = TagSet::new(["1", "2", "3", "4", "5", "6"]);
        let destination = TagSet::new(["2", "4", "7"]);
        let f = filter(&["6"], None, None);

        let plan = resolve_plan(&source, Some(&destination), &f, false);
        for tag in plan.tags() {
            assert!(source.contains(tag));
            assert!(!destination.contains(tag));
        }
        assert_eq!(plan.into_tags(), vec!["1", "3", "5"]);
    }

    #[test]
    fn test_overwrite_filtering_is_idempotent() {
        let source = TagSet::new(["v1", "v2-rc", "v3", "edge"]);
        let f = filter(&["edge"], Some("^v"), Some("rc"));

        let once = resolve_plan(&source, None, &f, true);
        let twice = resolve_plan(&TagSet::new(once.tags().to_vec()), None, &f, true);
        assert_eq!(once, twice);
    }
}

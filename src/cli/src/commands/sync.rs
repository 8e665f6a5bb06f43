//! The sync command.

use clap::Args;
use imagesync_core::{parse_tag_list, FailurePolicy, SyncConfig};
use imagesync_runtime::Syncer;

use crate::output;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Source: docker-archive or oci-archive file, OCI layout directory,
    /// image reference or repository
    #[arg(short = 's', long = "src")]
    pub src: String,

    /// Destination registry reference
    #[arg(short = 'd', long = "dest")]
    pub dest: String,

    /// Verify TLS certificates of the source registry
    #[arg(long = "src-strict-tls")]
    pub src_strict_tls: bool,

    /// Verify TLS certificates of the destination registry
    #[arg(long = "dest-strict-tls")]
    pub dest_strict_tls: bool,

    /// Only sync tags matching this regex
    #[arg(long = "tags-pattern")]
    pub tags_pattern: Option<String>,

    /// Never sync tags matching this regex
    #[arg(long = "skip-tags-pattern")]
    pub skip_tags_pattern: Option<String>,

    /// Comma separated tags to never sync
    #[arg(long = "skip-tags")]
    pub skip_tags: Option<String>,

    /// Copy tags even if they already exist at the destination
    #[arg(long)]
    pub overwrite: bool,

    /// Maximum number of tags copied in parallel
    #[arg(long = "max-concurrent-tags", default_value_t = 1)]
    pub max_concurrent_tags: usize,

    /// Stop at the first tag that fails instead of trying every tag
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn to_config(&self) -> SyncConfig {
        SyncConfig {
            source_strict_tls: self.src_strict_tls,
            destination_strict_tls: self.dest_strict_tls,
            tags_include_pattern: self.tags_pattern.clone(),
            tags_exclude_pattern: self.skip_tags_pattern.clone(),
            skip_tags_list: self
                .skip_tags
                .as_deref()
                .map(parse_tag_list)
                .unwrap_or_default(),
            overwrite: self.overwrite,
            max_concurrent_tags: self.max_concurrent_tags,
            failure_policy: if self.fail_fast {
                FailurePolicy::FailFast
            } else {
                FailurePolicy::BestEffort
            },
        }
    }
}

pub async fn execute(args: SyncArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.to_config();
    let syncer = Syncer::with_registry();

    let report = syncer.run_sync(&args.src, &args.dest, &config).await?;
    output::print_report(&report, args.json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Cli;
    use clap::Parser;

    fn parse(args: &[&str]) -> SyncArgs {
        let mut argv = vec!["imagesync"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().sync
    }

    #[test]
    fn test_defaults_map_to_default_config() {
        let args = parse(&["-s", "quay.io/org/app", "-d", "ghcr.io/org/app"]);
        assert_eq!(args.to_config(), SyncConfig::default());
    }

    #[test]
    fn test_all_flags() {
        let args = parse(&[
            "--src",
            "quay.io/org/app",
            "--dest",
            "ghcr.io/org/app",
            "--src-strict-tls",
            "--dest-strict-tls",
            "--tags-pattern",
            "^v[0-9]+",
            "--skip-tags-pattern",
            "rc$",
            "--skip-tags",
            "v1, v2,,",
            "--overwrite",
            "--max-concurrent-tags",
            "4",
            "--fail-fast",
        ]);
        let config = args.to_config();
        assert!(config.source_strict_tls);
        assert!(config.destination_strict_tls);
        assert_eq!(config.tags_include_pattern.as_deref(), Some("^v[0-9]+"));
        assert_eq!(config.tags_exclude_pattern.as_deref(), Some("rc$"));
        assert_eq!(config.skip_tags_list, vec!["v1", "v2"]);
        assert!(config.overwrite);
        assert_eq!(config.max_concurrent_tags, 4);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
    }

    #[test]
    fn test_negative_concurrency_rejected_by_parser() {
        let result = Cli::try_parse_from([
            "imagesync",
            "-s",
            "a",
            "-d",
            "b",
            "--max-concurrent-tags",
            "-1",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_execute_reports_unrecognized_archive() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "not an image").unwrap();

        let args = parse(&["-s", path.to_str().unwrap(), "-d", "ghcr.io/org/app"]);
        let err = execute(args).await.unwrap_err();
        assert!(err.to_string().contains("Unrecognized archive"));
    }

    #[tokio::test]
    async fn test_execute_rejects_zero_concurrency() {
        let args = parse(&[
            "-s",
            "quay.io/org/app",
            "-d",
            "ghcr.io/org/app",
            "--max-concurrent-tags",
            "0",
        ]);
        let err = execute(args).await.unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }
}

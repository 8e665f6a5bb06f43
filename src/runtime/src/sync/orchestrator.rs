//! Sync orchestration: classify, plan, copy, report.

use std::sync::Arc;

use imagesync_core::config::{FailurePolicy, SyncConfig};
use imagesync_core::error::{Result, SyncError};
use imagesync_core::queue::WorkQueue;
use imagesync_core::tags::{resolve_plan, TagFilter, TagSet};
use serde::Serialize;

use super::classify::{classify, Classification, SyncMode};
use super::endpoint::Endpoint;
use super::transport::{ImageTransport, RegistryTransport, TlsPolicy};
use crate::oci::ImageReference;

/// How a sync run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    /// Everything that was planned got copied
    Synced,
    /// The plan was empty; nothing was copied
    AlreadyInSync,
    /// Best-effort run where some tags failed
    PartiallySynced,
}

/// One tag that could not be copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagFailure {
    pub tag: String,
    pub error: String,
}

/// Result of a successful [`Syncer::run_sync`].
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub source: String,
    pub destination: String,
    pub status: SyncStatus,
    /// Destination tags written
    pub copied: Vec<String>,
    pub failed: Vec<TagFailure>,
    /// Tags never attempted
    pub skipped: Vec<String>,
}

impl SyncReport {
    fn new(classification: &Classification, status: SyncStatus) -> Self {
        Self {
            mode: classification.mode,
            source: classification.source.to_string(),
            destination: classification.destination.to_string(),
            status,
            copied: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// One line for humans.
    pub fn summary(&self) -> String {
        match self.status {
            SyncStatus::AlreadyInSync => format!(
                "{} is already in sync with {}",
                self.destination, self.source
            ),
            SyncStatus::Synced => format!(
                "Synced {} image(s) from {} to {}",
                self.copied.len(),
                self.source,
                self.destination
            ),
            SyncStatus::PartiallySynced => format!(
                "Synced {} image(s) from {} to {}, {} failed",
                self.copied.len(),
                self.source,
                self.destination,
                self.failed.len()
            ),
        }
    }
}

/// Runs syncs against an [`ImageTransport`].
pub struct Syncer {
    transport: Arc<dyn ImageTransport>,
}

impl Syncer {
    pub fn new(transport: Arc<dyn ImageTransport>) -> Self {
        Self { transport }
    }

    /// A syncer talking to real registries.
    pub fn with_registry() -> Self {
        Self::new(Arc::new(RegistryTransport::new()))
    }

    /// Sync `source` into `destination`.
    ///
    /// The configuration is validated before anything else happens. An
    /// empty plan is a success reported as [`SyncStatus::AlreadyInSync`].
    pub async fn run_sync(
        &self,
        source: &str,
        destination: &str,
        config: &SyncConfig,
    ) -> Result<SyncReport> {
        config.validate()?;
        let filter = TagFilter::from_config(config)?;
        let classification = classify(source, destination)?;
        let tls = TlsPolicy::from(config);

        tracing::info!(
            mode = %classification.mode,
            source = %classification.source,
            destination = %classification.destination,
            "Resolved sync"
        );

        match &classification.source {
            Endpoint::Repository(repository) => {
                self.sync_repository(&classification, repository, &filter, config, tls)
                    .await
            }
            _ => self.sync_one(&classification, tls).await,
        }
    }

    /// Archive, layout and single-image sync: exactly one copy.
    async fn sync_one(&self, classification: &Classification, tls: TlsPolicy) -> Result<SyncReport> {
        let destination = &classification.destination;
        self.transport
            .copy(&classification.source, destination, tls)
            .await
            .map_err(|e| SyncError::CopyError {
                src: classification.source.to_string(),
                dest: destination.to_string(),
                message: e.to_string(),
            })?;

        let mut report = SyncReport::new(classification, SyncStatus::Synced);
        report.copied.push(destination.tag_or_default().to_string());
        tracing::info!(source = %report.source, destination = %report.destination, "Sync finished");
        Ok(report)
    }

    async fn sync_repository(
        &self,
        classification: &Classification,
        source: &ImageReference,
        filter: &TagFilter,
        config: &SyncConfig,
        tls: TlsPolicy,
    ) -> Result<SyncReport> {
        let destination = &classification.destination;

        let source_tags = self
            .transport
            .list_tags(source, tls.source_strict)
            .await
            .map_err(|e| match e {
                SyncError::ListingError { .. } => e,
                other => SyncError::ListingError {
                    repository: source.repository_name(),
                    message: other.to_string(),
                },
            })?;
        let source_tags = TagSet::new(source_tags);

        let destination_tags = if config.overwrite {
            None
        } else {
            match self
                .transport
                .list_tags(destination, tls.destination_strict)
                .await
            {
                Ok(tags) => Some(TagSet::new(tags)),
                Err(e) => {
                    tracing::warn!(
                        destination = %destination,
                        error = %e,
                        "Cannot list destination tags, treating destination as empty"
                    );
                    None
                }
            }
        };

        let plan = resolve_plan(&source_tags, destination_tags.as_ref(), filter, config.overwrite);
        if plan.is_empty() {
            tracing::info!(
                source = %source,
                destination = %destination,
                "Images are already synced"
            );
            return Ok(SyncReport::new(classification, SyncStatus::AlreadyInSync));
        }

        tracing::info!(
            total = plan.len(),
            tags = ?plan.tags(),
            source = %source,
            destination = %destination,
            workers = config.max_concurrent_tags.min(plan.len()),
            "Starting to sync images"
        );

        let queue = WorkQueue::new(
            plan.into_tags(),
            config.max_concurrent_tags,
            config.failure_policy,
        )?;
        let transport = Arc::clone(&self.transport);
        let (src_repo, dst_repo) = (source.clone(), destination.clone());
        let mut outcome = queue
            .run(move |tag: String| {
                let transport = Arc::clone(&transport);
                let from = Endpoint::Image(src_repo.with_tag(tag.clone()));
                let to = dst_repo.with_tag(tag);
                async move {
                    transport
                        .copy(&from, &to, tls)
                        .await
                        .map_err(|e| SyncError::CopyError {
                            src: from.to_string(),
                            dest: to.to_string(),
                            message: e.to_string(),
                        })
                }
            })
            .await;

        let attempted = outcome.attempted();
        if config.failure_policy == FailurePolicy::FailFast && !outcome.failed.is_empty() {
            let (tag, err) = outcome.failed.remove(0);
            tracing::error!(
                tag = %tag,
                skipped = outcome.skipped.len(),
                "Sync stopped at first failure"
            );
            return Err(err);
        }
        let unfinished = outcome.failed.len() + outcome.skipped.len();
        if outcome.completed.is_empty() && unfinished > 0 {
            for (tag, err) in &outcome.failed {
                tracing::warn!(tag = %tag, error = %err, "Failed to sync tag");
            }
            return Err(SyncError::AllTagsFailed { failed: unfinished });
        }

        let status = if unfinished == 0 {
            SyncStatus::Synced
        } else {
            SyncStatus::PartiallySynced
        };
        let mut report = SyncReport::new(classification, status);
        report.copied = outcome.completed;
        report.copied.sort();
        report.failed = outcome
            .failed
            .into_iter()
            .map(|(tag, err)| {
                tracing::warn!(tag = %tag, error = %err, "Failed to sync tag");
                TagFailure {
                    tag,
                    error: err.to_string(),
                }
            })
            .collect();
        report.failed.sort_by(|a, b| a.tag.cmp(&b.tag));
        report.skipped = outcome.skipped;

        tracing::info!(
            attempted,
            copied = report.copied.len(),
            failed = report.failed.len(),
            "Sync finished"
        );
        Ok(report)
    }
}

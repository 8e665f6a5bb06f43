//! The image transport: listing tags and copying one image.
//!
//! [`ImageTransport`] is the seam between sync planning and the bytes on the
//! wire. [`RegistryTransport`] implements it on top of
//! [`RegistryClient`](crate::oci::RegistryClient); tests substitute an
//! in-memory double.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use imagesync_core::config::SyncConfig;
use imagesync_core::error::{Result, SyncError};
use oci_distribution::RegistryOperation;

use super::endpoint::Endpoint;
use crate::oci::{ImageReference, LocalImage, RawManifest, RegistryClient};

/// Certificate verification for each side of a copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsPolicy {
    pub source_strict: bool,
    pub destination_strict: bool,
}

impl From<&SyncConfig> for TlsPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            source_strict: config.source_strict_tls,
            destination_strict: config.destination_strict_tls,
        }
    }
}

/// Lists and copies images. Implementations must allow concurrent `copy`
/// calls for distinct destinations.
#[async_trait]
pub trait ImageTransport: Send + Sync {
    /// All tags of a repository.
    async fn list_tags(&self, repository: &ImageReference, strict_tls: bool) -> Result<Vec<String>>;

    /// Copy one image to `destination`, which carries a tag.
    async fn copy(&self, source: &Endpoint, destination: &ImageReference, tls: TlsPolicy) -> Result<()>;
}

/// Transport backed by real registries.
pub struct RegistryTransport {
    strict: RegistryClient,
    lenient: RegistryClient,
}

impl RegistryTransport {
    pub fn new() -> Self {
        Self {
            strict: RegistryClient::new(true),
            lenient: RegistryClient::new(false),
        }
    }

    fn client(&self, strict_tls: bool) -> &RegistryClient {
        if strict_tls {
            &self.strict
        } else {
            &self.lenient
        }
    }

    /// Registry to registry. Index children are copied before the index.
    async fn copy_remote(
        &self,
        source: &ImageReference,
        destination: &ImageReference,
        tls: TlsPolicy,
    ) -> Result<()> {
        let src = self.client(tls.source_strict);
        let dst = self.client(tls.destination_strict);
        src.authenticate(source, RegistryOperation::Pull).await?;
        dst.authenticate(destination, RegistryOperation::Push).await?;

        let top = src.pull_manifest(source).await?;

        // Parents are discovered before their children.
        let mut discovered: Vec<RawManifest> = Vec::new();
        let mut frontier = vec![top.clone()];
        while let Some(manifest) = frontier.pop() {
            if !manifest.is_index() {
                continue;
            }
            for digest in manifest.child_digests()? {
                let child = src.pull_manifest(&source.with_digest(digest)).await?;
                frontier.push(child.clone());
                discovered.push(child);
            }
        }
        discovered.reverse();

        for step in push_sequence(&top, &discovered)? {
            match step {
                PushStep::Blob(digest) => {
                    let data = src.pull_blob(source, &digest).await?;
                    dst.push_blob(destination, &data, &digest).await?;
                }
                PushStep::Child(child) => {
                    dst.push_manifest(&destination.with_digest(child.digest.clone()), child)
                        .await?;
                }
                PushStep::Top(manifest) => dst.push_manifest(destination, manifest).await?,
            }
        }

        tracing::info!(
            source = %source,
            destination = %destination,
            digest = %top.digest,
            manifests = discovered.len() + 1,
            "Copied image"
        );
        Ok(())
    }

    /// Local layout or archive to registry.
    async fn push_local(
        &self,
        image: LocalImage,
        origin: &Endpoint,
        destination: &ImageReference,
        tls: TlsPolicy,
    ) -> Result<()> {
        let dst = self.client(tls.destination_strict);
        dst.authenticate(destination, RegistryOperation::Push).await?;

        let paths: HashMap<&str, &Path> = image
            .blobs()
            .iter()
            .map(|blob| (blob.digest.as_str(), blob.path.as_path()))
            .collect();

        for step in push_sequence(image.manifest(), image.children())? {
            match step {
                PushStep::Blob(digest) => {
                    let path = paths.get(digest.as_str()).ok_or_else(|| {
                        SyncError::OciImageError(format!("Blob {} missing from {}", digest, origin))
                    })?;
                    let data = tokio::fs::read(path).await?;
                    dst.push_blob(destination, &data, &digest).await?;
                }
                PushStep::Child(child) => {
                    dst.push_manifest(&destination.with_digest(child.digest.clone()), child)
                        .await?;
                }
                PushStep::Top(manifest) => dst.push_manifest(destination, manifest).await?,
            }
        }

        tracing::info!(
            source = %origin,
            destination = %destination,
            digest = %image.manifest().digest,
            blobs = image.blobs().len(),
            "Pushed local image"
        );
        Ok(())
    }
}

/// One upload in a manifest tree push.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PushStep<'a> {
    /// Config or layer blob
    Blob(String),
    /// Manifest pushed by digest
    Child(&'a RawManifest),
    /// Manifest pushed under the destination tag
    Top(&'a RawManifest),
}

/// Upload order for `top` and the manifests below it.
///
/// `children` must list each manifest before any index that names it. Each
/// blob is uploaded once, ahead of the first manifest referencing it, and
/// `top` always comes last.
fn push_sequence<'a>(top: &'a RawManifest, children: &'a [RawManifest]) -> Result<Vec<PushStep<'a>>> {
    let mut seen = HashSet::new();
    let mut steps = Vec::new();
    let mut add_blobs = |manifest: &RawManifest, steps: &mut Vec<PushStep<'a>>| -> Result<()> {
        if manifest.is_index() {
            return Ok(());
        }
        for digest in manifest.blob_digests()? {
            if seen.insert(digest.clone()) {
                steps.push(PushStep::Blob(digest));
            }
        }
        Ok(())
    };

    for child in children {
        add_blobs(child, &mut steps)?;
        steps.push(PushStep::Child(child));
    }
    add_blobs(top, &mut steps)?;
    steps.push(PushStep::Top(top));
    Ok(steps)
}

impl Default for RegistryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageTransport for RegistryTransport {
    async fn list_tags(&self, repository: &ImageReference, strict_tls: bool) -> Result<Vec<String>> {
        self.client(strict_tls).list_tags(repository).await
    }

    async fn copy(&self, source: &Endpoint, destination: &ImageReference, tls: TlsPolicy) -> Result<()> {
        match source {
            Endpoint::Image(reference) => self.copy_remote(reference, destination, tls).await,
            Endpoint::Repository(reference) => Err(SyncError::ConfigError(format!(
                "{} names a whole repository; copy one tag at a time",
                reference
            ))),
            Endpoint::OciLayout { path } => {
                let path = path.clone();
                let image = tokio::task::spawn_blocking(move || LocalImage::from_layout(&path))
                    .await
                    .map_err(|e| SyncError::Other(format!("Layout reader panicked: {}", e)))??;
                self.push_local(image, source, destination, tls).await
            }
            Endpoint::Archive { path, format } => {
                let (path, format) = (path.clone(), *format);
                let image = tokio::task::spawn_blocking(move || format.open(&path))
                    .await
                    .map_err(|e| SyncError::Other(format!("Archive reader panicked: {}", e)))??;
                self.push_local(image, source, destination, tls).await
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory transport for orchestrator tests.

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    pub struct MockTransport {
        /// Tags per `registry/repository`; a missing entry fails the listing
        pub tags: Mutex<std::collections::HashMap<String, Vec<String>>>,
        /// Destination tags whose copy fails
        pub failing: HashSet<String>,
        /// Destination tags whose copy panics
        pub panicking: HashSet<String>,
        /// `(source, destination)` of every successful copy
        pub copies: Mutex<Vec<(String, String)>>,
        pub list_calls: AtomicUsize,
        pub copy_calls: AtomicUsize,
        pub active: AtomicUsize,
        pub peak_active: AtomicUsize,
        pub delay: Option<Duration>,
    }

    impl MockTransport {
        pub fn with_repo(self, repository: &str, tags: &[&str]) -> Self {
            self.tags.lock().unwrap().insert(
                repository.to_string(),
                tags.iter().map(|t| t.to_string()).collect(),
            );
            self
        }

        pub fn failing(mut self, tags: &[&str]) -> Self {
            self.failing = tags.iter().map(|t| t.to_string()).collect();
            self
        }

        pub fn panicking(mut self, tags: &[&str]) -> Self {
            self.panicking = tags.iter().map(|t| t.to_string()).collect();
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn copied(&self) -> Vec<(String, String)> {
            let mut copies = self.copies.lock().unwrap().clone();
            copies.sort();
            copies
        }
    }

    #[async_trait]
    impl ImageTransport for MockTransport {
        async fn list_tags(&self, repository: &ImageReference, _strict_tls: bool) -> Result<Vec<String>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.tags
                .lock()
                .unwrap()
                .get(&repository.repository_name())
                .cloned()
                .ok_or_else(|| SyncError::ListingError {
                    repository: repository.repository_name(),
                    message: "name unknown".to_string(),
                })
        }

        async fn copy(&self, source: &Endpoint, destination: &ImageReference, _tls: TlsPolicy) -> Result<()> {
            self.copy_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_active.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            let tag = destination.tag.as_deref().unwrap_or_default();
            if self.panicking.contains(tag) {
                panic!("transport crashed copying {tag}");
            }
            if self.failing.contains(tag) {
                return Err(SyncError::RegistryError {
                    registry: destination.registry.clone(),
                    message: "denied".to_string(),
                });
            }
            self.copies
                .lock()
                .unwrap()
                .push((source.to_string(), destination.to_string()));
            Ok(())
        }
    }
}

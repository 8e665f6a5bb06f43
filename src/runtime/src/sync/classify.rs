//! Source classification.
//!
//! Decides which kind of sync a `(source, destination)` pair asks for. Only
//! local `stat` calls and archive sniffing happen here; registries are never
//! contacted.

use std::path::Path;

use imagesync_core::error::{DetectionError, Result, SyncError};
use serde::Serialize;

use super::endpoint::Endpoint;
use crate::oci::reference::DEFAULT_TAG;
use crate::oci::{ArchiveFormat, ImageReference};

/// The four kinds of sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    ArchiveSync,
    OciLayoutSync,
    SingleImageSync,
    RepositorySync,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ArchiveSync => "archive",
            Self::OciLayoutSync => "oci-layout",
            Self::SingleImageSync => "single-image",
            Self::RepositorySync => "repository",
        };
        f.write_str(s)
    }
}

/// Outcome of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub mode: SyncMode,
    pub source: Endpoint,
    /// Destination with its tag filled in, except for repository sync where
    /// it names the bare repository.
    pub destination: ImageReference,
}

/// Classify a source and destination location.
///
/// First match wins:
/// 1. an existing directory is an OCI layout;
/// 2. an existing file is an OCI archive, else a docker archive, else an
///    error;
/// 3. a registry reference with a tag or digest is a single image;
/// 4. anything else is a whole repository, which requires an untagged
///    destination.
pub fn classify(source: &str, destination: &str) -> Result<Classification> {
    let dest = parse_destination(destination)?;

    let (mode, endpoint) = match std::fs::metadata(Path::new(source)) {
        Ok(meta) if meta.is_dir() => (
            SyncMode::OciLayoutSync,
            Endpoint::OciLayout {
                path: source.into(),
            },
        ),
        Ok(meta) if meta.is_file() => {
            let format = ArchiveFormat::detect(Path::new(source))?;
            (
                SyncMode::ArchiveSync,
                Endpoint::Archive {
                    path: source.into(),
                    format,
                },
            )
        }
        _ => {
            let reference = ImageReference::parse(source)?;
            if reference.has_explicit_tag() {
                (SyncMode::SingleImageSync, Endpoint::Image(reference))
            } else {
                (SyncMode::RepositorySync, Endpoint::Repository(reference))
            }
        }
    };

    let destination = match (&endpoint, dest.tag.is_some()) {
        (Endpoint::Repository(_), true) => {
            return Err(DetectionError::UnexpectedDestinationTag {
                destination: destination.to_string(),
            }
            .into())
        }
        (_, true) | (Endpoint::Repository(_), false) => dest,
        (Endpoint::Image(src), false) => dest.with_tag(src.tag_or_default()),
        (_, false) => dest.with_tag(DEFAULT_TAG),
    };

    tracing::debug!(mode = %mode, source = %endpoint, destination = %destination, "Classified sync");
    Ok(Classification {
        mode,
        source: endpoint,
        destination,
    })
}

/// Destinations are always registry references addressed by tag.
fn parse_destination(destination: &str) -> Result<ImageReference> {
    let reference = ImageReference::parse(destination)?;
    if reference.digest.is_some() {
        return Err(SyncError::ConfigError(format!(
            "destination '{}' must not carry a digest",
            destination
        )));
    }
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::archive::test_support::{tar_dir, write_docker_archive};
    use crate::oci::image::test_support::write_layout;
    use imagesync_core::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_directory_is_oci_layout() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().to_str().unwrap();

        let c = classify(src, "ghcr.io/org/app").unwrap();
        assert_eq!(c.mode, SyncMode::OciLayoutSync);
        assert_eq!(c.destination.tag.as_deref(), Some("latest"));
    }

    #[test]
    fn test_directory_that_looks_like_a_reference() {
        let base = TempDir::new().unwrap();
        let dir = base.path().join("app:1.0");
        std::fs::create_dir(&dir).unwrap();
        let src = dir.to_str().unwrap();

        let c = classify(src, "ghcr.io/org/app:v2").unwrap();
        assert_eq!(c.mode, SyncMode::OciLayoutSync);
        assert_eq!(c.destination.tag.as_deref(), Some("v2"));
    }

    #[test]
    fn test_oci_archive_file() {
        let layout = TempDir::new().unwrap();
        write_layout(layout.path(), &["a"]);
        let out = TempDir::new().unwrap();
        let archive = out.path().join("image.tar");
        tar_dir(layout.path(), &archive);

        let c = classify(archive.to_str().unwrap(), "ghcr.io/org/app").unwrap();
        assert_eq!(c.mode, SyncMode::ArchiveSync);
        assert!(matches!(
            c.source,
            Endpoint::Archive {
                format: ArchiveFormat::OciArchive,
                ..
            }
        ));
    }

    #[test]
    fn test_docker_archive_file() {
        let out = TempDir::new().unwrap();
        let archive = out.path().join("docker.tar");
        write_docker_archive(&archive);

        let c = classify(archive.to_str().unwrap(), "ghcr.io/org/app:1.0").unwrap();
        assert_eq!(c.mode, SyncMode::ArchiveSync);
        assert!(matches!(
            c.source,
            Endpoint::Archive {
                format: ArchiveFormat::DockerArchive,
                ..
            }
        ));
    }

    #[test]
    fn test_unrecognized_file() {
        let out = TempDir::new().unwrap();
        let path = out.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let err = classify(path.to_str().unwrap(), "ghcr.io/org/app").unwrap_err();
        assert!(matches!(
            err,
            SyncError::Detection(DetectionError::UnrecognizedArchive { .. })
        ));
    }

    #[test]
    fn test_tagged_reference_is_single_image() {
        let c = classify("docker.io/library/alpine:3.19", "ghcr.io/mirror/alpine").unwrap();
        assert_eq!(c.mode, SyncMode::SingleImageSync);
        // Untagged destination inherits the source tag.
        assert_eq!(c.destination.full_reference(), "ghcr.io/mirror/alpine:3.19");
    }

    #[test]
    fn test_digest_reference_is_single_image() {
        let c = classify("ghcr.io/org/app@sha256:abc123", "quay.io/org/app:pinned").unwrap();
        assert_eq!(c.mode, SyncMode::SingleImageSync);
        assert_eq!(c.destination.tag.as_deref(), Some("pinned"));
    }

    #[test]
    fn test_untagged_reference_is_repository() {
        let c = classify("docker.io/library/alpine", "ghcr.io/mirror/alpine").unwrap();
        assert_eq!(c.mode, SyncMode::RepositorySync);
        assert_eq!(c.destination.tag, None);
        assert!(matches!(c.source, Endpoint::Repository(_)));
    }

    #[test]
    fn test_repository_into_tagged_destination() {
        let err = classify("docker.io/library/alpine", "ghcr.io/mirror/alpine:latest").unwrap_err();
        assert!(matches!(
            err,
            SyncError::Detection(DetectionError::UnexpectedDestinationTag { ref destination })
                if destination == "ghcr.io/mirror/alpine:latest"
        ));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_malformed_source_reference() {
        let err = classify("Not A Reference!", "ghcr.io/org/app").unwrap_err();
        match err {
            SyncError::Detection(DetectionError::ReferenceParseFailure { reference, .. }) => {
                assert_eq!(reference, "Not A Reference!");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_destination_reference() {
        assert!(matches!(
            classify("alpine:3", "UPPER/case"),
            Err(SyncError::Detection(DetectionError::ReferenceParseFailure { .. }))
        ));
    }

    #[test]
    fn test_destination_digest_rejected() {
        let err = classify("alpine:3", "ghcr.io/org/app@sha256:abc123").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}

//! Resolved sync endpoints.

use std::fmt;
use std::path::PathBuf;

use crate::oci::{ArchiveFormat, ImageReference};

/// Where images are read from, once a location string has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// An `oci-archive` or `docker-archive` file
    Archive { path: PathBuf, format: ArchiveFormat },
    /// An OCI image layout directory
    OciLayout { path: PathBuf },
    /// One image in a registry, addressed by tag or digest
    Image(ImageReference),
    /// Every tag of a registry repository
    Repository(ImageReference),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archive { path, format } => write!(f, "{}:{}", format, path.display()),
            Self::OciLayout { path } => write!(f, "oci:{}", path.display()),
            Self::Image(reference) | Self::Repository(reference) => write!(f, "{}", reference),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let archive = Endpoint::Archive {
            path: PathBuf::from("/tmp/app.tar"),
            format: ArchiveFormat::DockerArchive,
        };
        assert_eq!(archive.to_string(), "docker-archive:/tmp/app.tar");

        let layout = Endpoint::OciLayout {
            path: PathBuf::from("/tmp/layout"),
        };
        assert_eq!(layout.to_string(), "oci:/tmp/layout");

        let repo = Endpoint::Repository(ImageReference::parse("quay.io/org/app").unwrap());
        assert_eq!(repo.to_string(), "quay.io/org/app");
    }
}

//! Image archives: `oci-archive` and `docker-archive`.
//!
//! An OCI archive is a tar of an OCI image layout. A docker archive is the
//! output of `docker save`: a tar with a `manifest.json` naming the config
//! and layer tarballs of each image. Both may additionally be gzip
//! compressed.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use imagesync_core::error::{DetectionError, Result, SyncError};
use serde::Deserialize;

use super::image::{sha256_file, LocalBlob, LocalImage, RawManifest, DOCKER_MANIFEST_MEDIA_TYPE};

const DOCKER_CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
const DOCKER_LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Archive flavours accepted as a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    OciArchive,
    DockerArchive,
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OciArchive => write!(f, "oci-archive"),
            Self::DockerArchive => write!(f, "docker-archive"),
        }
    }
}

impl ArchiveFormat {
    /// Detect the format of an archive file.
    ///
    /// OCI archives are tried first, then docker archives. Anything else,
    /// including files that are not tarballs at all, is an
    /// [`DetectionError::UnrecognizedArchive`].
    pub fn detect(path: &Path) -> Result<Self> {
        let unrecognized = || DetectionError::UnrecognizedArchive {
            path: path.to_path_buf(),
        };

        let entries = list_entries(path).map_err(|e| {
            tracing::debug!(path = %path.display(), error = %e, "Not a readable tar archive");
            unrecognized()
        })?;

        if entries.iter().any(|p| p == Path::new("oci-layout")) {
            return Ok(Self::OciArchive);
        }
        if entries.iter().any(|p| p == Path::new("manifest.json")) {
            return Ok(Self::DockerArchive);
        }
        Err(unrecognized().into())
    }

    /// Unpack the archive and read the image it contains.
    pub fn open(self, path: &Path) -> Result<LocalImage> {
        let workdir = tempfile::tempdir()?;
        unpack(path, workdir.path())?;

        let image = match self {
            Self::OciArchive => LocalImage::from_layout(workdir.path())?,
            Self::DockerArchive => read_docker_archive(workdir.path())?,
        };
        Ok(image.with_workdir(workdir))
    }
}

/// Open a file, transparently decompressing gzip.
fn open_maybe_gzip(path: &Path) -> std::io::Result<Box<dyn Read>> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;

    if n == 2 && magic == GZIP_MAGIC {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Paths of all entries, normalised (no leading `./`).
fn list_entries(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut archive = tar::Archive::new(open_maybe_gzip(path)?);
    let mut paths = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        paths.push(normalize_entry_path(&entry.path()?));
    }
    Ok(paths)
}

fn normalize_entry_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn unpack(path: &Path, target: &Path) -> Result<()> {
    let reader = open_maybe_gzip(path)?;
    let mut archive = tar::Archive::new(reader);
    archive.unpack(target).map_err(|e| {
        SyncError::OciImageError(format!("Failed to extract {}: {}", path.display(), e))
    })
}

/// One image entry of a docker archive `manifest.json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerArchiveEntry {
    config: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    layers: Vec<String>,
}

/// Convert an unpacked `docker save` tree into a pushable image.
///
/// Only the first image of the archive is used. Uncompressed layers are
/// gzip compressed; the config keeps its uncompressed `diff_ids`.
fn read_docker_archive(root: &Path) -> Result<LocalImage> {
    let manifest_path = root.join("manifest.json");
    let data = std::fs::read(&manifest_path).map_err(|e| {
        SyncError::OciImageError(format!("Failed to read manifest.json: {}", e))
    })?;
    let entries: Vec<DockerArchiveEntry> = serde_json::from_slice(&data)
        .map_err(|e| SyncError::OciImageError(format!("Failed to parse manifest.json: {}", e)))?;

    let entry = entries
        .first()
        .ok_or_else(|| SyncError::OciImageError("No images in manifest.json".to_string()))?;
    if entries.len() > 1 {
        tracing::warn!(
            images = entries.len(),
            "Docker archive holds several images, only the first is synced"
        );
    }
    tracing::debug!(repo_tags = ?entry.repo_tags, layers = entry.layers.len(), "Reading docker archive");

    let config_path = member_path(root, &entry.config)?;
    let config_digest = sha256_file(&config_path)?;
    let config_size = std::fs::metadata(&config_path)?.len();

    let mut blobs = vec![LocalBlob {
        digest: config_digest.clone(),
        path: config_path,
    }];
    let mut layers = Vec::with_capacity(entry.layers.len());

    for (i, layer) in entry.layers.iter().enumerate() {
        let layer_path = member_path(root, layer)?;
        let compressed = if is_gzip(&layer_path)? {
            layer_path
        } else {
            let target = root.join(format!("layer-{i}.tar.gz"));
            gzip_file(&layer_path, &target)?;
            target
        };
        let digest = sha256_file(&compressed)?;
        let size = std::fs::metadata(&compressed)?.len();

        layers.push(serde_json::json!({
            "mediaType": DOCKER_LAYER_GZIP_MEDIA_TYPE,
            "size": size,
            "digest": digest,
        }));
        if !blobs.iter().any(|b| b.digest == digest) {
            blobs.push(LocalBlob {
                digest,
                path: compressed,
            });
        }
    }

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": DOCKER_MANIFEST_MEDIA_TYPE,
        "config": {
            "mediaType": DOCKER_CONFIG_MEDIA_TYPE,
            "size": config_size,
            "digest": config_digest,
        },
        "layers": layers,
    });
    let manifest = RawManifest::new(DOCKER_MANIFEST_MEDIA_TYPE, serde_json::to_vec(&manifest)?);

    Ok(LocalImage::new(manifest, Vec::new(), blobs))
}

/// Resolve an archive member path, refusing anything outside `root`.
fn member_path(root: &Path, member: &str) -> Result<PathBuf> {
    let relative = Path::new(member);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(SyncError::OciImageError(format!(
            "Archive member escapes the archive: {}",
            member
        )));
    }
    let path = root.join(relative);
    if !path.is_file() {
        return Err(SyncError::OciImageError(format!(
            "Archive member not found: {}",
            member
        )));
    }
    Ok(path)
}

fn is_gzip(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    Ok(n == 2 && magic == GZIP_MAGIC)
}

fn gzip_file(source: &Path, target: &Path) -> Result<()> {
    let mut input = BufReader::new(File::open(source)?);
    let mut encoder = GzEncoder::new(File::create(target)?, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::oci::image::test_support::write_layout;
    use tempfile::TempDir;

    #[test]
    fn test_detect_oci_archive() {
        let layout = TempDir::new().unwrap();
        write_layout(layout.path(), &["a"]);
        let out = TempDir::new().unwrap();
        let archive = out.path().join("image.tar");
        tar_dir(layout.path(), &archive);

        assert_eq!(ArchiveFormat::detect(&archive).unwrap(), ArchiveFormat::OciArchive);
    }

    #[test]
    fn test_detect_gzipped_oci_archive() {
        let layout = TempDir::new().unwrap();
        write_layout(layout.path(), &["a"]);
        let out = TempDir::new().unwrap();
        let plain = out.path().join("image.tar");
        let gz = out.path().join("image.tar.gz");
        tar_dir(layout.path(), &plain);
        gzip_file(&plain, &gz).unwrap();

        assert_eq!(ArchiveFormat::detect(&gz).unwrap(), ArchiveFormat::OciArchive);
    }

    #[test]
    fn test_detect_docker_archive() {
        let out = TempDir::new().unwrap();
        let archive = out.path().join("docker.tar");
        write_docker_archive(&archive);

        assert_eq!(ArchiveFormat::detect(&archive).unwrap(), ArchiveFormat::DockerArchive);
    }

    #[test]
    fn test_detect_unrecognized_file() {
        let out = TempDir::new().unwrap();
        let path = out.path().join("notes.txt");
        std::fs::write(&path, "definitely not a tarball").unwrap();

        let err = ArchiveFormat::detect(&path).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Detection(DetectionError::UnrecognizedArchive { .. })
        ));
    }

    #[test]
    fn test_detect_tar_without_markers() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("readme"), "hi").unwrap();
        let out = TempDir::new().unwrap();
        let archive = out.path().join("other.tar");
        tar_dir(src.path(), &archive);

        assert!(ArchiveFormat::detect(&archive).is_err());
    }

    #[test]
    fn test_open_oci_archive() {
        let layout = TempDir::new().unwrap();
        write_layout(layout.path(), &["a"]);
        let out = TempDir::new().unwrap();
        let archive = out.path().join("image.tar");
        tar_dir(layout.path(), &archive);

        let image = ArchiveFormat::OciArchive.open(&archive).unwrap();
        assert_eq!(image.blobs().len(), 2);
        for blob in image.blobs() {
            assert!(blob.path.is_file());
        }
    }

    #[test]
    fn test_open_docker_archive_compresses_layers() {
        let out = TempDir::new().unwrap();
        let archive = out.path().join("docker.tar");
        write_docker_archive(&archive);

        let image = ArchiveFormat::DockerArchive.open(&archive).unwrap();
        assert_eq!(image.manifest().media_type, DOCKER_MANIFEST_MEDIA_TYPE);
        assert_eq!(image.blobs().len(), 2);

        let manifest: serde_json::Value = serde_json::from_slice(&image.manifest().data).unwrap();
        assert_eq!(manifest["layers"][0]["mediaType"], DOCKER_LAYER_GZIP_MEDIA_TYPE);
        let layer = &image.blobs()[1];
        assert!(is_gzip(&layer.path).unwrap());
        assert_eq!(manifest["layers"][0]["digest"], layer.digest.as_str());
        assert_eq!(sha256_file(&layer.path).unwrap(), layer.digest);
    }

    #[test]
    fn test_member_path_rejects_escape() {
        let root = TempDir::new().unwrap();
        assert!(member_path(root.path(), "../etc/passwd").is_err());
        assert!(member_path(root.path(), "/etc/passwd").is_err());
        assert!(member_path(root.path(), "missing.tar").is_err());
    }

    #[test]
    fn test_format_display() {
        assert_eq!(ArchiveFormat::OciArchive.to_string(), "oci-archive");
        assert_eq!(ArchiveFormat::DockerArchive.to_string(), "docker-archive");
    }
}

//! Local images read from an OCI image layout.
//!
//! A [`LocalImage`] is everything needed to push one tagged image: the
//! manifest bytes exactly as stored on disk (so digests survive the copy),
//! any child manifests when the top-level manifest is an index, and the blobs
//! they reference.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use imagesync_core::error::{Result, SyncError};
use oci_spec::image::{ImageIndex, ImageManifest};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Whether a manifest media type describes a list of manifests.
pub fn is_index_media_type(media_type: &str) -> bool {
    media_type == OCI_INDEX_MEDIA_TYPE || media_type == DOCKER_MANIFEST_LIST_MEDIA_TYPE
}

/// Work out the media type of raw manifest JSON.
///
/// Uses the embedded `mediaType` when present, otherwise an OCI index when
/// the document lists `manifests`, otherwise an OCI image manifest.
pub fn detect_manifest_media_type(data: &[u8]) -> Result<String> {
    let value: serde_json::Value = serde_json::from_slice(data)?;
    if let Some(media_type) = value.get("mediaType").and_then(|m| m.as_str()) {
        return Ok(media_type.to_string());
    }
    if value.get("manifests").is_some() {
        Ok(OCI_INDEX_MEDIA_TYPE.to_string())
    } else {
        Ok(OCI_MANIFEST_MEDIA_TYPE.to_string())
    }
}

/// `sha256:<hex>` of a byte slice.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// `sha256:<hex>` of a file, streamed.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Manifest bytes with their media type and digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    pub media_type: String,
    pub digest: String,
    pub data: Vec<u8>,
}

impl RawManifest {
    /// Wrap manifest bytes, computing the digest.
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            digest: sha256_digest(&data),
            data,
        }
    }

    pub fn is_index(&self) -> bool {
        is_index_media_type(&self.media_type)
    }

    /// Digests of the manifests listed by an index.
    pub fn child_digests(&self) -> Result<Vec<String>> {
        let index: ImageIndex = serde_json::from_slice(&self.data).map_err(|e| {
            SyncError::OciImageError(format!("Failed to parse index {}: {}", self.digest, e))
        })?;
        Ok(index
            .manifests()
            .iter()
            .map(|entry| entry.digest().to_string())
            .collect())
    }

    /// Config and layer digests of an image manifest.
    pub fn blob_digests(&self) -> Result<Vec<String>> {
        let image: ImageManifest = serde_json::from_slice(&self.data).map_err(|e| {
            SyncError::OciImageError(format!("Failed to parse manifest {}: {}", self.digest, e))
        })?;
        let mut digests = vec![image.config().digest().to_string()];
        digests.extend(image.layers().iter().map(|layer| layer.digest().to_string()));
        Ok(digests)
    }
}

/// A blob stored on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBlob {
    pub digest: String,
    pub path: PathBuf,
}

/// An image held on local disk, ready to be pushed.
#[derive(Debug)]
pub struct LocalImage {
    /// Manifest pushed under the destination tag
    manifest: RawManifest,

    /// Child manifests of an index, pushed by digest before `manifest`
    children: Vec<RawManifest>,

    /// Config and layer blobs, without duplicates
    blobs: Vec<LocalBlob>,

    /// Keeps an unpacked archive alive for as long as the image is used
    _workdir: Option<TempDir>,
}

impl LocalImage {
    pub fn new(manifest: RawManifest, children: Vec<RawManifest>, blobs: Vec<LocalBlob>) -> Self {
        Self {
            manifest,
            children,
            blobs,
            _workdir: None,
        }
    }

    /// Tie the lifetime of a temporary directory to this image.
    pub fn with_workdir(mut self, workdir: TempDir) -> Self {
        self._workdir = Some(workdir);
        self
    }

    pub fn manifest(&self) -> &RawManifest {
        &self.manifest
    }

    pub fn children(&self) -> &[RawManifest] {
        &self.children
    }

    pub fn blobs(&self) -> &[LocalBlob] {
        &self.blobs
    }

    /// Read an OCI image layout directory.
    ///
    /// The directory must contain a valid OCI image layout:
    /// - oci-layout file
    /// - index.json
    /// - blobs/<algorithm>/ directory with manifests, configs and layers
    ///
    /// A layout whose `index.json` lists a single manifest is pushed as that
    /// manifest. A layout listing several manifests is pushed as an image
    /// index built from `index.json`.
    pub fn from_layout(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref();
        validate_oci_layout(root_dir)?;

        let index_path = root_dir.join("index.json");
        let index_data = std::fs::read(&index_path).map_err(|e| {
            SyncError::OciImageError(format!(
                "Failed to read index.json at {}: {}",
                index_path.display(),
                e
            ))
        })?;
        let index: ImageIndex = serde_json::from_slice(&index_data)
            .map_err(|e| SyncError::OciImageError(format!("Failed to parse index.json: {}", e)))?;

        let mut walker = LayoutWalker::new(root_dir);
        let manifest = match index.manifests().as_slice() {
            [] => {
                return Err(SyncError::OciImageError(format!(
                    "No manifests in {}",
                    index_path.display()
                )))
            }
            [single] => walker.load(&single.media_type().to_string(), single.digest())?,
            entries => {
                for entry in entries {
                    let child = walker.load(&entry.media_type().to_string(), entry.digest())?;
                    walker.children.push(child);
                }
                RawManifest::new(OCI_INDEX_MEDIA_TYPE, index_data)
            }
        };

        tracing::debug!(
            layout = %root_dir.display(),
            digest = %manifest.digest,
            children = walker.children.len(),
            blobs = walker.blobs.len(),
            "Read OCI layout"
        );

        Ok(Self::new(manifest, walker.children, walker.blobs))
    }
}

/// Collects manifests and blobs while walking a layout.
struct LayoutWalker<'a> {
    root_dir: &'a Path,
    children: Vec<RawManifest>,
    blobs: Vec<LocalBlob>,
    seen: HashSet<String>,
}

impl<'a> LayoutWalker<'a> {
    fn new(root_dir: &'a Path) -> Self {
        Self {
            root_dir,
            children: Vec::new(),
            blobs: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Load one manifest blob, recursing into indexes.
    fn load(&mut self, media_type: &str, digest: &str) -> Result<RawManifest> {
        let data = self.read_manifest_blob(digest)?;
        let manifest = RawManifest {
            media_type: media_type.to_string(),
            digest: digest.to_string(),
            data,
        };

        if manifest.is_index() {
            let index: ImageIndex = serde_json::from_slice(&manifest.data).map_err(|e| {
                SyncError::OciImageError(format!("Failed to parse index {}: {}", digest, e))
            })?;
            for entry in index.manifests() {
                let child = self.load(&entry.media_type().to_string(), entry.digest())?;
                self.children.push(child);
            }
        } else {
            for blob in manifest.blob_digests()? {
                self.add_blob(&blob)?;
            }
        }

        Ok(manifest)
    }

    fn read_manifest_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let path = blob_path(self.root_dir, digest);
        let data = std::fs::read(&path).map_err(|e| {
            SyncError::OciImageError(format!("Failed to read manifest at {}: {}", path.display(), e))
        })?;
        if digest.starts_with("sha256:") && sha256_digest(&data) != digest {
            return Err(SyncError::OciImageError(format!(
                "Manifest {} does not match its digest",
                path.display()
            )));
        }
        Ok(data)
    }

    fn add_blob(&mut self, digest: &str) -> Result<()> {
        if !self.seen.insert(digest.to_string()) {
            return Ok(());
        }
        let path = blob_path(self.root_dir, digest);
        if !path.is_file() {
            return Err(SyncError::OciImageError(format!(
                "Missing blob {} in layout {}",
                digest,
                self.root_dir.display()
            )));
        }
        self.blobs.push(LocalBlob {
            digest: digest.to_string(),
            path,
        });
        Ok(())
    }
}

/// Validate that the directory contains a valid OCI layout.
fn validate_oci_layout(root_dir: &Path) -> Result<()> {
    for required in ["oci-layout", "index.json", "blobs"] {
        if !root_dir.join(required).exists() {
            return Err(SyncError::OciImageError(format!(
                "Not a valid OCI layout: missing {} in {}",
                required,
                root_dir.display()
            )));
        }
    }
    Ok(())
}

/// Get the path to a blob by digest.
pub(crate) fn blob_path(root_dir: &Path, digest: &str) -> PathBuf {
    // Digest format: "sha256:abc123..."
    let (algorithm, hash) = digest.split_once(':').unwrap_or(("sha256", digest));
    root_dir.join("blobs").join(algorithm).join(hash)
}

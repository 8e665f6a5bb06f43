//! OCI registry client for listing, pulling and pushing images.
//!
//! Uses the `oci-distribution` crate to talk to container registries
//! (Docker Hub, GHCR, Quay, self-hosted). Manifests are moved as raw bytes
//! so their digests never change in transit.

use std::collections::BTreeSet;

use http::HeaderValue;
use imagesync_core::error::{Result, SyncError};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};

use super::credentials::CredentialStore;
use super::image::{
    detect_manifest_media_type, sha256_digest, RawManifest, DOCKER_MANIFEST_LIST_MEDIA_TYPE,
    DOCKER_MANIFEST_MEDIA_TYPE, OCI_INDEX_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE,
};
use super::reference::ImageReference;

/// Tags requested per page when listing a repository.
const TAG_PAGE_SIZE: usize = 1000;

/// Manifest types accepted when pulling.
const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    OCI_INDEX_MEDIA_TYPE,
    OCI_MANIFEST_MEDIA_TYPE,
    DOCKER_MANIFEST_LIST_MEDIA_TYPE,
    DOCKER_MANIFEST_MEDIA_TYPE,
];

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    /// Resolve credentials for a registry: auth file, then env vars, then
    /// anonymous.
    pub fn for_registry(registry: &str) -> Self {
        if let Some(store) = CredentialStore::discover() {
            match store.get(registry) {
                Ok(Some((username, password))) => return Self::basic(username, password),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        registry,
                        path = %store.path().display(),
                        error = %e,
                        "Ignoring unreadable auth file"
                    );
                }
            }
        }
        Self::from_env()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    /// Convert to oci-distribution auth type.
    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// A registry client bound to one TLS policy.
#[derive(Clone)]
pub struct RegistryClient {
    client: Client,
    strict_tls: bool,
}

impl RegistryClient {
    /// Create a client. With `strict_tls` off, invalid certificates are
    /// accepted.
    pub fn new(strict_tls: bool) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            accept_invalid_certificates: !strict_tls,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            strict_tls,
        }
    }

    pub fn strict_tls(&self) -> bool {
        self.strict_tls
    }

    /// Authenticate for `operation` on the repository of `reference`.
    ///
    /// Blob and manifest pushes reuse the token obtained here.
    pub async fn authenticate(
        &self,
        reference: &ImageReference,
        operation: RegistryOperation,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = RegistryAuth::for_registry(&reference.registry);
        tracing::debug!(
            registry = %reference.registry,
            repository = %reference.repository,
            anonymous = auth.is_anonymous(),
            "Authenticating"
        );
        self.client
            .auth(&oci_ref, &auth.to_oci_auth(), operation)
            .await
            .map_err(|e| registry_error(reference, format!("Authentication failed: {}", e)))?;
        Ok(())
    }

    /// List every tag of the repository, sorted and de-duplicated.
    pub async fn list_tags(&self, reference: &ImageReference) -> Result<Vec<String>> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = RegistryAuth::for_registry(&reference.registry).to_oci_auth();

        let mut tags = BTreeSet::new();
        let mut last: Option<String> = None;
        loop {
            let page = self
                .client
                .list_tags(&oci_ref, &auth, Some(TAG_PAGE_SIZE), last.as_deref())
                .await
                .map_err(|e| SyncError::ListingError {
                    repository: reference.repository_name(),
                    message: e.to_string(),
                })?;

            let received = page.tags.len();
            let before = tags.len();
            last = page.tags.last().cloned();
            tags.extend(page.tags);

            // Registries that ignore paging return the full list every time.
            if received < TAG_PAGE_SIZE || tags.len() == before {
                break;
            }
        }

        tracing::debug!(repository = %reference.repository_name(), tags = tags.len(), "Listed tags");
        Ok(tags.into_iter().collect())
    }

    /// Pull a manifest exactly as the registry stores it.
    pub async fn pull_manifest(&self, reference: &ImageReference) -> Result<RawManifest> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = RegistryAuth::for_registry(&reference.registry).to_oci_auth();

        let (data, digest) = self
            .client
            .pull_manifest_raw(&oci_ref, &auth, ACCEPTED_MANIFEST_TYPES)
            .await
            .map_err(|e| registry_error(reference, format!("Failed to pull manifest: {}", e)))?;

        let media_type = detect_manifest_media_type(&data)?;
        let manifest = RawManifest {
            media_type,
            digest,
            data,
        };
        tracing::debug!(
            reference = %reference,
            digest = %manifest.digest,
            media_type = %manifest.media_type,
            "Pulled manifest"
        );
        Ok(manifest)
    }

    /// Pull a blob into memory, verifying its digest.
    ///
    /// Requires a prior [`authenticate`](Self::authenticate) for pull.
    pub async fn pull_blob(&self, reference: &ImageReference, digest: &str) -> Result<Vec<u8>> {
        let oci_ref = to_oci_reference(reference)?;
        let descriptor = OciDescriptor {
            digest: digest.to_string(),
            ..Default::default()
        };

        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &descriptor, &mut data)
            .await
            .map_err(|e| registry_error(reference, format!("Failed to pull blob {}: {}", digest, e)))?;

        if digest.starts_with("sha256:") && sha256_digest(&data) != digest {
            return Err(registry_error(
                reference,
                format!("Blob {} does not match its digest", digest),
            ));
        }
        tracing::debug!(digest, size = data.len(), "Pulled blob");
        Ok(data)
    }

    /// Push a blob. Requires a prior [`authenticate`](Self::authenticate)
    /// for push.
    pub async fn push_blob(&self, reference: &ImageReference, data: &[u8], digest: &str) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        self.client
            .push_blob(&oci_ref, data, digest)
            .await
            .map_err(|e| registry_error(reference, format!("Failed to push blob {}: {}", digest, e)))?;
        tracing::debug!(digest, size = data.len(), "Pushed blob");
        Ok(())
    }

    /// Push manifest bytes under the tag or digest of `reference`.
    pub async fn push_manifest(&self, reference: &ImageReference, manifest: &RawManifest) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        let content_type = HeaderValue::from_str(&manifest.media_type).map_err(|e| {
            SyncError::OciImageError(format!(
                "Invalid manifest media type '{}': {}",
                manifest.media_type, e
            ))
        })?;

        self.client
            .push_manifest_raw(&oci_ref, manifest.data.clone(), content_type)
            .await
            .map_err(|e| registry_error(reference, format!("Failed to push manifest: {}", e)))?;
        tracing::debug!(reference = %reference, digest = %manifest.digest, "Pushed manifest");
        Ok(())
    }
}

fn registry_error(reference: &ImageReference, message: String) -> SyncError {
    SyncError::RegistryError {
        registry: reference.registry.clone(),
        message,
    }
}

/// Convert an ImageReference to an oci-distribution Reference.
///
/// A digest wins over a tag; a bare repository is addressed as `latest`.
pub fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = if let Some(ref digest) = reference.digest {
        format!("{}@{}", reference.repository_name(), digest)
    } else {
        format!("{}:{}", reference.repository_name(), reference.tag_or_default())
    };

    ref_str.parse::<Reference>().map_err(|e| {
        SyncError::OciImageError(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_auth_anonymous() {
        let auth = RegistryAuth::anonymous();
        assert!(auth.is_anonymous());
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Anonymous));
    }

    #[test]
    fn test_registry_auth_basic() {
        let auth = RegistryAuth::basic("user", "pass");
        assert_eq!(auth.username, Some("user".to_string()));
        assert_eq!(auth.password, Some("pass".to_string()));
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Basic(_, _)));
    }

    #[test]
    fn test_to_oci_reference_with_tag() {
        let img_ref = ImageReference::parse("ghcr.io/org/app:v0.1.0").unwrap();
        let oci_ref = to_oci_reference(&img_ref).unwrap();
        assert_eq!(oci_ref.to_string(), "ghcr.io/org/app:v0.1.0");
    }

    #[test]
    fn test_to_oci_reference_with_digest() {
        let digest = "sha256:abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890";
        let img_ref = ImageReference::parse(&format!("ghcr.io/org/app@{digest}")).unwrap();
        let oci_ref = to_oci_reference(&img_ref).unwrap();
        assert_eq!(oci_ref.digest(), Some(digest));
    }

    #[test]
    fn test_to_oci_reference_repository_uses_latest() {
        let img_ref = ImageReference::parse("quay.io/org/app").unwrap();
        let oci_ref = to_oci_reference(&img_ref).unwrap();
        assert_eq!(oci_ref.tag(), Some("latest"));
        assert_eq!(oci_ref.repository(), "org/app");
    }

    #[test]
    fn test_client_tls_policy() {
        assert!(RegistryClient::new(true).strict_tls());
        assert!(!RegistryClient::new(false).strict_tls());
    }
}

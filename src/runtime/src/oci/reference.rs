//! OCI image reference parsing.
//!
//! Parses references like `ghcr.io/org/app:v0.1.0` into structured components.
//! Unlike `docker pull`, no tag is implied: a reference without a tag names a
//! whole repository.

use std::sync::OnceLock;

use imagesync_core::error::{DetectionError, Result};
use regex::Regex;

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag used when an image has to be addressed and none was given.
pub const DEFAULT_TAG: &str = "latest";

static PATH_COMPONENT_REGEX: OnceLock<Regex> = OnceLock::new();
static TAG_REGEX: OnceLock<Regex> = OnceLock::new();
static DIGEST_REGEX: OnceLock<Regex> = OnceLock::new();

fn path_component_regex() -> &'static Regex {
    PATH_COMPONENT_REGEX.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("valid regex")
    })
}

fn tag_regex() -> &'static Regex {
    TAG_REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid regex"))
}

fn digest_regex() -> &'static Regex {
    DIGEST_REGEX.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-zA-Z0-9=_-]+$").expect("valid regex")
    })
}

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "org/app")
    pub repository: String,
    /// Tag (e.g., "latest", "v0.1.0"), `None` when not written
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `myuser/myimage` → docker.io/myuser/myimage
    /// - `ghcr.io/org/image:tag` → ghcr.io/org/image:tag
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let original = reference;
        let fail = |cause: String| DetectionError::ReferenceParseFailure {
            reference: original.to_string(),
            cause,
        };

        let reference = reference.trim();
        if reference.is_empty() {
            return Err(fail("empty image reference".to_string()).into());
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest_part = &reference[at_pos + 1..];
                if !digest_regex().is_match(digest_part) {
                    return Err(fail(format!(
                        "invalid digest '{}': expected algorithm:hex",
                        digest_part
                    ))
                    .into());
                }
                (&reference[..at_pos], Some(digest_part.to_string()))
            }
            None => (reference, None),
        };

        // Split tag on the last colon after the last slash
        let (name, tag) = match name_tag.rfind('/') {
            Some(slash_pos) => {
                let after_slash = &name_tag[slash_pos + 1..];
                match after_slash.rfind(':') {
                    Some(colon_pos) => (
                        &name_tag[..slash_pos + 1 + colon_pos],
                        Some(&after_slash[colon_pos + 1..]),
                    ),
                    None => (name_tag, None),
                }
            }
            None => match name_tag.rfind(':') {
                // A numeric suffix without any slash looks like registry:port
                Some(colon_pos)
                    if name_tag[colon_pos + 1..].chars().all(|c| c.is_ascii_digit()) =>
                {
                    (name_tag, None)
                }
                Some(colon_pos) => (&name_tag[..colon_pos], Some(&name_tag[colon_pos + 1..])),
                None => (name_tag, None),
            },
        };

        if let Some(tag) = tag {
            if !tag_regex().is_match(tag) {
                return Err(fail(format!("invalid tag '{}'", tag)).into());
            }
        }

        let (registry, repository) = Self::split_registry_repository(name).map_err(fail)?;

        Ok(ImageReference {
            registry,
            repository,
            tag: tag.map(str::to_string),
            digest,
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> std::result::Result<(String, String), String> {
        // The first component is a registry when it looks like a hostname
        // (contains a dot or colon, or is "localhost")
        let (registry, repository) = match name.find('/') {
            Some(slash_pos)
                if {
                    let first = &name[..slash_pos];
                    first.contains('.') || first.contains(':') || first == "localhost"
                } =>
            {
                (name[..slash_pos].to_string(), name[slash_pos + 1..].to_string())
            }
            _ if name.contains('/') => (DEFAULT_REGISTRY.to_string(), name.to_string()),
            // Single name like "nginx" → "library/nginx" for Docker Hub
            _ => (DEFAULT_REGISTRY.to_string(), format!("library/{}", name)),
        };

        if repository.is_empty() {
            return Err("empty repository".to_string());
        }
        if repository.len() > 255 {
            return Err("repository name exceeds 255 characters".to_string());
        }
        for component in repository.split('/') {
            if !path_component_regex().is_match(component) {
                return Err(format!(
                    "invalid repository component '{}': must be lowercase alphanumerics separated by '.', '_', '__' or '-'",
                    component
                ));
            }
        }

        Ok((registry, repository))
    }

    /// Whether the reference pins a single image (by tag or digest).
    pub fn has_explicit_tag(&self) -> bool {
        self.tag.is_some() || self.digest.is_some()
    }

    /// The tag, or `latest` when none was given.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// The same repository addressed by `tag`, dropping any digest.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// The same repository addressed by `digest`, dropping any tag.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// `registry/repository` without tag or digest.
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository_name();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

//! Registry credentials from container auth files.
//!
//! Reads the `auths` section shared by Docker (`~/.docker/config.json`) and
//! podman/skopeo (`auth.json`). Credentials are never written back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use imagesync_core::error::{Result, SyncError};
use serde::Deserialize;

/// Environment variable overriding the auth file location.
const AUTH_FILE_ENV: &str = "REGISTRY_AUTH_FILE";

/// Per-registry credential entry.
#[derive(Debug, Clone, Default, Deserialize)]
struct AuthEntry {
    /// base64 of `username:password`
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Auth file format.
#[derive(Debug, Default, Deserialize)]
struct AuthFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

/// Read-only view of a container auth file.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Locate the auth file.
    ///
    /// Checks, in order: `$REGISTRY_AUTH_FILE`,
    /// `$XDG_RUNTIME_DIR/containers/auth.json` and `~/.docker/config.json`.
    /// Returns `None` when none of them exists.
    pub fn discover() -> Option<Self> {
        let mut candidates = Vec::new();
        if let Some(path) = std::env::var_os(AUTH_FILE_ENV) {
            candidates.push(PathBuf::from(path));
        }
        if let Some(runtime) = dirs::runtime_dir() {
            candidates.push(runtime.join("containers").join("auth.json"));
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".docker").join("config.json"));
        }

        candidates
            .into_iter()
            .find(|p| p.is_file())
            .map(Self::new)
    }

    /// Create a credential store for a specific file.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get credentials for a registry. Returns `(username, password)`.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;
        let wanted = normalize_registry(registry);

        let entry = file
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry);

        match entry {
            Some(entry) => decode_entry(entry).map(Some),
            None => Ok(None),
        }
    }

    /// Load the auth file from disk. Returns empty if not found.
    fn load(&self) -> Result<AuthFile> {
        if !self.path.exists() {
            return Ok(AuthFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            SyncError::ConfigError(format!(
                "Failed to read auth file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            SyncError::ConfigError(format!(
                "Failed to parse auth file {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

fn decode_entry(entry: &AuthEntry) -> Result<(String, String)> {
    if let (Some(u), Some(p)) = (&entry.username, &entry.password) {
        return Ok((u.clone(), p.clone()));
    }

    let encoded = entry
        .auth
        .as_deref()
        .ok_or_else(|| SyncError::ConfigError("auth entry has no credentials".to_string()))?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SyncError::ConfigError(format!("invalid base64 in auth entry: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|e| SyncError::ConfigError(format!("auth entry is not UTF-8: {}", e)))?;

    match decoded.split_once(':') {
        Some((user, pass)) => Ok((user.to_string(), pass.to_string())),
        None => Err(SyncError::ConfigError(
            "auth entry is not in username:password form".to_string(),
        )),
    }
}

/// Normalize registry keys.
///
/// Auth files use `https://index.docker.io/v1/` for Docker Hub and sometimes
/// carry a scheme or path for other registries.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r);
    let host = r.split('/').next().unwrap_or(r);
    match host {
        "docker.io" | "index.docker.io" | "registry-1.docker.io" => "index.docker.io".to_string(),
        other => other.to_string(),
    }
}

//! imagesync Runtime - source detection, registry transport and the sync
//! orchestrator.
//!
//! Everything here touches the filesystem or the network; the pure planning
//! pieces live in `imagesync-core`.

#![allow(clippy::result_large_err)]

pub mod oci;
pub mod sync;

// Re-export common types
pub use oci::{ArchiveFormat, CredentialStore, ImageReference, LocalImage, RegistryAuth, RegistryClient};
pub use sync::{classify, Classification, Endpoint, SyncMode};
pub use sync::{ImageTransport, RegistryTransport, TlsPolicy};
pub use sync::{SyncReport, SyncStatus, Syncer, TagFailure};

/// imagesync Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! OCI image plumbing: references, registries, layouts and archives.
//!
//! # Layout
//!
//! ```text
//! image/
//! ├── oci-layout           (OCI layout marker)
//! ├── index.json           (Image index)
//! └── blobs/
//!     └── sha256/
//!         ├── <manifest>   (Image manifest)
//!         ├── <config>     (Image configuration)
//!         └── <layers>     (Filesystem layers)
//! ```
//!
//! An `oci-archive` is this tree packed into a tarball. A `docker-archive`
//! is converted into an equivalent in-memory image on open.

pub mod archive;
pub mod credentials;
pub mod image;
pub mod reference;
pub mod registry;

pub use archive::ArchiveFormat;
pub use credentials::CredentialStore;
pub use image::{LocalBlob, LocalImage, RawManifest};
pub use reference::ImageReference;
pub use registry::{RegistryAuth, RegistryClient};

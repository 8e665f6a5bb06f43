//! imagesync Core - configuration, errors, tag planning and the copy queue.
//!
//! Nothing in this crate performs I/O against registries or the filesystem;
//! those collaborators live in `imagesync-runtime`.

pub mod config;
pub mod error;
pub mod queue;
pub mod tags;

// Re-export commonly used types
pub use config::{parse_tag_list, FailurePolicy, SyncConfig};
pub use error::{DetectionError, ErrorKind, Result, SyncError};
pub use queue::{QueueReport, WorkQueue};
pub use tags::{resolve_plan, SyncPlan, TagFilter, TagSet};

/// imagesync version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

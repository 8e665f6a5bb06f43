//! Sync engine.
//!
//! ```text
//! run_sync ─► classify ─┬─► archive / layout / single image ─► one copy
//!                       └─► repository ─► list tags ─► plan ─► WorkQueue ─► copy per tag
//! ```

pub mod classify;
pub mod endpoint;
pub mod orchestrator;
pub mod transport;

pub use classify::{classify, Classification, SyncMode};
pub use endpoint::Endpoint;
pub use orchestrator::{SyncReport, SyncStatus, Syncer, TagFailure};
pub use transport::{ImageTransport, RegistryTransport, TlsPolicy};

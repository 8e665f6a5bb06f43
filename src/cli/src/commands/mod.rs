//! CLI definition and dispatch.

mod sync;

use clap::{Parser, ValueEnum};
use imagesync_core::{ErrorKind, SyncError};

pub use sync::SyncArgs;

/// Sync container images between archives, OCI layouts and registries.
#[derive(Parser)]
#[command(name = "imagesync", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub sync: SyncArgs,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Run the parsed command line.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    sync::execute(cli.sync).await
}

/// Process exit code for a failed run.
///
/// Bad input (flags, references, archive detection) exits with 2, the code
/// clap uses for usage errors. Listing and copy failures exit with 1.
pub fn exit_code(err: &(dyn std::error::Error + 'static)) -> i32 {
    match err.downcast_ref::<SyncError>().map(SyncError::kind) {
        Some(ErrorKind::Configuration | ErrorKind::Detection) => 2,
        _ => 1,
    }
}

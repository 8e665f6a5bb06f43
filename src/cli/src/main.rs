//! imagesync CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use imagesync_cli::commands::{dispatch, exit_code, Cli, LogFormat};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so that stdout carries only the report.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(exit_code(e.as_ref()));
    }
}

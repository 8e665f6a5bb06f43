//! imagesync CLI - sync container images without a daemon.

pub mod commands;
pub mod output;

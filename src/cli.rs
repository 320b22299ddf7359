//! CLI definitions for meshd.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "meshd",
    version,
    about = "Mesh telemetry ingestion daemon — solar-panel monitor gateway, normalizer, and egress pitcher",
    long_about = None
)]
pub struct Cli {
    /// Path to meshd.toml config file
    #[clap(long, short, default_value = "meshd.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print an example meshd.toml to stdout
    Init,

    /// Start the gateway and pipeline in the foreground; Ctrl-C to stop
    Run,

    /// Manage meshd as a systemd service
    Service {
        #[clap(subcommand)]
        action: ServiceAction,
    },
}

#[derive(Subcommand)]
pub enum ServiceAction {
    /// Install and start the systemd unit
    Install,
    /// Stop, disable, and remove the systemd unit
    Uninstall,
    Start,
    Stop,
    Restart,
}

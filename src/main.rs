//! meshd — mesh telemetry ingestion daemon for a network of solar-panel
//! monitoring devices. Run `meshd --help` for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod service;
mod supervisor;

use cli::{Cli, Commands, ServiceAction};
use config::MeshConfig;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        let example = MeshConfig::default_example();
        print!("{}", toml::to_string_pretty(&example)?);
        return Ok(());
    }

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Run => {
            let config = MeshConfig::load(&cli.config)?;
            supervisor::run(config)?;
        }
        Commands::Service { action } => match action {
            ServiceAction::Install => service::install(&cli.config)?,
            ServiceAction::Uninstall => service::uninstall()?,
            ServiceAction::Start => service::control("start")?,
            ServiceAction::Stop => service::control("stop")?,
            ServiceAction::Restart => service::control("restart")?,
        },
    }

    Ok(())
}

//! fundmaild - unattended fund mailbox ingestion
//!
//! Loads the configuration, restores any checkpoint left behind by an
//! interrupted cycle and then runs the requested command.

use anyhow::Result;
use log::{error, info, warn};
use std::process::ExitCode;

use fundmail::{AppConfig, CycleRequest, IngestService, Scheduler};

mod cli;
mod shutdown;

use cli::{Cli, Command};
use shutdown::Shutdown;

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match run(std::env::args().skip(1)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: impl Iterator<Item = String>) -> Result<()> {
    let Cli {
        config: config_path,
        command,
    } = cli::parse(args)?;
    if command == Command::Help {
        print!("{}", cli::USAGE);
        return Ok(());
    }

    // Bootstrap config directory
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    let config = AppConfig::load(config_path.as_deref())?;
    info!(
        "Ingesting {} into {}",
        config.mailbox,
        config.data_dir.display()
    );

    // Installed before any cycle so a signal never cuts one short
    let shutdown = Shutdown::install()?;

    let service = IngestService::new(config);
    if service.recover()? {
        warn!("Restored the checkpoint of an interrupted cycle");
    }

    match command {
        Command::Run => {
            let scheduler = Scheduler::new(service.config().interval());
            service.run_loop(&scheduler, shutdown.flag())?;
        }
        Command::Once => {
            service.run_cycle(CycleRequest::Checkpointed)?;
        }
        Command::Day(date) => {
            let date = date.unwrap_or_else(|| service.config().today());
            service.run_cycle(CycleRequest::Day(date))?;
        }
        Command::Replicate(date) => match service.replicate(date)? {
            Some(stats) => info!("Replicated {}: {} files", date, stats.files),
            None => warn!("No replica_dir configured; nothing to do"),
        },
        Command::Help => {}
    }

    Ok(())
}

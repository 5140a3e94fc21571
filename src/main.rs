//! qflash - Cycle-level simulator for a QSPI-attached HyperFlash programmer
//!
//! Runs the peripheral models from `qflash-core` against the emulated flash
//! device from `qflash-model`. Every operation goes through the same path a
//! real host would take: nibbles on the serial command bus, registers and
//! program buffer in the peripheral, packets on the HyperBus.
//!
//! # Configuration
//!
//! Parameters come from the defaults, then an optional TOML file
//! (`--config`), then individual command-line flags.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use qflash_model::{Bench, BenchConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let config = load_config(&cli)?;
    let mut bench = Bench::new(config)?;

    let result = match cli.command {
        Commands::Erase { addr, length } => commands::erase::run_erase(&mut bench, addr, length),
        Commands::Write {
            addr,
            input,
            no_verify,
            no_erase,
        } => commands::write::run_write(&mut bench, addr, &input, !no_verify, !no_erase),
        Commands::Send { packet } => commands::send::run_send(&mut bench, &packet),
        Commands::Read { addr, len, output } => {
            commands::read::run_read(&mut bench, addr, len as usize, output.as_deref())
        }
        Commands::Trace { op, addr } => commands::trace::run_trace(&mut bench, op, addr),
    };

    log::info!("Simulated {} ticks", bench.ticks());
    result
}

/// Build the bench configuration from the file and flag overrides
fn load_config(cli: &Cli) -> Result<BenchConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            log::info!("Loading configuration from {:?}", path);
            BenchConfig::from_toml_file(path)?
        }
        None => BenchConfig::default(),
    };

    if let Some(latency) = cli.latency {
        config.soc.sequencer.init_latency = latency;
        config.flash.latency = latency;
    }
    if let Some(div) = cli.flash_div {
        config.soc.flash_div = div;
    }
    config.flash.fail_erase |= cli.fail_erase;
    config.flash.fail_program |= cli.fail_program;

    log::debug!("{:?}", config);
    Ok(config)
}

//! rdfu - STM32 DFU firmware flasher
//!
//! Flashes Intel HEX firmware images to STM32 flight controllers over USB DFU
//! (DfuSe). Only the pages the image actually touches are erased, so
//! configuration stored in untouched flash survives the update.
//!
//! Subcommands:
//! - **flash** - erase, write and verify a .hex image
//! - **probe** - dump the DFU alternate settings and parsed flash layout
//! - **list** - enumerate connected DFU devices
//! - **reboot** - kick a flight controller from its serial CLI into DFU mode

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use std::error::Error;

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let result = match cli.command {
        Commands::Flash { firmware } => commands::flash_firmware(&firmware),
        Commands::Probe => commands::probe_device(),
        Commands::List => commands::list_devices(),
        Commands::Reboot { port } => commands::reboot_to_dfu(&port),
    };

    if let Err(e) = result {
        println!("\n✗ Error: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            println!("  caused by: {}", cause);
            source = cause.source();
        }
        std::process::exit(1);
    }
}

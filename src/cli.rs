//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rdfu")]
#[command(author, version, about = "STM32 DFU firmware flasher", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Flash an Intel HEX firmware image over USB DFU
    Flash {
        /// Firmware file (.hex)
        firmware: PathBuf,
    },

    /// Show DFU interface and flash layout details for the connected device
    Probe,

    /// List connected STM32 DFU devices
    List,

    /// Reboot a flight controller into DFU mode via its serial CLI
    Reboot {
        /// Serial port of the flight controller
        #[arg(short, long, default_value = "/dev/ttyACM0")]
        port: String,
    },
}

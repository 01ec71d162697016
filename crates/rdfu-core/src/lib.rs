//! rdfu-core - STM32 USB-DFU flashing protocol client
//!
//! This crate implements the host side of flashing firmware onto STM32
//! microcontrollers through the DfuSe bootloader: Intel-HEX parsing,
//! flash-descriptor decoding, erase planning, and the DFU state machine
//! itself. It contains no USB code; the protocol runs over the
//! [`transport::DfuTransport`] trait, with a real implementation in
//! `rdfu-usb` and mocks in the tests here.
//!
//! Only flash pages the firmware image lands on are erased, so
//! configuration persisted in other sectors survives the update.
//!
//! # Example
//!
//! ```ignore
//! use rdfu_core::{flasher, hex::FirmwareImage, protocol::DfuSe, quirks::ChipProfile};
//!
//! fn run(transport: impl rdfu_core::transport::DfuTransport) -> rdfu_core::Result<()> {
//!     let image = FirmwareImage::parse("firmware.hex")?;
//!     let layout = discover_layout()?; // from rdfu-usb
//!     let profile = ChipProfile::identify(&layout.descriptor);
//!     let mut dfu = DfuSe::new(transport, profile.quirks);
//!     flasher::flash(&mut dfu, &image, &layout, &mut flasher::NoProgress)?;
//!     Ok(())
//! }
//! ```
//!
//! # Interruption
//!
//! There is no cancellation path. Killing the process between the first
//! erase and the end of verification leaves the target flash in an
//! undefined state; the device stays in DFU mode and must be flashed
//! again.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod flasher;
pub mod hex;
pub mod layout;
pub mod plan;
pub mod protocol;
pub mod quirks;
pub mod transport;

pub use error::{Error, Result};

//! rdfu-usb - USB transport for the STM32 DFU bootloader
//!
//! Finds the bootloader on the bus (VID `0x0483`, PID `0xdf11`), claims
//! its DFU interface, and implements `rdfu_core`'s transport trait over
//! libusb control transfers via `rusb`. Flash-descriptor strings are
//! fetched here and handed to `rdfu_core` for parsing.
//!
//! # Example
//!
//! ```no_run
//! use rdfu_usb::DfuDevice;
//!
//! let device = DfuDevice::open()?;
//! let info = device.chip_info()?;
//! let flash = info.internal_flash().expect("no internal flash region");
//! println!("flash: {} KB", flash.total_size / 1024);
//! # Ok::<(), rdfu_core::Error>(())
//! ```

mod device;

pub use device::{list_devices, AlternateInfo, DfuDevice, DfuDeviceInfo};

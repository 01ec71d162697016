//! CLI command implementations
//!
//! Each subcommand lives in its own module. `flash`, `probe` and `list` talk
//! to the DFU device through `rdfu-usb`; `reboot` only touches a serial port.
//!
//! Opening the device is shared between commands: `open_device` prints the
//! same status lines everywhere and, on failure, a troubleshooting block for
//! the two errors users actually hit (no device, no permission).

mod flash;
mod list;
mod probe;
mod reboot;

pub use flash::flash_firmware;
pub use list::list_devices;
pub use probe::probe_device;
pub use reboot::reboot_to_dfu;

use rdfu_core::Error;
use rdfu_usb::DfuDevice;

/// Find and claim the DFU device, printing troubleshooting hints on failure.
pub(crate) fn open_device() -> Result<DfuDevice, Error> {
    println!("Looking for DFU device...");
    match DfuDevice::open() {
        Ok(device) => {
            println!("  Found DFU device");
            println!();
            Ok(device)
        }
        Err(e) => {
            print_open_help(&e);
            Err(e)
        }
    }
}

fn print_open_help(err: &Error) {
    match err {
        Error::DeviceNotFound => {
            println!("\n✗ No DFU device found");
            println!("\nTroubleshooting:");
            println!("  1. Ensure flight controller is in DFU mode");
            println!("  2. Check USB cable connection");
            println!("  3. Run 'lsusb' to verify device is visible");
        }
        Error::PermissionDenied(_) => {
            println!("\n✗ USB Permission Error");
            println!("\nTroubleshooting:");
            println!("  1. Add udev rules: /etc/udev/rules.d/45-stdfu-permissions.rules");
            println!("     SUBSYSTEM==\"usb\", ATTRS{{idVendor}}==\"0483\", ATTRS{{idProduct}}==\"df11\", MODE=\"0664\", GROUP=\"plugdev\"");
            println!("  2. Add your user to plugdev group: sudo usermod -a -G plugdev $USER");
            println!("  3. Or run with sudo (not recommended)");
        }
        _ => {}
    }
}

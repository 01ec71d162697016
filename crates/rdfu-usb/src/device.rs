//! STM32 DFU device session
//!
//! Owns the libusb handle for one flash operation: finds the bootloader
//! by VID:PID, detaches the kernel driver when one is bound, claims
//! interface 0, and restores both on drop. The DFU interface advertises
//! its flash layout through interface string descriptors on alternate
//! settings; those are fetched with a raw GET_DESCRIPTOR transfer since
//! they are UTF-16LE payloads the bootloader sometimes pads with
//! garbage.

use std::thread;
use std::time::Duration;

use rdfu_core::error::Error;
use rdfu_core::layout::ChipInfo;
use rdfu_core::protocol::{CONTROL_TIMEOUT_MS, STM32_DFU_PID, STM32_DFU_VID};
use rdfu_core::transport::DfuTransport;
use rdfu_core::Result;
use rusb::{DeviceHandle, Direction, GlobalContext, Recipient, RequestType};

/// The bootloader exposes everything on interface 0.
const DFU_INTERFACE: u8 = 0;

/// Alternate settings probed for flash descriptors.
const MAX_ALTERNATES: usize = 8;

const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
const DESCRIPTOR_TYPE_STRING: u16 = 0x03;

const CONTROL_TIMEOUT: Duration = Duration::from_millis(CONTROL_TIMEOUT_MS as u64);

fn usb_err(e: rusb::Error) -> Error {
    Error::Usb(e.to_string())
}

/// Errors during device setup where EACCES means a udev problem, not a
/// broken device.
fn setup_err(e: rusb::Error) -> Error {
    match e {
        rusb::Error::Access => Error::PermissionDenied(e.to_string()),
        other => Error::Usb(other.to_string()),
    }
}

/// One alternate setting of the DFU interface.
#[derive(Debug, Clone)]
pub struct AlternateInfo {
    /// bAlternateSetting number.
    pub number: u8,
    /// Decoded interface string, when the alternate carries one.
    pub descriptor: Option<String>,
}

/// An enumerated but unclaimed bootloader, for listing.
#[derive(Debug, Clone)]
pub struct DfuDeviceInfo {
    /// USB bus number.
    pub bus: u8,
    /// Device address on the bus.
    pub address: u8,
    /// Manufacturer string, when readable without privileges.
    pub manufacturer: Option<String>,
    /// Product string.
    pub product: Option<String>,
    /// Serial number string.
    pub serial: Option<String>,
}

/// A claimed STM32 DFU bootloader session.
///
/// Dropping the session releases the interface and reattaches the kernel
/// driver if one was detached, on every exit path.
pub struct DfuDevice {
    handle: DeviceHandle<GlobalContext>,
    detached_kernel_driver: bool,
}

impl DfuDevice {
    /// Open and claim the first bootloader on the bus.
    ///
    /// Fails with [`Error::DeviceNotFound`] when nothing matches the
    /// STM32 DFU VID:PID and [`Error::PermissionDenied`] when the OS
    /// refuses access, so callers can print targeted remediation.
    pub fn open() -> Result<DfuDevice> {
        let devices = rusb::devices().map_err(usb_err)?;
        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if descriptor.vendor_id() != STM32_DFU_VID
                || descriptor.product_id() != STM32_DFU_PID
            {
                continue;
            }
            return DfuDevice::claim(&device);
        }
        Err(Error::DeviceNotFound)
    }

    fn claim(device: &rusb::Device<GlobalContext>) -> Result<DfuDevice> {
        let mut handle = device.open().map_err(setup_err)?;

        let detached_kernel_driver = match handle.kernel_driver_active(DFU_INTERFACE) {
            Ok(true) => {
                handle
                    .detach_kernel_driver(DFU_INTERFACE)
                    .map_err(setup_err)?;
                true
            }
            Ok(false) => false,
            // No kernel-driver management on this platform.
            Err(rusb::Error::NotSupported) => false,
            Err(e) => return Err(usb_err(e)),
        };

        let config = device.config_descriptor(0).map_err(usb_err)?.number();
        handle.set_active_configuration(config).map_err(setup_err)?;
        handle.claim_interface(DFU_INTERFACE).map_err(setup_err)?;

        log::info!(
            "opened DFU device on bus {:03} address {:03}",
            device.bus_number(),
            device.address()
        );
        Ok(DfuDevice {
            handle,
            detached_kernel_driver,
        })
    }

    /// Enumerate the DFU interface's alternate settings with their
    /// decoded descriptor strings.
    pub fn alternates(&self) -> Result<Vec<AlternateInfo>> {
        let config = self
            .handle
            .device()
            .active_config_descriptor()
            .map_err(usb_err)?;

        let mut alternates = Vec::new();
        let interface = match config.interfaces().next() {
            Some(interface) => interface,
            None => return Ok(alternates),
        };
        for descriptor in interface.descriptors().take(MAX_ALTERNATES) {
            let text = match descriptor.description_string_index() {
                Some(index) => self
                    .string_descriptor(index)
                    .ok()
                    .filter(|s| !s.is_empty()),
                None => None,
            };
            alternates.push(AlternateInfo {
                number: descriptor.setting_number(),
                descriptor: text,
            });
        }
        Ok(alternates)
    }

    /// Every non-empty interface descriptor string, in alternate order.
    pub fn descriptor_strings(&self) -> Result<Vec<String>> {
        Ok(self
            .alternates()?
            .into_iter()
            .filter_map(|a| a.descriptor)
            .collect())
    }

    /// Parse the advertised memory regions.
    ///
    /// Fails with [`Error::NoChipInfo`] when no alternate advertises a
    /// parseable flash descriptor.
    pub fn chip_info(&self) -> Result<ChipInfo> {
        let strings = self.descriptor_strings()?;
        let info = ChipInfo::parse(&strings);
        if info.is_empty() {
            return Err(Error::NoChipInfo);
        }
        Ok(info)
    }

    /// Fetch a string descriptor with a raw GET_DESCRIPTOR transfer and
    /// decode its UTF-16LE payload.
    fn string_descriptor(&self, index: u8) -> Result<String> {
        let request_type =
            rusb::request_type(Direction::In, RequestType::Standard, Recipient::Device);
        let mut buf = [0u8; 255];
        let n = self
            .handle
            .read_control(
                request_type,
                REQUEST_GET_DESCRIPTOR,
                DESCRIPTOR_TYPE_STRING << 8 | u16::from(index),
                0,
                &mut buf,
                CONTROL_TIMEOUT,
            )
            .map_err(usb_err)?;
        Ok(decode_string_descriptor(&buf[..n]))
    }
}

impl DfuTransport for DfuDevice {
    fn write_control(&mut self, request: u8, value: u16, data: &[u8]) -> Result<()> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface);
        self.handle
            .write_control(request_type, request, value, 0, data, CONTROL_TIMEOUT)
            .map_err(usb_err)?;
        Ok(())
    }

    fn read_control(&mut self, request: u8, value: u16, length: u16) -> Result<Vec<u8>> {
        let request_type =
            rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface);
        let mut buf = vec![0u8; usize::from(length)];
        let n = self
            .handle
            .read_control(request_type, request, value, 0, &mut buf, CONTROL_TIMEOUT)
            .map_err(usb_err)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

impl Drop for DfuDevice {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(DFU_INTERFACE) {
            log::debug!("releasing DFU interface failed: {e}");
        }
        if self.detached_kernel_driver {
            if let Err(e) = self.handle.attach_kernel_driver(DFU_INTERFACE) {
                log::debug!("reattaching kernel driver failed: {e}");
            }
        }
    }
}

/// List bootloaders on the bus without claiming them.
///
/// String descriptors are best-effort; a device we cannot open still
/// shows up with its bus position.
pub fn list_devices() -> Result<Vec<DfuDeviceInfo>> {
    let mut found = Vec::new();
    for device in rusb::devices().map_err(usb_err)?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if descriptor.vendor_id() != STM32_DFU_VID || descriptor.product_id() != STM32_DFU_PID {
            continue;
        }
        let (manufacturer, product, serial) = match device.open() {
            Ok(handle) => (
                handle.read_manufacturer_string_ascii(&descriptor).ok(),
                handle.read_product_string_ascii(&descriptor).ok(),
                handle.read_serial_number_string_ascii(&descriptor).ok(),
            ),
            Err(_) => (None, None, None),
        };
        found.push(DfuDeviceInfo {
            bus: device.bus_number(),
            address: device.address(),
            manufacturer,
            product,
            serial,
        });
    }
    Ok(found)
}

/// Decode a raw string-descriptor payload.
///
/// Byte 0 is the total descriptor length including the two header
/// bytes; the text is UTF-16LE from byte 2. Unpaired units decode to
/// the replacement character instead of failing, since bootloader ROMs
/// are not always careful with these.
fn decode_string_descriptor(raw: &[u8]) -> String {
    if raw.len() < 2 {
        return String::new();
    }
    let length = usize::from(raw[0]).min(raw.len());
    let mut text = String::new();
    let mut i = 2;
    while i + 1 < length {
        let unit = u16::from(raw[i]) | u16::from(raw[i + 1]) << 8;
        text.push(char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER));
        i += 2;
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_bytes(text: &str) -> Vec<u8> {
        let mut raw = vec![0u8, DESCRIPTOR_TYPE_STRING as u8];
        for unit in text.encode_utf16() {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        raw[0] = raw.len() as u8;
        raw
    }

    #[test]
    fn decodes_a_flash_descriptor_string() {
        let raw = descriptor_bytes("@Internal Flash  /0x08000000/04*016Kg,01*064Kg,07*128Kg");
        assert_eq!(
            decode_string_descriptor(&raw),
            "@Internal Flash  /0x08000000/04*016Kg,01*064Kg,07*128Kg"
        );
    }

    #[test]
    fn honors_the_declared_length_over_the_buffer_length() {
        let mut raw = descriptor_bytes("STM32");
        // Declare only the first two characters.
        raw[0] = 2 + 4;
        assert_eq!(decode_string_descriptor(&raw), "ST");
    }

    #[test]
    fn short_buffer_wins_over_declared_length() {
        let mut raw = descriptor_bytes("BOOT");
        raw.truncate(6);
        raw[0] = 10;
        assert_eq!(decode_string_descriptor(&raw), "BO");
    }

    #[test]
    fn unpaired_surrogate_decodes_lossily() {
        let raw = vec![6, 3, 0x00, 0xD8, 0x41, 0x00];
        assert_eq!(decode_string_descriptor(&raw), "\u{FFFD}A");
    }

    #[test]
    fn empty_and_header_only_payloads_decode_to_nothing() {
        assert_eq!(decode_string_descriptor(&[]), "");
        assert_eq!(decode_string_descriptor(&[2, 3]), "");
    }

    #[test]
    fn access_errors_map_to_permission_denied() {
        assert!(matches!(
            setup_err(rusb::Error::Access),
            Error::PermissionDenied(_)
        ));
        assert!(matches!(setup_err(rusb::Error::Io), Error::Usb(_)));
    }
}

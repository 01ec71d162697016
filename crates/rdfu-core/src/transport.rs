//! Control-transfer abstraction the protocol engine is written against.
//!
//! The DFU class runs entirely over endpoint-0 class requests aimed at the
//! DFU interface, so the whole transport surface is two control transfers
//! plus a sleep hook. The sleep is part of the trait so tests can observe
//! poll-timeout waits without real time passing.

use crate::Result;

/// Host side of the DFU interface: class control transfers and timing.
///
/// Implementations direct `write_control` at `bmRequestType 0x21`
/// (host-to-device, class, interface) and `read_control` at `0xA1`, both
/// with `wIndex 0` and a 5000 ms timeout.
pub trait DfuTransport {
    /// Host-to-device class request carrying `data`.
    fn write_control(&mut self, request: u8, value: u16, data: &[u8]) -> Result<()>;

    /// Device-to-host class request expecting up to `length` bytes back.
    fn read_control(&mut self, request: u8, value: u16, length: u16) -> Result<Vec<u8>>;

    /// Wait before the next status poll. `ms` comes straight from the
    /// device's advertised poll timeout and must not be shortened.
    fn delay_ms(&mut self, ms: u32);
}

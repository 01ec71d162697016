//! Error types for rdfu-core
//!
//! A single error enum covers every stage of a flashing run, from hex
//! parsing through the final DFU exit, so callers can report any failure
//! with one type.

use std::io;

use thiserror::Error;

fn kib(bytes: &u64) -> f64 {
    *bytes as f64 / 1024.0
}

/// Errors raised while loading firmware, talking to the device, or flashing.
#[derive(Debug, Error)]
pub enum Error {
    // Firmware image errors
    /// A hex record could not be decoded. Carries the 1-based line number.
    #[error("malformed hex record on line {line}: {reason}")]
    HexFormat {
        /// 1-based line number of the offending record
        line: usize,
        /// What was wrong with it
        reason: String,
    },
    /// Reading the firmware file failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    // Device and discovery errors
    /// No USB device with the STM32 DFU VID:PID is connected.
    #[error("no DFU device found")]
    DeviceNotFound,
    /// Opening, configuring, or claiming the device was denied by the OS.
    #[error("USB permission denied: {0}")]
    PermissionDenied(String),
    /// No alternate setting exposed a parseable flash descriptor string.
    #[error("failed to detect chip info")]
    NoChipInfo,
    /// Descriptors were found, but none described an internal flash region.
    #[error("failed to detect internal flash")]
    NoInternalFlash,

    // Pre-flight checks
    /// The image does not fit in the detected flash.
    #[error("firmware too large: {:.1} KB > {:.1} KB", kib(.firmware_bytes), kib(.flash_bytes))]
    Capacity {
        /// Total firmware bytes to be written
        firmware_bytes: u64,
        /// Detected internal flash size
        flash_bytes: u64,
    },
    /// No flash page overlaps any firmware block.
    #[error("no flash pages to erase - invalid hex file")]
    EmptyErasePlan,

    // Protocol errors
    /// The device did not reach dfuDNLOAD_IDLE after an address-pointer load.
    #[error("failed to execute address load, state={state}")]
    AddressLoad {
        /// Observed DFU state code
        state: u8,
    },
    /// A page erase ended in an unexpected state.
    #[error("failed to erase page 0x{address:08x}, state={state}")]
    Erase {
        /// Page address the erase targeted
        address: u32,
        /// Observed DFU state code
        state: u8,
    },
    /// The erase-busy recovery cycle did not land in dfuIDLE.
    #[error("failed to erase page 0x{address:08x} (did not reach dfuIDLE after clearing)")]
    EraseRecovery {
        /// Page address the erase targeted
        address: u32,
    },
    /// The device never reported dfuDNBUSY after a data download.
    #[error("failed to initiate write of {len} bytes to 0x{address:08x}, state={state}")]
    WriteStart {
        /// Chunk length in bytes
        len: usize,
        /// Address of the block being written
        address: u32,
        /// Observed DFU state code
        state: u8,
    },
    /// A data download ended in an unexpected state.
    #[error("failed to write {len} bytes to 0x{address:08x}, state={state}")]
    Write {
        /// Chunk length in bytes
        len: usize,
        /// Address of the block being written
        address: u32,
        /// Observed DFU state code
        state: u8,
    },
    /// GETSTATUS returned fewer than the required 6 bytes.
    #[error("GETSTATUS response too short ({0} bytes)")]
    ShortStatus(usize),

    // Verification errors
    /// Read-back data differs from what was written.
    #[error(
        "verification failed on byte {offset} of block {block}: expected 0x{expected:02x}, got 0x{got:02x}"
    )]
    VerifyMismatch {
        /// Index of the mismatching block
        block: usize,
        /// Byte offset of the first difference within the block
        offset: usize,
        /// Byte that was written
        expected: u8,
        /// Byte that was read back
        got: u8,
    },
    /// The device returned fewer bytes than were written to a block.
    #[error("verification failed: block {block} read back {got} bytes, expected {expected}")]
    VerifyLength {
        /// Index of the short block
        block: usize,
        /// Bytes written to the block
        expected: usize,
        /// Bytes read back
        got: usize,
    },

    // Transport errors
    /// A USB control transfer failed.
    #[error("USB transfer failed: {0}")]
    Usb(String),
}

/// Result type alias using the crate Error type.
pub type Result<T> = std::result::Result<T, Error>;

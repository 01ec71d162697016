//! DfuSe protocol engine
//!
//! Implements the subset of the USB DFU 1.1 class protocol (plus ST's DfuSe
//! extensions) needed to erase, program, and verify STM32 internal flash.
//! Commands are tunneled to the bootloader as DNLOAD transfers; after each
//! one the device is polled with GETSTATUS and, while it reports dfuDNBUSY,
//! the host sleeps the advertised poll timeout before polling again. No
//! command needs more than two polls, with one exception: parts whose
//! profile carries [`Quirks::ERASE_BUSY_RETRY`] may stay busy after an
//! erase and are recovered with a CLRSTATUS cycle.

use crate::error::Error;
use crate::quirks::Quirks;
use crate::transport::DfuTransport;
use crate::Result;

/// USB vendor ID of the STM32 bootloader.
pub const STM32_DFU_VID: u16 = 0x0483;
/// USB product ID of the STM32 bootloader.
pub const STM32_DFU_PID: u16 = 0xdf11;

/// Control-transfer timeout for every DFU request.
pub const CONTROL_TIMEOUT_MS: u32 = 5000;

/// Bytes per data-phase DNLOAD/UPLOAD transfer.
///
/// Fixed rather than read from the DFU functional descriptor's
/// wTransferSize; every supported bootloader advertises 2048.
pub const TRANSFER_SIZE: usize = 2048;

/// Data-phase transfers start at wValue 2; blocks 0 and 1 are reserved
/// for DfuSe commands.
pub const FIRST_DATA_BLOCK: u16 = 2;

/// DFU class request codes (USB DFU 1.1 table 3.2).
pub mod request {
    /// Request transition from the application to the bootloader
    pub const DETACH: u8 = 0x00;
    /// Host-to-device data or command transfer
    pub const DNLOAD: u8 = 0x01;
    /// Device-to-host data transfer
    pub const UPLOAD: u8 = 0x02;
    /// Poll status, poll timeout, and state
    pub const GETSTATUS: u8 = 0x03;
    /// Clear an error status and return to dfuIDLE
    pub const CLRSTATUS: u8 = 0x04;
    /// Poll the state byte alone
    pub const GETSTATE: u8 = 0x05;
    /// Abort a transfer in progress
    pub const ABORT: u8 = 0x06;
}

/// DFU device states (USB DFU 1.1 appendix A).
pub mod state {
    /// Application running, DFU not active
    pub const APP_IDLE: u8 = 0;
    /// Application received DETACH, awaiting reset
    pub const APP_DETACH: u8 = 1;
    /// Bootloader idle, ready for commands
    pub const DFU_IDLE: u8 = 2;
    /// Download acknowledged, status not yet polled
    pub const DFU_DNLOAD_SYNC: u8 = 3;
    /// Device busy executing a download or command
    pub const DFU_DNBUSY: u8 = 4;
    /// Download step complete, ready for the next
    pub const DFU_DNLOAD_IDLE: u8 = 5;
    /// Manifestation acknowledged, status not yet polled
    pub const DFU_MANIFEST_SYNC: u8 = 6;
    /// Device applying the downloaded image
    pub const DFU_MANIFEST: u8 = 7;
    /// Manifestation done, awaiting USB reset
    pub const DFU_MANIFEST_WAIT_RESET: u8 = 8;
    /// Upload in progress
    pub const DFU_UPLOAD_IDLE: u8 = 9;
    /// Error latched; cleared by CLRSTATUS
    pub const DFU_ERROR: u8 = 10;
}

/// DfuSe command bytes, sent as the first byte of a wValue-0 DNLOAD.
pub mod dfuse {
    /// Set the address pointer to the following little-endian u32
    pub const SET_ADDRESS: u8 = 0x21;
    /// Erase the page containing the following little-endian u32
    pub const ERASE_PAGE: u8 = 0x41;
}

/// Decoded GETSTATUS response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Status code (0 = OK)
    pub status: u8,
    /// Minimum time the host must wait before the next poll
    pub poll_timeout_ms: u32,
    /// Current DFU state
    pub state: u8,
}

fn dfuse_command(op: u8, address: u32) -> [u8; 5] {
    let a = address.to_le_bytes();
    [op, a[0], a[1], a[2], a[3]]
}

/// DfuSe protocol driver over a [`DfuTransport`].
pub struct DfuSe<T> {
    transport: T,
    quirks: Quirks,
    quirk_events: u32,
}

impl<T: DfuTransport> DfuSe<T> {
    /// Wrap a transport, applying the quirk set of the identified chip.
    pub fn new(transport: T, quirks: Quirks) -> Self {
        DfuSe {
            transport,
            quirks,
            quirk_events: 0,
        }
    }

    /// Active quirk set.
    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    /// How many times a quirk recovery path has fired.
    pub fn quirk_events(&self) -> u32 {
        self.quirk_events
    }

    /// Borrow the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Poll the device status.
    pub fn get_status(&mut self) -> Result<Status> {
        let data = self.transport.read_control(request::GETSTATUS, 0, 6)?;
        if data.len() < 6 {
            return Err(Error::ShortStatus(data.len()));
        }
        Ok(Status {
            status: data[0],
            poll_timeout_ms: u32::from(data[1])
                | u32::from(data[2]) << 8
                | u32::from(data[3]) << 16,
            state: data[4],
        })
    }

    /// Poll once; report whether the device is in dfuIDLE, sleeping out
    /// the advertised poll timeout when it is not.
    fn status_is_idle(&mut self) -> Result<bool> {
        let status = self.get_status()?;
        if status.state == state::DFU_IDLE {
            return Ok(true);
        }
        self.transport.delay_ms(status.poll_timeout_ms);
        Ok(false)
    }

    /// Drive the device to dfuIDLE, sending at most one CLRSTATUS.
    ///
    /// No-op when the device is already idle. Does not fail on an
    /// uncooperative state; the next command will.
    pub fn clear_status(&mut self) -> Result<()> {
        if self.status_is_idle()? {
            return Ok(());
        }
        self.transport.write_control(request::CLRSTATUS, 0, &[])?;
        self.status_is_idle()?;
        Ok(())
    }

    /// Set the DfuSe address pointer.
    ///
    /// A first poll that is not dfuDNBUSY is accepted as-is; after a busy
    /// wait the device must report dfuDNLOAD_IDLE.
    pub fn load_address(&mut self, address: u32) -> Result<()> {
        self.transport.write_control(
            request::DNLOAD,
            0,
            &dfuse_command(dfuse::SET_ADDRESS, address),
        )?;
        let status = self.get_status()?;
        if status.state == state::DFU_DNBUSY {
            self.transport.delay_ms(status.poll_timeout_ms);
            let status = self.get_status()?;
            if status.state != state::DFU_DNLOAD_IDLE {
                return Err(Error::AddressLoad {
                    state: status.state,
                });
            }
        }
        Ok(())
    }

    /// Erase the flash page containing `address`.
    ///
    /// Returns `true` when the erase-busy recovery fired: H743 rev V
    /// parts can stay in dfuDNBUSY past the advertised timeout, and for
    /// profiles carrying [`Quirks::ERASE_BUSY_RETRY`] a CLRSTATUS cycle
    /// landing in dfuIDLE counts as success. Without the quirk the same
    /// condition is an error.
    pub fn erase_page(&mut self, address: u32) -> Result<bool> {
        self.transport.write_control(
            request::DNLOAD,
            0,
            &dfuse_command(dfuse::ERASE_PAGE, address),
        )?;
        let status = self.get_status()?;
        if status.state != state::DFU_DNBUSY {
            return Ok(false);
        }
        self.transport.delay_ms(status.poll_timeout_ms);
        let status = self.get_status()?;
        if status.state == state::DFU_DNBUSY {
            if !self.quirks.contains(Quirks::ERASE_BUSY_RETRY) {
                return Err(Error::Erase {
                    address,
                    state: status.state,
                });
            }
            self.clear_status()?;
            let status = self.get_status()?;
            if status.state != state::DFU_IDLE {
                return Err(Error::EraseRecovery { address });
            }
            self.quirk_events += 1;
            log::debug!("erase-busy recovery applied at 0x{address:08x}");
            return Ok(true);
        }
        if status.state != state::DFU_DNLOAD_IDLE {
            return Err(Error::Erase {
                address,
                state: status.state,
            });
        }
        Ok(false)
    }

    /// Program one chunk at the current address pointer.
    ///
    /// `block_num` starts at [`FIRST_DATA_BLOCK`] and ascends per chunk;
    /// the device places the data at `pointer + (block_num - 2) *`
    /// [`TRANSFER_SIZE`]. `address` is the block start, used only in
    /// errors. The first poll must report dfuDNBUSY; a device that skips
    /// straight past it never accepted the data.
    pub fn write_chunk(&mut self, block_num: u16, address: u32, data: &[u8]) -> Result<()> {
        self.transport
            .write_control(request::DNLOAD, block_num, data)?;
        let status = self.get_status()?;
        if status.state != state::DFU_DNBUSY {
            return Err(Error::WriteStart {
                len: data.len(),
                address,
                state: status.state,
            });
        }
        self.transport.delay_ms(status.poll_timeout_ms);
        let status = self.get_status()?;
        if status.state != state::DFU_DNLOAD_IDLE {
            return Err(Error::Write {
                len: data.len(),
                address,
                state: status.state,
            });
        }
        Ok(())
    }

    /// Read back one chunk from the current address pointer. No status
    /// poll follows an upload.
    pub fn read_chunk(&mut self, block_num: u16, length: u16) -> Result<Vec<u8>> {
        self.transport
            .read_control(request::UPLOAD, block_num, length)
    }

    /// Exit DFU mode and start the application at `address`.
    ///
    /// A zero-length download after an address load is the DfuSe trigger
    /// for manifestation. The device typically drops off the bus right
    /// after, so callers treat errors from this as expected.
    pub fn leave(&mut self, address: u32) -> Result<()> {
        self.clear_status()?;
        self.load_address(address)?;
        self.transport.write_control(request::DNLOAD, 0, &[])?;
        self.get_status()?;
        Ok(())
    }
}

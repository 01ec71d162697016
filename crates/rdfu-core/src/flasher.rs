//! Flashing orchestration
//!
//! Drives a parsed firmware image onto a device in one pass: capacity
//! check, erase plan, page erases, chunked writes, full read-back verify,
//! then the leave-DFU handoff. Every stage is fatal on its first
//! unrecoverable error; the only retry anywhere is the erase-busy
//! recovery inside [`DfuSe::erase_page`]. There is no way to cancel
//! mid-flight and no partial-success result: either the whole sequence
//! completes or the device is left to be flashed again from scratch.

use crate::error::Error;
use crate::hex::FirmwareImage;
use crate::layout::FlashLayout;
use crate::plan::ErasePlan;
use crate::protocol::{DfuSe, FIRST_DATA_BLOCK, TRANSFER_SIZE};
use crate::transport::DfuTransport;
use crate::Result;

/// Observer for the erase/write/verify phases.
///
/// Totals arrive once per phase, then cumulative progress per page or
/// chunk. All methods default to no-ops.
pub trait FlashProgress {
    /// Erase phase starting, `_total_pages` pages planned.
    fn erasing(&mut self, _total_pages: usize) {}
    /// `_pages_done` pages erased so far.
    fn erase_progress(&mut self, _pages_done: usize) {}
    /// Write phase starting, `_total_bytes` to program.
    fn writing(&mut self, _total_bytes: usize) {}
    /// `_bytes_done` programmed so far.
    fn write_progress(&mut self, _bytes_done: usize) {}
    /// Verify phase starting, `_total_bytes` to read back.
    fn verifying(&mut self, _total_bytes: usize) {}
    /// `_bytes_done` read back so far.
    fn verify_progress(&mut self, _bytes_done: usize) {}
    /// All phases finished.
    fn complete(&mut self, _stats: &FlashStats) {}
}

/// Progress sink that reports nothing.
pub struct NoProgress;

impl FlashProgress for NoProgress {}

/// Totals from a completed flash operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashStats {
    /// Pages erased.
    pub pages_erased: usize,
    /// Bytes covered by the erased pages.
    pub bytes_erased: u64,
    /// Firmware bytes programmed.
    pub bytes_written: u64,
    /// Bytes read back during verification.
    pub bytes_verified: u64,
    /// Quirk recoveries that fired, typically H7 erase-busy.
    pub quirk_events: u32,
}

/// Flash `image` onto the device behind `dfu`.
///
/// Only pages overlapping the image are erased, so configuration stored
/// in other sectors survives the update. The capacity check runs before
/// the first transfer; nothing is sent to a device the image cannot fit.
pub fn flash<T: DfuTransport>(
    dfu: &mut DfuSe<T>,
    image: &FirmwareImage,
    layout: &FlashLayout,
    progress: &mut dyn FlashProgress,
) -> Result<FlashStats> {
    if image.total_bytes as u64 > u64::from(layout.total_size) {
        return Err(Error::Capacity {
            firmware_bytes: image.total_bytes as u64,
            flash_bytes: u64::from(layout.total_size),
        });
    }

    dfu.clear_status()?;

    let plan = ErasePlan::build(image, layout);
    if plan.is_empty() {
        return Err(Error::EmptyErasePlan);
    }
    log::info!(
        "erasing {} pages ({:.1} KB)",
        plan.len(),
        plan.total_bytes() as f64 / 1024.0
    );

    let mut stats = FlashStats::default();

    progress.erasing(plan.len());
    for (done, page) in plan.pages.iter().enumerate() {
        log::debug!(
            "erase page {} of sector {} at 0x{:08x}",
            page.page,
            page.sector,
            page.address
        );
        dfu.erase_page(page.address)?;
        stats.pages_erased += 1;
        stats.bytes_erased += u64::from(page.page_size);
        progress.erase_progress(done + 1);
    }

    log::info!("writing {} bytes", image.total_bytes);
    progress.writing(image.total_bytes);
    for block in &image.blocks {
        dfu.clear_status()?;
        dfu.load_address(block.address)?;

        let mut block_num = FIRST_DATA_BLOCK;
        for chunk in block.data.chunks(TRANSFER_SIZE) {
            dfu.write_chunk(block_num, block.address, chunk)?;
            block_num += 1;
            stats.bytes_written += chunk.len() as u64;
            progress.write_progress(stats.bytes_written as usize);
        }
    }

    log::info!("verifying {} bytes", image.total_bytes);
    progress.verifying(image.total_bytes);
    let mut readbacks: Vec<Vec<u8>> = Vec::with_capacity(image.blocks.len());
    for block in &image.blocks {
        // UPLOAD needs a clear after the address load where DNLOAD does not.
        dfu.clear_status()?;
        dfu.load_address(block.address)?;
        dfu.clear_status()?;

        let mut readback = Vec::with_capacity(block.len());
        let mut block_num = FIRST_DATA_BLOCK;
        for chunk in block.data.chunks(TRANSFER_SIZE) {
            let data = dfu.read_chunk(block_num, chunk.len() as u16)?;
            readback.extend_from_slice(&data);
            block_num += 1;
            stats.bytes_verified += chunk.len() as u64;
            progress.verify_progress(stats.bytes_verified as usize);
        }
        readbacks.push(readback);
    }

    for (index, block) in image.blocks.iter().enumerate() {
        let readback = &readbacks[index];
        if *readback == block.data {
            continue;
        }
        for (offset, (expected, got)) in block.data.iter().zip(readback.iter()).enumerate() {
            if expected != got {
                return Err(Error::VerifyMismatch {
                    block: index,
                    offset,
                    expected: *expected,
                    got: *got,
                });
            }
        }
        return Err(Error::VerifyLength {
            block: index,
            expected: block.len(),
            got: readback.len(),
        });
    }

    // A zero-length download at the image start reboots the device into
    // the application. It usually drops off the bus mid-handshake, so a
    // transport error here is the expected outcome, not a failure.
    if let Some(block) = image.blocks.first() {
        if let Err(e) = dfu.leave(block.address) {
            log::debug!("leave-DFU handshake cut short: {e}");
        }
    }

    stats.quirk_events = dfu.quirk_events();
    progress.complete(&stats);
    Ok(stats)
}

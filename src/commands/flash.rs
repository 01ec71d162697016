//! The `flash` command: erase, program and verify a firmware image

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rdfu_core::flasher::{self, FlashProgress, FlashStats};
use rdfu_core::hex::FirmwareImage;
use rdfu_core::protocol::{DfuSe, TRANSFER_SIZE};
use rdfu_core::quirks::ChipProfile;
use rdfu_core::Error;
use std::path::Path;

/// Create a progress bar that counts bytes
fn byte_bar(total: u64, phase: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Create a progress bar that counts flash pages
fn page_bar(total: u64, phase: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} pages ({{eta}}) {}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Progress reporter using indicatif progress bars
struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
        }
    }

    fn add_bar(&mut self, pb: ProgressBar) {
        self.current_bar = Some(self.multi.add(pb));
    }

    fn set_position(&self, pos: u64) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(pos);
        }
    }

    fn finish(&mut self, message: &str) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(message.to_string());
        }
    }
}

impl FlashProgress for IndicatifProgress {
    fn erasing(&mut self, total_pages: usize) {
        let total = total_pages as u64;
        self.add_bar(page_bar(total, "Erasing").unwrap_or_else(|_| ProgressBar::new(total)));
    }

    fn erase_progress(&mut self, pages_done: usize) {
        self.set_position(pages_done as u64);
    }

    fn writing(&mut self, total_bytes: usize) {
        self.finish("Erase complete");
        let total = total_bytes as u64;
        self.add_bar(byte_bar(total, "Writing").unwrap_or_else(|_| ProgressBar::new(total)));
    }

    fn write_progress(&mut self, bytes_done: usize) {
        self.set_position(bytes_done as u64);
    }

    fn verifying(&mut self, total_bytes: usize) {
        self.finish("Write complete");
        let total = total_bytes as u64;
        self.add_bar(byte_bar(total, "Verifying").unwrap_or_else(|_| ProgressBar::new(total)));
    }

    fn verify_progress(&mut self, bytes_done: usize) {
        self.set_position(bytes_done as u64);
    }

    fn complete(&mut self, stats: &FlashStats) {
        self.finish("Verification passed");

        println!();
        println!("✓ Programming successful");
        println!(
            "  Erased {} pages ({:.1} KB), wrote {} bytes, verified {} bytes",
            stats.pages_erased,
            stats.bytes_erased as f64 / 1024.0,
            stats.bytes_written,
            stats.bytes_verified
        );
    }
}

/// Run the flash command
pub fn flash_firmware(firmware: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading {}...", firmware.display());
    let image = FirmwareImage::parse(firmware)?;
    println!(
        "  Parsed {} blocks, {} bytes",
        image.blocks.len(),
        image.total_bytes
    );
    println!();

    let device = super::open_device()?;

    let chip_info = device.chip_info()?;
    let layout = chip_info
        .internal_flash()
        .ok_or(Error::NoInternalFlash)?
        .clone();
    let profile = ChipProfile::identify(&layout.descriptor);

    println!(
        "Flash detected: {} KB ({})",
        layout.total_size / 1024,
        profile.family
    );
    println!("Transfer size: {} bytes", TRANSFER_SIZE);
    println!();

    let mut dfu = DfuSe::new(device, profile.quirks);
    let mut progress = IndicatifProgress::new();
    let stats = flasher::flash(&mut dfu, &image, &layout, &mut progress)?;

    if stats.quirk_events > 0 {
        log::debug!("erase-busy recovery fired {} times", stats.quirk_events);
    }

    println!();
    println!("✓ Firmware flashed successfully!");
    println!("✓ Settings preserved!");
    println!();
    println!("FC will now reboot.");
    Ok(())
}

//! The `probe` command: dump DFU alternates and the parsed flash layout

use rdfu_core::layout::{ChipInfo, FlashLayout};
use rdfu_core::quirks::{ChipProfile, McuFamily};

/// Run the probe command
pub fn probe_device() -> Result<(), Box<dyn std::error::Error>> {
    let device = super::open_device()?;

    let alternates = device.alternates()?;
    println!("Alternate settings: {}", alternates.len());
    println!();
    for alt in &alternates {
        println!("Alternate {}:", alt.number);
        match &alt.descriptor {
            Some(desc) => println!("  Descriptor: {}", desc),
            None => println!("  (no string descriptor)"),
        }
    }
    println!();

    let descriptors: Vec<String> = alternates
        .iter()
        .filter_map(|a| a.descriptor.clone())
        .collect();
    let chip_info = ChipInfo::parse(&descriptors);
    if chip_info.is_empty() {
        println!("✗ No parseable memory region descriptors");
        return Ok(());
    }

    for region in &chip_info.regions {
        print_region(region);
    }

    match chip_info.internal_flash() {
        Some(flash) => {
            let profile = ChipProfile::identify(&flash.descriptor);
            if profile.family != McuFamily::Unknown {
                println!();
                println!("✓ Detected: {}", profile.family);
            }
        }
        None => {
            println!();
            println!("✗ No internal flash descriptor found");
        }
    }
    Ok(())
}

fn print_region(region: &FlashLayout) {
    println!("{}", region.memory_type);
    println!("  Start address: 0x{:08X}", region.start_address);
    println!("  Sector breakdown:");
    for sector in &region.sectors {
        println!(
            "    {} sectors × {}KB = {}KB",
            sector.num_pages,
            sector.page_size / 1024,
            sector.total_size / 1024
        );
    }
    println!("  Total: {}KB", region.total_size / 1024);
    println!();
}

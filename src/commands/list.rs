//! The `list` command: enumerate connected STM32 DFU devices

/// Run the list command
pub fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    let devices = rdfu_usb::list_devices()?;

    if devices.is_empty() {
        println!("No STM32 DFU devices found");
        println!();
        println!("Put the flight controller in DFU mode (hold BOOT while plugging in,");
        println!("or run 'rdfu reboot') and try again.");
        return Ok(());
    }

    println!("Connected STM32 DFU devices:");
    println!();
    println!(
        "{:<4} {:<5} {:<20} {:<24} {}",
        "Bus", "Addr", "Manufacturer", "Product", "Serial"
    );
    println!("{}", "-".repeat(72));

    for dev in &devices {
        println!(
            "{:<4} {:<5} {:<20} {:<24} {}",
            dev.bus,
            dev.address,
            dev.manufacturer.as_deref().unwrap_or("-"),
            dev.product.as_deref().unwrap_or("-"),
            dev.serial.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

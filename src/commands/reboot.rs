//! The `reboot` command: kick a flight controller into DFU mode
//!
//! Replays the configurator's serial handshake: `####` drops the flight
//! controller into its CLI, `dfu` reboots it into the ST bootloader. The
//! device re-enumerates as 0483:df11 a few seconds later.

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// How long to wait for the CLI prompt after sending `####`.
const PROMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long dfu-util gets to produce its device listing.
const DFU_UTIL_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the reboot command
pub fn reboot_to_dfu(port_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("Opening serial port: {}", port_name);
    let mut port = serialport::new(port_name, 115_200)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_millis(500))
        .open()?;

    // Let the port settle, then drop anything buffered from the app firmware
    std::thread::sleep(Duration::from_millis(100));
    port.clear(ClearBuffer::All)?;

    println!("Entering CLI mode...");
    port.write_all(b"####\r\n")?;
    port.flush()?;

    println!("Waiting for CLI prompt...");
    let deadline = Instant::now() + PROMPT_TIMEOUT;
    let mut received = Vec::new();
    loop {
        let waiting = port.bytes_to_read()?;
        if waiting > 0 {
            let mut chunk = vec![0u8; waiting as usize];
            let n = match port.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
                Err(e) => return Err(e.into()),
            };
            received.extend_from_slice(&chunk[..n]);

            // INAV answers with either a CLI banner or a bare "# " prompt
            if contains(&received, b"CLI") || contains(&received, b"# ") {
                println!("✓ CLI mode entered successfully");
                break;
            }
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!(
                    "no CLI prompt within {}s (received: {:?})",
                    PROMPT_TIMEOUT.as_secs(),
                    String::from_utf8_lossy(&received)
                ),
            )
            .into());
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    println!("Sending DFU reboot command...");
    port.write_all(b"dfu\r\n")?;
    port.flush()?;

    std::thread::sleep(Duration::from_millis(200));
    drop(port);
    println!("Serial connection closed");

    println!("\nWaiting for DFU device to appear (10 seconds)...");
    std::thread::sleep(Duration::from_secs(10));

    verify_dfu_mode()
}

/// Shell out to dfu-util to confirm the bootloader enumerated. Missing
/// or wedged dfu-util only skips verification; a present dfu-util that
/// cannot see the device is a failed reboot.
fn verify_dfu_mode() -> Result<(), Box<dyn std::error::Error>> {
    let mut child = match Command::new("dfu-util")
        .arg("-l")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            println!("\nNote: dfu-util not found, cannot verify DFU mode");
            println!("Install with: sudo apt install dfu-util");
            return Ok(());
        }
        Err(e) => {
            println!("\nNote: Could not verify DFU mode: {}", e);
            return Ok(());
        }
    };

    if wait_with_timeout(&mut child, DFU_UTIL_TIMEOUT)?.is_none() {
        println!(
            "\nNote: dfu-util did not answer within {}s, cannot verify DFU mode",
            DFU_UTIL_TIMEOUT.as_secs()
        );
        return Ok(());
    }

    let mut stdout = String::new();
    if let Some(out) = child.stdout.as_mut() {
        out.read_to_string(&mut stdout)?;
    }
    if stdout.contains("0483:df11") {
        println!("\n✓ SUCCESS: Flight controller is now in DFU mode\n");
        print!("{}", stdout);
        Ok(())
    } else {
        println!("\n⚠ WARNING: DFU device not detected. Check connection.");
        Err("DFU device did not enumerate as 0483:df11".into())
    }
}

/// Poll `child` until it exits or `timeout` elapses. A child that blows
/// the budget is killed, reaped, and reported as `None`.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

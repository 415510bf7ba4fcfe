//! Example: Scanning for HALO peripherals
//!
//! Runs a bounded scan and lists every advertising peripheral whose name
//! carries the product marker, together with the paired state recorded in
//! the local store.
//!
//! Run with: `cargo run --example scan_devices`

use halo_core::scan::{ScanOptions, scan_for_devices};
use halo_core::{BleAdapter, DeviceKind};
use halo_store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("Scanning for HALO devices...");
    println!();

    let adapter = BleAdapter::new().await?;
    let options = ScanOptions::default().duration_secs(10);
    let devices = scan_for_devices(&adapter, options).await?;

    if devices.is_empty() {
        println!("No HALO devices found.");
        println!();
        println!("Make sure:");
        println!("  - The device is powered on and advertising");
        println!("  - Bluetooth is enabled on this computer");
        return Ok(());
    }

    let store = Store::open_default()?;
    println!("Found {} device(s):", devices.len());
    println!();

    for device in &devices {
        let name = device.name.as_deref().unwrap_or("Unknown");
        let kind = DeviceKind::from_name(name);
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "N/A".to_string());
        let paired = match store.get_device(&device.id)? {
            Some(record) => format!("paired as {}", record.role),
            None => "unpaired".to_string(),
        };

        println!("  {} [{}]", name, kind);
        println!("    Identifier: {}", device.id);
        println!("    RSSI: {}", rssi);
        println!("    Status: {}", paired);
        println!();
    }

    Ok(())
}

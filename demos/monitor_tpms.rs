//! Scan for TPMS sensors and print every reading.
//!
//! Run with: cargo run --example monitor_tpms

use std::time::Duration;
use tpms_rust_ble::{DeviceManager, Result, SensorEventKind, SensorKey, SensorValue};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tpms_rust_ble=debug".parse().unwrap()),
        )
        .init();

    println!("Scanning for TPMS sensors...\n");

    let manager = DeviceManager::new().await?;

    let _handle = manager.on_sensor_event(|event| match event.kind {
        SensorEventKind::Metadata { name, .. } => {
            println!("[{}] matched {}", event.identifier, name);
        }
        SensorEventKind::DisplayName(title) => {
            println!("[{}] {}", event.identifier, title);
        }
        SensorEventKind::Sensor {
            key: SensorKey::Pressure,
            value: SensorValue::Float(psi),
            ..
        } => {
            println!(
                "  Pressure: {:.1} psi ({:.2} bar)",
                psi,
                tpms_rust_ble::psi_to_bar(psi)
            );
        }
        SensorEventKind::Sensor {
            name, value, unit, ..
        } => {
            println!("  {}: {} {}", name, value, unit.unwrap_or(""));
        }
    });

    manager.start_scanning().await?;

    println!("Listening for 60 seconds. Press Ctrl+C to exit early.\n");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(60)) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted!");
        }
    }

    println!("\nTracked sensors: {}", manager.device_count());
    for (id, device) in manager.devices() {
        println!(
            "  {} - {:?} ({}, {})",
            id,
            device.device_name(),
            device.state(),
            device.connection_state()
        );
    }

    manager.shutdown().await?;

    Ok(())
}

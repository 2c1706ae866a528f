// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # tpms-rust-ble
//!
//! A Rust library for reading tire pressure monitoring (TPMS) sensors that
//! stream over a Bluetooth Low Energy UART-style service.
//!
//! Supported receivers advertise as `TYREDOG`, `JDY-08`, `Realtek` or
//! `RB8762` together with the UART service. After a short handshake they
//! stream 16-character ASCII frames carrying pressure, temperature and
//! battery state for each wheel sensor.
//!
//! ## Features
//!
//! - **Frame Decoding**: Pure decoder for notification frames ([`protocol::decode`])
//! - **Session Driver**: Advertisement matching and the subscribe/command
//!   handshake ([`DeviceSession`])
//! - **Host Sinks**: Publish readings through the [`SensorSink`] trait
//! - **btleplug Backend**: Scanning, connecting and streaming from real sensors
//!   ([`DeviceManager`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tpms_rust_ble::{DeviceManager, Result, SensorEventKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = DeviceManager::new().await?;
//!
//!     let _handle = manager.on_sensor_event(|event| {
//!         if let SensorEventKind::Sensor { name, value, unit, .. } = event.kind {
//!             println!("{}: {} {}", name, value, unit.unwrap_or(""));
//!         }
//!     });
//!
//!     manager.start_scanning().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Decoding Without Bluetooth
//!
//! ```
//! use tpms_rust_ble::protocol::decode;
//!
//! let reading = decode(b"$A00002831E3C00#").unwrap();
//! assert_eq!(reading.sensor_index, 3);
//! assert_eq!(reading.pressure_psi, 483.5);
//! assert_eq!(reading.temperature_celsius, 20);
//! assert_eq!(reading.battery_percent(), 20);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod device_manager;
pub mod error;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod utils;

// Re-exports for convenience
pub use config::{ManagerConfig, SessionConfig};
pub use device_manager::{CallbackHandle, DeviceManager, SensorSession, TpmsDevice};
pub use error::{Error, Result};
pub use session::{CharacteristicPair, DeviceSession, SessionState};
pub use sink::{
    BinarySensorKey, ChannelSink, SensorEvent, SensorEventKind, SensorKey, SensorSink,
    SensorValue,
};
pub use utils::{celsius_to_fahrenheit, psi_to_bar, psi_to_kpa};

// Re-export commonly used types from submodules
pub use ble::{Advertisement, CharacteristicDescriptor, ConnectionState, Transport};
pub use protocol::{BatteryLevel, DecodedReading, FrameRejection};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _ = std::any::TypeId::of::<DeviceManager>();
        let _ = std::any::TypeId::of::<SensorSession>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<DecodedReading>();
        let _ = std::any::TypeId::of::<Advertisement>();
        let _ = std::any::TypeId::of::<ChannelSink>();
    }
}

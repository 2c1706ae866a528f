//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy side of the crate: UUIDs,
//! advertisement types, the [`Transport`] seam and its `btleplug`
//! implementation.

pub mod advertising;
pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use advertising::{Advertisement, CharacteristicDescriptor};
pub use characteristics::CharacteristicHandler;
pub use connection::{ConnectionManager, ConnectionState};
pub use scanner::{BleScanner, DiscoveryEvent};
pub use transport::{NotificationCallback, Transport};
pub use uuids::*;

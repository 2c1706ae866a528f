//! Error types for the tpms-rust-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Operation requires a connection but the sensor is not connected.
    #[error("Sensor not connected")]
    NotConnected,

    /// Failed to establish a connection to the sensor.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::CharacteristicNotFound {
            uuid: "6e400003-b5a3-f393-e0a9-e50e24dcca9e".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Characteristic not found: 6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }

    #[test]
    fn test_connection_errors_display() {
        assert_eq!(Error::NotConnected.to_string(), "Sensor not connected");
        let err = Error::ConnectionFailed {
            reason: "timed out".to_string(),
        };
        assert_eq!(err.to_string(), "Connection failed: timed out");
    }
}

//! BLE connection management.
//!
//! Connects to a sensor and discovers its services. Reconnection is left to
//! the caller.

use btleplug::api::Peripheral as _;
use btleplug::platform::Peripheral;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// Connection state for a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected to the sensor.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected to the sensor.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Manages the connection to one sensor.
pub struct ConnectionManager {
    /// The peripheral to manage.
    peripheral: Peripheral,
    /// Current connection state.
    state: Arc<RwLock<ConnectionState>>,
}

impl ConnectionManager {
    /// Create a new connection manager for a peripheral.
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Connect to the sensor and discover its services.
    ///
    /// A single attempt is made.
    pub async fn connect(&self) -> Result<()> {
        let current_state = self.state();

        if current_state.is_connected() {
            debug!("Already connected");
            return Ok(());
        }

        if current_state.is_transitioning() {
            return Err(Error::ConnectionFailed {
                reason: "Connection already in progress".to_string(),
            });
        }

        self.set_state(ConnectionState::Connecting);

        if !self.peripheral.is_connected().await.unwrap_or(false) {
            if let Err(e) = self.peripheral.connect().await {
                warn!("Connection attempt failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                return Err(Error::ConnectionFailed {
                    reason: e.to_string(),
                });
            }
        } else {
            info!("Peripheral already connected at BLE level");
        }

        if let Err(e) = self.peripheral.discover_services().await {
            warn!("Failed to discover services: {}", e);
            self.set_state(ConnectionState::Disconnected);
            return Err(Error::Bluetooth(e));
        }

        info!("Connected to sensor {}", self.peripheral.id());
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Disconnect from the sensor.
    pub async fn disconnect(&self) -> Result<()> {
        let current_state = self.state();

        if matches!(
            current_state,
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            return Ok(());
        }

        self.set_state(ConnectionState::Disconnecting);

        let result = self.peripheral.disconnect().await;
        self.set_state(ConnectionState::Disconnected);

        match result {
            Ok(_) => {
                info!("Disconnected from sensor {}", self.peripheral.id());
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                Err(Error::Bluetooth(e))
            }
        }
    }

    fn set_state(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);

        if old_state != new_state {
            debug!(
                "Sensor {} connection: {} -> {}",
                self.peripheral.id(),
                old_state,
                new_state
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Disconnecting.is_transitioning());
        assert!(!ConnectionState::Connected.is_transitioning());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::default().to_string(), "Disconnected");
    }
}

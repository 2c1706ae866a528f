//! GATT characteristic handling.
//!
//! Provides the `btleplug` backed [`Transport`] used for real sensors.

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::ble::advertising::CharacteristicDescriptor;
use crate::ble::transport::{NotificationCallback, Transport};
use crate::error::{Error, Result};

/// Handler for GATT characteristics on a sensor.
pub struct CharacteristicHandler {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Cached characteristics by UUID.
    characteristics: Arc<RwLock<BTreeMap<Uuid, Characteristic>>>,
    /// Notification callbacks by characteristic UUID.
    callbacks: Arc<RwLock<HashMap<Uuid, NotificationCallback>>>,
    /// Whether we're currently listening for notifications.
    is_listening: Arc<RwLock<bool>>,
    /// Handle to the notification listener task.
    listener_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl CharacteristicHandler {
    /// Create a new characteristic handler for a peripheral.
    ///
    /// Note: Services must be discovered before using this handler.
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            characteristics: Arc::new(RwLock::new(BTreeMap::new())),
            callbacks: Arc::new(RwLock::new(HashMap::new())),
            is_listening: Arc::new(RwLock::new(false)),
            listener_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Discover and cache all characteristics.
    ///
    /// This should be called after connecting and discovering services.
    pub fn discover_characteristics(&self) {
        let services = self.peripheral.services();

        let mut chars = self.characteristics.write();
        chars.clear();

        for service in services {
            for characteristic in service.characteristics {
                debug!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid, service.uuid
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", chars.len());
    }

    /// Descriptors for every cached characteristic.
    pub fn descriptors(&self) -> Vec<CharacteristicDescriptor> {
        self.characteristics
            .read()
            .values()
            .map(|c| CharacteristicDescriptor::new(c.uuid, c.service_uuid))
            .collect()
    }

    /// Check if a characteristic exists.
    pub fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.characteristics.read().contains_key(uuid)
    }

    /// Stop listening for notifications and drop all callbacks.
    pub async fn stop_notifications(&self) {
        *self.is_listening.write() = false;
        self.callbacks.write().clear();

        let handle = self.listener_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.peripheral.is_connected().await? {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn lookup(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Start the listener task that routes notifications to callbacks.
    fn ensure_listener(&self) {
        {
            let mut is_listening = self.is_listening.write();
            if *is_listening {
                return;
            }
            *is_listening = true;
        }

        let peripheral = self.peripheral.clone();
        let is_listening = self.is_listening.clone();
        let callbacks = self.callbacks.clone();

        let handle = tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    *is_listening.write() = false;
                    return;
                }
            };

            debug!("Notification listener started");

            while *is_listening.read() {
                tokio::select! {
                    notification = notifications.next() => {
                        let Some(notification) = notification else {
                            debug!("Notification stream ended");
                            break;
                        };

                        trace!(
                            "Notification from {}: {:02X?}",
                            notification.uuid,
                            notification.value
                        );

                        let callback = callbacks.read().get(&notification.uuid).cloned();
                        match callback {
                            Some(callback) => callback(&notification.value),
                            None => trace!("No callback for {}", notification.uuid),
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }

            *is_listening.write() = false;
            debug!("Notification listener stopped");
        });

        *self.listener_handle.write() = Some(handle);
    }
}

#[async_trait]
impl Transport for CharacteristicHandler {
    async fn subscribe(
        &self,
        characteristic: &CharacteristicDescriptor,
        callback: NotificationCallback,
    ) -> Result<()> {
        let target = self.lookup(&characteristic.uuid)?;
        self.ensure_connected().await?;

        self.callbacks.write().insert(characteristic.uuid, callback);
        self.ensure_listener();

        if let Err(e) = self.peripheral.subscribe(&target).await {
            warn!("Failed to subscribe to {}: {}", characteristic.uuid, e);
            self.callbacks.write().remove(&characteristic.uuid);
            return Err(Error::Bluetooth(e));
        }

        debug!("Subscribed to notifications from {}", characteristic.uuid);

        Ok(())
    }

    async fn write(
        &self,
        characteristic: &CharacteristicDescriptor,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let target = self.lookup(&characteristic.uuid)?;
        self.ensure_connected().await?;

        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.peripheral
            .write(&target, data, write_type)
            .await
            .map_err(Error::Bluetooth)?;

        trace!(
            "Wrote {} bytes to characteristic {}",
            data.len(),
            characteristic.uuid
        );

        Ok(())
    }
}

impl Drop for CharacteristicHandler {
    fn drop(&mut self) {
        *self.is_listening.write() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_is_transport() {
        fn assert_transport<T: Transport + 'static>() {}
        assert_transport::<CharacteristicHandler>();
        assert_transport::<Arc<CharacteristicHandler>>();
    }
}

//! BLE scanning for TPMS receivers.
//!
//! The scanner only filters on the advertised local name. Service matching
//! happens in the session once the peripheral's services are known, since
//! many receivers leave the UART service out of their advertising packets.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use crate::ble::advertising::Advertisement;
use crate::ble::uuids::is_target_name;
use crate::error::{Error, Result};

/// Capacity of the discovery channel.
const DISCOVERY_CHANNEL_CAPACITY: usize = 100;

/// A peripheral with a supported name was seen.
#[derive(Debug, Clone)]
pub struct DiscoveryEvent {
    /// The BLE peripheral identifier.
    pub identifier: String,
    /// The peripheral handle.
    pub peripheral: Peripheral,
    /// Advertised name and services. Characteristics are not known yet.
    pub advertisement: Advertisement,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// Build the advertisement for a peripheral, if its local name is supported.
pub fn target_advertisement(
    local_name: Option<String>,
    services: impl IntoIterator<Item = Uuid>,
) -> Option<Advertisement> {
    let name = local_name.filter(|name| is_target_name(name))?;
    Some(Advertisement::new(name, services))
}

/// Peripheral whose advertising data changed, if the event carries one.
fn advertised_peripheral(event: &CentralEvent) -> Option<&PeripheralId> {
    match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ServicesAdvertisement { id, .. } => Some(id),
        CentralEvent::DeviceDisconnected(id) => {
            debug!("Peripheral disconnected: {:?}", id);
            None
        }
        _ => None,
    }
}

/// Scanner broadcasting [`DiscoveryEvent`]s for supported receivers.
pub struct BleScanner {
    adapter: Adapter,
    event_tx: broadcast::Sender<DiscoveryEvent>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl BleScanner {
    /// Create a scanner on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_| Error::BluetoothUnavailable)?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a scanner on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        let (event_tx, _) = broadcast::channel(DISCOVERY_CHANNEL_CAPACITY);

        Self {
            adapter,
            event_tx,
            scan_task: Mutex::new(None),
        }
    }

    /// Start scanning. Does nothing if a scan is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter refuses to scan.
    pub async fn start_scanning(&self) -> Result<()> {
        if self.is_scanning() {
            debug!("Already scanning");
            return Ok(());
        }

        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("Scanning for TPMS receivers");

        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Some(id) = advertised_peripheral(&event) else {
                    continue;
                };
                if let Some(discovery) = Self::discover(&adapter, id).await {
                    // No receivers is fine.
                    let _ = event_tx.send(discovery);
                }
            }
            error!("Adapter event stream ended");
        });

        *self.scan_task.lock() = Some(task);

        Ok(())
    }

    /// Stop scanning.
    pub async fn stop_scanning(&self) -> Result<()> {
        let Some(task) = self.scan_task.lock().take() else {
            return Ok(());
        };

        info!("Stopping BLE scan");
        task.abort();
        self.adapter.stop_scan().await?;

        Ok(())
    }

    /// Check if a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scan_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Subscribe to discovery events.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    async fn discover(adapter: &Adapter, id: &PeripheralId) -> Option<DiscoveryEvent> {
        let peripheral = match adapter.peripheral(id).await {
            Ok(peripheral) => peripheral,
            Err(e) => {
                trace!("Peripheral {:?} unavailable: {}", id, e);
                return None;
            }
        };

        let properties = peripheral.properties().await.ok().flatten()?;
        let advertisement = target_advertisement(properties.local_name, properties.services)?;

        trace!("Seen {} ({:?})", advertisement.name, id);

        Some(DiscoveryEvent {
            identifier: id.to_string(),
            peripheral,
            advertisement,
            rssi: properties.rssi,
        })
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        if let Some(task) = self.scan_task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::TPMS_SERVICE_UUID;

    #[test]
    fn test_target_advertisement() {
        let advertisement =
            target_advertisement(Some("TYREDOG".to_string()), vec![TPMS_SERVICE_UUID]).unwrap();
        assert_eq!(advertisement.name, "TYREDOG");
        assert!(advertisement.is_tpms());
        assert!(advertisement.characteristics.is_empty());

        // Name alone is enough to be reported.
        let advertisement =
            target_advertisement(Some("JDY-08".to_string()), Vec::<Uuid>::new()).unwrap();
        assert!(!advertisement.is_tpms());
    }

    #[test]
    fn test_target_advertisement_filters_names() {
        assert!(target_advertisement(None, vec![TPMS_SERVICE_UUID]).is_none());
        assert!(
            target_advertisement(Some("Nordic_UART".to_string()), vec![TPMS_SERVICE_UUID])
                .is_none()
        );
        assert!(target_advertisement(Some("realtek".to_string()), Vec::<Uuid>::new()).is_none());
    }

    #[test]
    fn test_discovery_event_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<DiscoveryEvent>();
    }
}

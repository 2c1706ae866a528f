//! Device manager for discovering and streaming from TPMS sensors.
//!
//! This module ties the BLE scanner to one [`DeviceSession`] per sensor:
//! discovered peripherals with a supported name are connected, their
//! characteristics discovered and the resulting advertisement fed to the
//! session, which performs the stream handshake. Readings from every sensor
//! are re-broadcast as [`SensorEvent`]s.

use btleplug::api::Peripheral as _;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ble::characteristics::CharacteristicHandler;
use crate::ble::connection::{ConnectionManager, ConnectionState};
use crate::ble::scanner::{BleScanner, DiscoveryEvent};
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::session::{DeviceSession, SessionState};
use crate::sink::{ChannelSink, SensorEvent};

/// Session type used for sensors managed by [`DeviceManager`].
pub type SensorSession = DeviceSession<CharacteristicHandler, ChannelSink>;

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Result of offering a discovered peripheral to a [`DeviceRegistry`].
#[derive(Debug)]
pub(crate) enum Admission<D> {
    /// Newly tracked; the caller starts it.
    Admitted(Arc<D>),
    /// Already tracked.
    Tracked,
    /// Connected before and found not to be a sensor.
    Rejected,
    /// The device limit is reached.
    Full,
}

/// What happens to a tracked device once its start attempt finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartOutcome {
    /// The handshake went through.
    Keep,
    /// Start failed; a later advertisement may try again.
    Forget,
    /// Connected, but the session never matched a sensor with both
    /// characteristics. Never tried again.
    Reject,
}

impl StartOutcome {
    pub(crate) fn of(result: &Result<()>, state: SessionState) -> Self {
        match result {
            Err(_) => Self::Forget,
            Ok(()) if state.is_handshake_issued() => Self::Keep,
            Ok(()) => Self::Reject,
        }
    }
}

/// Tracked devices keyed by BLE identifier, bounded by a device limit.
#[derive(Debug)]
pub(crate) struct DeviceRegistry<D> {
    devices: RwLock<HashMap<String, Arc<D>>>,
    rejected: RwLock<HashSet<String>>,
    max_devices: usize,
}

impl<D> DeviceRegistry<D> {
    pub(crate) fn new(max_devices: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            rejected: RwLock::new(HashSet::new()),
            max_devices,
        }
    }

    /// Track `identifier`, building the device with `make` only when admitted.
    pub(crate) fn admit(&self, identifier: &str, make: impl FnOnce() -> D) -> Admission<D> {
        if self.rejected.read().contains(identifier) {
            return Admission::Rejected;
        }

        let mut devices = self.devices.write();
        if devices.contains_key(identifier) {
            return Admission::Tracked;
        }
        if devices.len() >= self.max_devices {
            return Admission::Full;
        }

        let device = Arc::new(make());
        devices.insert(identifier.to_string(), device.clone());
        Admission::Admitted(device)
    }

    /// Apply a start outcome. Returns the device when it must be released.
    pub(crate) fn settle(&self, identifier: &str, outcome: StartOutcome) -> Option<Arc<D>> {
        match outcome {
            StartOutcome::Keep => None,
            StartOutcome::Forget => self.devices.write().remove(identifier),
            StartOutcome::Reject => {
                self.rejected.write().insert(identifier.to_string());
                self.devices.write().remove(identifier)
            }
        }
    }

    pub(crate) fn get(&self, identifier: &str) -> Option<Arc<D>> {
        self.devices.read().get(identifier).cloned()
    }

    pub(crate) fn snapshot(&self) -> HashMap<String, Arc<D>> {
        self.devices.read().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<D>> {
        self.devices.write().drain().map(|(_, d)| d).collect()
    }
}

/// A sensor tracked by the manager.
pub struct TpmsDevice {
    identifier: String,
    connection: ConnectionManager,
    session: SensorSession,
}

impl TpmsDevice {
    fn new(
        event: &DiscoveryEvent,
        event_tx: broadcast::Sender<SensorEvent>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            identifier: event.identifier.clone(),
            connection: ConnectionManager::new(event.peripheral.clone()),
            session: DeviceSession::with_config(
                CharacteristicHandler::new(event.peripheral.clone()),
                ChannelSink::new(event.identifier.clone(), event_tx),
                config.session,
            ),
        }
    }

    /// BLE identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Advertised device name, once matched.
    pub fn device_name(&self) -> Option<String> {
        self.session.device_name()
    }

    /// The device's session.
    pub fn session(&self) -> &SensorSession {
        &self.session
    }

    /// Connect, discover characteristics and feed the session.
    ///
    /// Returns `Ok` without a handshake when the peripheral turns out not to
    /// be a sensor; check [`state`](Self::state) afterwards.
    async fn start(&self, event: &DiscoveryEvent) -> Result<()> {
        self.connection.connect().await?;

        let handler = self.session.transport();
        handler.discover_characteristics();

        let mut advertisement = event
            .advertisement
            .clone()
            .with_characteristics(handler.descriptors());
        advertisement
            .service_uuids
            .extend(event.peripheral.services().iter().map(|s| s.uuid));

        match self.session.handle_advertisement(&advertisement) {
            Some(handshake) => handshake
                .await
                .map_err(|e| Error::Internal(format!("handshake task failed: {}", e)))?,
            None => {
                debug!(
                    "Peripheral {} did not match a TPMS sensor (state {})",
                    self.identifier,
                    self.session.state()
                );
                Ok(())
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        self.session.transport().stop_notifications().await;
        self.connection.disconnect().await
    }
}

impl std::fmt::Debug for TpmsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TpmsDevice")
            .field("identifier", &self.identifier)
            .field("state", &self.state())
            .field("connection_state", &self.connection_state())
            .finish()
    }
}

/// Central manager for discovering TPMS sensors and streaming their readings.
pub struct DeviceManager {
    /// BLE scanner.
    scanner: Arc<BleScanner>,
    /// Tracked sensors by BLE identifier.
    devices: Arc<DeviceRegistry<TpmsDevice>>,
    /// Sensor event channel shared by all sessions.
    event_tx: broadcast::Sender<SensorEvent>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Background task handle.
    background_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
    /// Running flag.
    is_running: Arc<AtomicBool>,
    /// Configuration.
    config: ManagerConfig,
}

impl DeviceManager {
    /// Create a new DeviceManager with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        Self::with_config(ManagerConfig::default()).await
    }

    /// Create a new DeviceManager.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn with_config(config: ManagerConfig) -> Result<Self> {
        let scanner = BleScanner::new().await?;
        let (event_tx, _) = broadcast::channel(256);

        Ok(Self {
            scanner: Arc::new(scanner),
            devices: Arc::new(DeviceRegistry::new(config.max_devices)),
            event_tx,
            callback_counter: AtomicU64::new(0),
            background_handle: RwLock::new(None),
            is_running: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Start scanning for sensors.
    pub async fn start_scanning(&self) -> Result<()> {
        if self.is_running.load(Ordering::SeqCst) {
            debug!("Already scanning");
            return Ok(());
        }

        info!("Starting device manager scanning");

        self.scanner.start_scanning().await?;
        self.is_running.store(true, Ordering::SeqCst);

        let devices = self.devices.clone();
        let event_tx = self.event_tx.clone();
        let is_running = self.is_running.clone();
        let config = self.config;

        let mut rx = self.scanner.subscribe();

        let handle = tokio::spawn(async move {
            while is_running.load(Ordering::SeqCst) {
                match rx.recv().await {
                    Ok(event) => {
                        Self::handle_discovery_event(event, &devices, &event_tx, config);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Skipped {} discovery events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            debug!("Device manager background task ended");
        });

        *self.background_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop scanning for sensors. Active sessions keep streaming.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Ok(());
        }

        info!("Stopping device manager scanning");

        self.is_running.store(false, Ordering::SeqCst);
        self.scanner.stop_scanning().await?;

        let handle = self.background_handle.write().take();
        if let Some(handle) = handle {
            handle.abort();
        }

        Ok(())
    }

    /// Get all tracked sensors.
    pub fn devices(&self) -> HashMap<String, Arc<TpmsDevice>> {
        self.devices.snapshot()
    }

    /// Get a tracked sensor by BLE identifier.
    pub fn get_device(&self, identifier: &str) -> Option<Arc<TpmsDevice>> {
        self.devices.get(identifier)
    }

    /// Get the number of tracked sensors.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Check if scanning is active.
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Subscribe to sensor events from every session.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SensorEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for sensor events.
    pub fn on_sensor_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(SensorEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Sensor event callback lagged by {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Clean shutdown of all connections and scanning.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down device manager");

        self.stop_scanning().await?;

        for device in self.devices.drain() {
            if let Err(e) = device.stop().await {
                warn!("Error disconnecting sensor {}: {}", device.identifier(), e);
            }
        }

        Ok(())
    }

    /// Handle a discovery event from the scanner.
    ///
    /// New sensors are tracked and started on their own task so the scanner
    /// loop never waits on a connection. Peripherals that fail to start are
    /// forgotten; those that connect but are not sensors are released and
    /// ignored from then on.
    fn handle_discovery_event(
        event: DiscoveryEvent,
        devices: &Arc<DeviceRegistry<TpmsDevice>>,
        event_tx: &broadcast::Sender<SensorEvent>,
        config: ManagerConfig,
    ) {
        let identifier = event.identifier.clone();

        let device = match devices.admit(&identifier, || {
            TpmsDevice::new(&event, event_tx.clone(), config)
        }) {
            Admission::Admitted(device) => device,
            Admission::Tracked | Admission::Rejected => return,
            Admission::Full => {
                debug!(
                    "Maximum device count ({}) reached, ignoring {}",
                    config.max_devices, identifier
                );
                return;
            }
        };

        info!(
            "Discovered {} ({}, RSSI {:?})",
            event.advertisement.name, identifier, event.rssi
        );

        let devices = devices.clone();
        tokio::spawn(async move {
            let result = device.start(&event).await;
            if let Err(e) = &result {
                warn!("Failed to start sensor {}: {}", identifier, e);
            }

            let outcome = StartOutcome::of(&result, device.state());
            if outcome == StartOutcome::Reject {
                info!("{} is not a TPMS sensor, releasing it", identifier);
            }

            if let Some(device) = devices.settle(&identifier, outcome) {
                if let Err(e) = device.stop().await {
                    debug!("Error releasing {}: {}", identifier, e);
                }
            }
        });
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_callback_handle_unregisters_once() {
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let handle = CallbackHandle::new(7, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(handle.id(), 7);
        handle.unregister();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = calls.clone();
        drop(CallbackHandle::new(8, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn registry(max_devices: usize) -> DeviceRegistry<String> {
        DeviceRegistry::new(max_devices)
    }

    fn admitted(admission: Admission<String>) -> Arc<String> {
        match admission {
            Admission::Admitted(device) => device,
            other => panic!("expected admission, got {:?}", other),
        }
    }

    #[test]
    fn test_registry_tracks_each_identifier_once() {
        let devices = registry(8);

        let first = admitted(devices.admit("AA:01", || "first".to_string()));
        assert_eq!(*first, "first");

        let mut built = false;
        let again = devices.admit("AA:01", || {
            built = true;
            "second".to_string()
        });
        assert!(matches!(again, Admission::Tracked));
        assert!(!built);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices.get("AA:01").as_deref().map(String::as_str), Some("first"));
    }

    #[test]
    fn test_registry_respects_device_limit() {
        let devices = registry(2);
        admitted(devices.admit("AA:01", String::new));
        admitted(devices.admit("AA:02", String::new));

        assert!(matches!(devices.admit("AA:03", String::new), Admission::Full));
        assert_eq!(devices.len(), 2);

        // A freed slot can be reused.
        assert!(devices.settle("AA:01", StartOutcome::Forget).is_some());
        admitted(devices.admit("AA:03", String::new));
    }

    #[test]
    fn test_registry_forgets_failed_start() {
        let devices = registry(8);
        admitted(devices.admit("AA:01", String::new));

        let result: Result<()> = Err(Error::ConnectionFailed {
            reason: "timed out".to_string(),
        });
        let outcome = StartOutcome::of(&result, SessionState::Idle);
        assert_eq!(outcome, StartOutcome::Forget);

        assert!(devices.settle("AA:01", outcome).is_some());
        assert_eq!(devices.len(), 0);
        assert!(devices.snapshot().is_empty());

        // Rediscovery starts over.
        admitted(devices.admit("AA:01", String::new));
    }

    #[test]
    fn test_registry_releases_non_sensors() {
        let devices = registry(1);

        for state in [SessionState::Idle, SessionState::Matched] {
            assert_eq!(StartOutcome::of(&Ok(()), state), StartOutcome::Reject);
        }

        admitted(devices.admit("AA:01", String::new));
        let outcome = StartOutcome::of(&Ok(()), SessionState::Idle);
        assert!(devices.settle("AA:01", outcome).is_some());

        // The slot is free for a real sensor and the gadget stays ignored.
        assert!(matches!(
            devices.admit("AA:01", String::new),
            Admission::Rejected
        ));
        admitted(devices.admit("AA:02", String::new));
    }

    #[test]
    fn test_registry_keeps_streaming_sensors() {
        let devices = registry(8);
        admitted(devices.admit("AA:01", String::new));

        for state in [SessionState::HandshakeSent, SessionState::Streaming] {
            let outcome = StartOutcome::of(&Ok(()), state);
            assert_eq!(outcome, StartOutcome::Keep);
            assert!(devices.settle("AA:01", outcome).is_none());
        }
        assert_eq!(devices.len(), 1);

        // Handshake errors leave the session in HandshakeSent.
        let result: Result<()> = Err(Error::NotConnected);
        assert_eq!(
            StartOutcome::of(&result, SessionState::HandshakeSent),
            StartOutcome::Forget
        );

        assert_eq!(devices.drain().len(), 1);
        assert_eq!(devices.len(), 0);
    }

    #[test]
    fn test_sensor_session_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SensorSession>();
        assert_send_sync::<TpmsDevice>();
    }
}

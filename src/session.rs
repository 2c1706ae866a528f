//! Per-device session driving the stream handshake.
//!
//! A [`DeviceSession`] moves through [`SessionState`]:
//!
//! - `Idle`: nothing matched yet.
//! - `Matched`: a TPMS advertisement was seen; characteristics are being
//!   collected.
//! - `HandshakeSent`: both characteristics are known and the handshake task
//!   has been issued. This happens at most once per session.
//! - `Streaming`: the first notification arrived after the handshake.
//!
//! There is no error or terminal state. A session that never matches stays
//! `Idle`.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::advertising::{Advertisement, CharacteristicDescriptor};
use crate::ble::transport::{NotificationCallback, Transport};
use crate::ble::uuids::{TPMS_NOTIFY_UUID, TPMS_WRITE_UUID};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::protocol::{self, DecodedReading, START_STREAM_COMMAND};
use crate::sink::{SensorKey, SensorSink, SensorValue};

/// Manufacturer reported for every matched device.
pub const MANUFACTURER: &str = "TPMS";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No matching advertisement seen.
    #[default]
    Idle,
    /// Matching advertisement seen, handshake not issued.
    Matched,
    /// Handshake issued.
    HandshakeSent,
    /// Notifications are arriving.
    Streaming,
}

impl SessionState {
    /// Check if the handshake has been issued.
    pub fn is_handshake_issued(&self) -> bool {
        matches!(self, Self::HandshakeSent | Self::Streaming)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Matched => write!(f, "Matched"),
            Self::HandshakeSent => write!(f, "HandshakeSent"),
            Self::Streaming => write!(f, "Streaming"),
        }
    }
}

/// The notify and write characteristics of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicPair {
    /// Characteristic delivering frames.
    pub notify: Option<CharacteristicDescriptor>,
    /// Characteristic accepting commands.
    pub write: Option<CharacteristicDescriptor>,
}

impl CharacteristicPair {
    /// Record the notify and write characteristics found in `advertisement`.
    ///
    /// Later descriptors win. Characteristics absent from the advertisement
    /// keep their previous value.
    pub fn capture(&mut self, advertisement: &Advertisement) {
        for characteristic in &advertisement.characteristics {
            if characteristic.uuid == TPMS_NOTIFY_UUID {
                self.notify = Some(*characteristic);
            } else if characteristic.uuid == TPMS_WRITE_UUID {
                self.write = Some(*characteristic);
            }
        }
    }

    /// Both characteristics, once known.
    pub fn complete(&self) -> Option<(CharacteristicDescriptor, CharacteristicDescriptor)> {
        self.notify.zip(self.write)
    }

    /// Check if both characteristics are known.
    pub fn is_complete(&self) -> bool {
        self.complete().is_some()
    }
}

#[derive(Debug, Default)]
struct SessionInner {
    state: SessionState,
    characteristics: CharacteristicPair,
    device_name: Option<String>,
}

/// Session for a single TPMS receiver.
///
/// Advertisements are fed through [`handle_advertisement`](Self::handle_advertisement),
/// which is the only path that writes the characteristic pair. Notifications
/// may arrive concurrently from any task.
pub struct DeviceSession<T, S> {
    transport: Arc<T>,
    sink: Arc<S>,
    inner: Arc<RwLock<SessionInner>>,
    config: SessionConfig,
}

impl<T, S> DeviceSession<T, S>
where
    T: Transport + 'static,
    S: SensorSink + 'static,
{
    /// Create a session with default handshake timing.
    pub fn new(transport: T, sink: S) -> Self {
        Self::with_config(transport, sink, SessionConfig::default())
    }

    /// Create a session with custom handshake timing.
    pub fn with_config(transport: T, sink: S, config: SessionConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            sink: Arc::new(sink),
            inner: Arc::new(RwLock::new(SessionInner::default())),
            config,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    /// Get the characteristics captured so far.
    pub fn characteristics(&self) -> CharacteristicPair {
        self.inner.read().characteristics
    }

    /// Name of the matched device.
    pub fn device_name(&self) -> Option<String> {
        self.inner.read().device_name.clone()
    }

    /// Get the handshake timing.
    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Get the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Get the sink.
    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    /// Process one advertisement.
    ///
    /// Advertisements that are not from a supported sensor are ignored. A
    /// matching one publishes device metadata and captures characteristics.
    /// When that completes the characteristic pair, the handshake is spawned
    /// on the Tokio runtime and its handle returned; transport failures are
    /// reported through that handle. Once the handshake has been issued,
    /// further advertisements are ignored.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn handle_advertisement(
        &self,
        advertisement: &Advertisement,
    ) -> Option<JoinHandle<Result<()>>> {
        let pair = {
            let mut inner = self.inner.write();

            if inner.state.is_handshake_issued() {
                trace!("Handshake already issued, ignoring advertisement");
                return None;
            }

            if !advertisement.is_tpms() {
                trace!("Ignoring advertisement from {:?}", advertisement.name);
                return None;
            }

            if inner.state == SessionState::Idle {
                info!("Matched TPMS sensor {}", advertisement.name);
                inner.state = SessionState::Matched;
            }

            inner.device_name = Some(advertisement.name.clone());
            inner.characteristics.capture(advertisement);

            let pair = inner.characteristics.complete();
            if pair.is_some() {
                inner.state = SessionState::HandshakeSent;
            }
            pair
        };

        self.sink
            .set_device_metadata(MANUFACTURER, &advertisement.name, &advertisement.name);

        let (notify, write) = pair?;
        Some(self.spawn_handshake(notify, write))
    }

    /// Decode one notification payload and publish the reading.
    ///
    /// Rejected frames are logged (unless routine) and dropped.
    pub fn handle_notification(&self, data: &[u8]) -> Option<DecodedReading> {
        process_notification(data, self.sink.as_ref(), &self.inner)
    }

    /// Callback routing notifications into this session.
    pub fn notification_callback(&self) -> NotificationCallback {
        let sink = self.sink.clone();
        let inner = self.inner.clone();

        Arc::new(move |data: &[u8]| {
            process_notification(data, sink.as_ref(), &inner);
        })
    }

    fn spawn_handshake(
        &self,
        notify: CharacteristicDescriptor,
        write: CharacteristicDescriptor,
    ) -> JoinHandle<Result<()>> {
        let transport = self.transport.clone();
        let callback = self.notification_callback();
        let config = self.config;

        tokio::spawn(async move {
            let result = run_handshake(transport.as_ref(), &notify, &write, callback, config).await;
            if let Err(ref e) = result {
                error!("TPMS handshake failed: {}", e);
            }
            result
        })
    }
}

impl<T, S> std::fmt::Debug for DeviceSession<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("DeviceSession")
            .field("state", &inner.state)
            .field("device_name", &inner.device_name)
            .field("characteristics", &inner.characteristics)
            .finish()
    }
}

/// Subscribe to frames and send the start command.
///
/// Order: settle delay, subscribe, write the command without response,
/// stream delay.
pub(crate) async fn run_handshake<T: Transport + ?Sized>(
    transport: &T,
    notify: &CharacteristicDescriptor,
    write: &CharacteristicDescriptor,
    callback: NotificationCallback,
    config: SessionConfig,
) -> Result<()> {
    tokio::time::sleep(config.settle_delay).await;

    transport.subscribe(notify, callback).await?;
    debug!("Subscribed to TPMS notifications");

    transport.write(write, START_STREAM_COMMAND, false).await?;
    debug!("Sent TPMS stream command");

    tokio::time::sleep(config.stream_delay).await;

    Ok(())
}

fn process_notification<S: SensorSink + ?Sized>(
    data: &[u8],
    sink: &S,
    inner: &RwLock<SessionInner>,
) -> Option<DecodedReading> {
    // Only the first notification after the handshake takes the write lock.
    if inner.read().state == SessionState::HandshakeSent {
        let mut inner = inner.write();
        if inner.state == SessionState::HandshakeSent {
            debug!("First TPMS notification received");
            inner.state = SessionState::Streaming;
        }
    }

    match protocol::decode(data) {
        Ok(reading) => {
            trace!("Decoded TPMS reading: {:?}", reading);
            publish_reading(&reading, sink);
            Some(reading)
        }
        Err(rejection) if rejection.is_silent() => None,
        Err(rejection) => {
            warn!("Discarding TPMS frame {:02X?}: {}", data, rejection);
            None
        }
    }
}

fn publish_reading<S: SensorSink + ?Sized>(reading: &DecodedReading, sink: &S) {
    sink.set_display_name(&reading.display_name());

    let values = [
        (SensorKey::Pressure, SensorValue::Float(reading.pressure_psi)),
        (
            SensorKey::Temperature,
            SensorValue::Integer(i64::from(reading.temperature_celsius)),
        ),
        (
            SensorKey::Battery,
            SensorValue::Integer(i64::from(reading.battery_percent())),
        ),
        (SensorKey::Timestamp, SensorValue::Timestamp(reading.observed_at)),
    ];

    for (key, value) in values {
        sink.update_sensor(key, key.unit(), value, key.display_name());
    }
}

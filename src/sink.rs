//! Publishing decoded readings to a host.
//!
//! A session never stores readings. Each one is pushed to a [`SensorSink`] as
//! four sensor updates, keyed by [`SensorKey`].

use chrono::{DateTime, Local};
use tokio::sync::broadcast;

/// Keys of the sensors published for every reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorKey {
    /// Tire pressure.
    Pressure,
    /// Tire temperature.
    Temperature,
    /// Sensor battery level.
    Battery,
    /// Time of the last reading.
    Timestamp,
}

impl SensorKey {
    /// All keys, in publication order.
    pub const ALL: [SensorKey; 4] = [
        Self::Pressure,
        Self::Temperature,
        Self::Battery,
        Self::Timestamp,
    ];

    /// Stable string key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pressure => "pressure",
            Self::Temperature => "temperature",
            Self::Battery => "battery",
            Self::Timestamp => "timestamp",
        }
    }

    /// Unit of measurement, if any.
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            Self::Pressure => Some("psi"),
            Self::Temperature => Some("°C"),
            Self::Battery => Some("%"),
            Self::Timestamp => None,
        }
    }

    /// Human readable sensor name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Pressure => "Pressure",
            Self::Temperature => "Temperature",
            Self::Battery => "Battery",
            Self::Timestamp => "Last Update",
        }
    }
}

impl std::fmt::Display for SensorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys of binary sensors.
///
/// `Alarm` is part of the host schema but the frame format carries no alarm
/// field, so it is never published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinarySensorKey {
    /// Tire alarm.
    Alarm,
}

impl BinarySensorKey {
    /// Stable string key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alarm => "alarm",
        }
    }
}

/// Value of a published sensor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorValue {
    /// Fractional value.
    Float(f64),
    /// Whole value.
    Integer(i64),
    /// Point in time.
    Timestamp(DateTime<Local>),
}

impl std::fmt::Display for SensorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{}", v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// Host-side receiver of device metadata and sensor updates.
#[cfg_attr(test, mockall::automock)]
pub trait SensorSink: Send + Sync {
    /// Record the device's manufacturer, name and title.
    fn set_device_metadata(&self, manufacturer: &str, name: &str, title: &str);

    /// Replace the device's display name.
    fn set_display_name(&self, title: &str);

    /// Publish one sensor value.
    fn update_sensor(
        &self,
        key: SensorKey,
        unit: Option<&'static str>,
        value: SensorValue,
        name: &str,
    );
}

/// Sink output, tagged with the device it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    /// BLE identifier of the device.
    pub identifier: String,
    /// What changed.
    pub kind: SensorEventKind,
}

/// Payload of a [`SensorEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEventKind {
    /// Device metadata was set.
    Metadata {
        /// Manufacturer name.
        manufacturer: String,
        /// Device name.
        name: String,
        /// Device title.
        title: String,
    },
    /// Display name changed.
    DisplayName(String),
    /// A sensor value was published.
    Sensor {
        /// Sensor key.
        key: SensorKey,
        /// Unit of measurement.
        unit: Option<&'static str>,
        /// Value.
        value: SensorValue,
        /// Sensor name.
        name: String,
    },
}

/// A [`SensorSink`] that re-broadcasts everything on a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    identifier: String,
    tx: broadcast::Sender<SensorEvent>,
}

impl ChannelSink {
    /// Create a sink for device `identifier` publishing on `tx`.
    pub fn new(identifier: impl Into<String>, tx: broadcast::Sender<SensorEvent>) -> Self {
        Self {
            identifier: identifier.into(),
            tx,
        }
    }

    /// BLE identifier of the device.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    fn emit(&self, kind: SensorEventKind) {
        // No receivers is fine.
        let _ = self.tx.send(SensorEvent {
            identifier: self.identifier.clone(),
            kind,
        });
    }
}

impl SensorSink for ChannelSink {
    fn set_device_metadata(&self, manufacturer: &str, name: &str, title: &str) {
        self.emit(SensorEventKind::Metadata {
            manufacturer: manufacturer.to_string(),
            name: name.to_string(),
            title: title.to_string(),
        });
    }

    fn set_display_name(&self, title: &str) {
        self.emit(SensorEventKind::DisplayName(title.to_string()));
    }

    fn update_sensor(
        &self,
        key: SensorKey,
        unit: Option<&'static str>,
        value: SensorValue,
        name: &str,
    ) {
        self.emit(SensorEventKind::Sensor {
            key,
            unit,
            value,
            name: name.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sensor_keys() {
        let keys: Vec<_> = SensorKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["pressure", "temperature", "battery", "timestamp"]);

        assert_eq!(SensorKey::Pressure.unit(), Some("psi"));
        assert_eq!(SensorKey::Temperature.unit(), Some("°C"));
        assert_eq!(SensorKey::Battery.unit(), Some("%"));
        assert_eq!(SensorKey::Timestamp.unit(), None);
        assert_eq!(SensorKey::Timestamp.display_name(), "Last Update");
        assert_eq!(SensorKey::Battery.to_string(), "battery");
    }

    #[test]
    fn test_binary_sensor_key() {
        assert_eq!(BinarySensorKey::Alarm.as_str(), "alarm");
    }

    #[test]
    fn test_sensor_value_display() {
        assert_eq!(SensorValue::Float(32.5).to_string(), "32.5");
        assert_eq!(SensorValue::Integer(-40).to_string(), "-40");
    }

    #[test]
    fn test_channel_sink_broadcasts() {
        let (tx, mut rx) = broadcast::channel(8);
        let sink = ChannelSink::new("AA:BB", tx);

        sink.set_display_name("TPMS Sensor 2");
        sink.update_sensor(
            SensorKey::Pressure,
            Some("psi"),
            SensorValue::Float(30.5),
            "Pressure",
        );

        assert_eq!(
            rx.try_recv().unwrap(),
            SensorEvent {
                identifier: "AA:BB".to_string(),
                kind: SensorEventKind::DisplayName("TPMS Sensor 2".to_string()),
            }
        );
        assert_eq!(
            rx.try_recv().unwrap().kind,
            SensorEventKind::Sensor {
                key: SensorKey::Pressure,
                unit: Some("psi"),
                value: SensorValue::Float(30.5),
                name: "Pressure".to_string(),
            }
        );
    }

    #[test]
    fn test_channel_sink_without_receivers() {
        let (tx, _) = broadcast::channel(1);
        let sink = ChannelSink::new("AA:BB", tx);
        sink.set_device_metadata("TPMS", "TYREDOG", "TYREDOG");
        assert_eq!(sink.identifier(), "AA:BB");
    }
}

//! Advertisement data handed to a session.
//!
//! An [`Advertisement`] is one observation of a peripheral: its local name,
//! advertised services and, once services have been discovered, the
//! characteristics it exposes.

use std::collections::HashSet;
use uuid::Uuid;

use crate::ble::uuids::{is_target_name, TPMS_SERVICE_UUID};

/// Reference to a GATT characteristic, resolved by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicDescriptor {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the service owning the characteristic.
    pub service_uuid: Uuid,
}

impl CharacteristicDescriptor {
    /// Create a new descriptor.
    pub fn new(uuid: Uuid, service_uuid: Uuid) -> Self {
        Self { uuid, service_uuid }
    }
}

/// One observation of a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Advertisement {
    /// Advertised local name.
    pub name: String,
    /// Advertised service UUIDs.
    pub service_uuids: HashSet<Uuid>,
    /// Characteristics known for the peripheral, in discovery order.
    pub characteristics: Vec<CharacteristicDescriptor>,
}

impl Advertisement {
    /// Create an advertisement without characteristics.
    pub fn new(name: impl Into<String>, service_uuids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            name: name.into(),
            service_uuids: service_uuids.into_iter().collect(),
            characteristics: Vec::new(),
        }
    }

    /// Attach discovered characteristics.
    pub fn with_characteristics(
        mut self,
        characteristics: impl IntoIterator<Item = CharacteristicDescriptor>,
    ) -> Self {
        self.characteristics = characteristics.into_iter().collect();
        self
    }

    /// Check if the advertisement comes from a supported TPMS sensor.
    ///
    /// Both the local name and the advertised UART service must match.
    pub fn is_tpms(&self) -> bool {
        is_target_name(&self.name) && self.service_uuids.contains(&TPMS_SERVICE_UUID)
    }

    /// Find the last characteristic with the given UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<CharacteristicDescriptor> {
        self.characteristics
            .iter()
            .rev()
            .find(|c| c.uuid == *uuid)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{TPMS_NOTIFY_UUID, TPMS_WRITE_UUID};

    #[test]
    fn test_is_tpms() {
        let adv = Advertisement::new("TYREDOG", [TPMS_SERVICE_UUID]);
        assert!(adv.is_tpms());

        let adv = Advertisement::new("RB8762", [Uuid::nil(), TPMS_SERVICE_UUID]);
        assert!(adv.is_tpms());
    }

    #[test]
    fn test_is_tpms_requires_name() {
        let adv = Advertisement::new("Nordic_UART", [TPMS_SERVICE_UUID]);
        assert!(!adv.is_tpms());
    }

    #[test]
    fn test_is_tpms_requires_service() {
        let adv = Advertisement::new("JDY-08", [TPMS_NOTIFY_UUID]);
        assert!(!adv.is_tpms());

        let adv = Advertisement::new("Realtek", Vec::<Uuid>::new());
        assert!(!adv.is_tpms());
    }

    #[test]
    fn test_characteristic_lookup() {
        let notify = CharacteristicDescriptor::new(TPMS_NOTIFY_UUID, TPMS_SERVICE_UUID);
        let write = CharacteristicDescriptor::new(TPMS_WRITE_UUID, TPMS_SERVICE_UUID);
        let shadow = CharacteristicDescriptor::new(TPMS_WRITE_UUID, Uuid::nil());

        let adv = Advertisement::new("TYREDOG", [TPMS_SERVICE_UUID])
            .with_characteristics([notify, write, shadow]);

        assert_eq!(adv.characteristic(&TPMS_NOTIFY_UUID), Some(notify));
        assert_eq!(adv.characteristic(&TPMS_WRITE_UUID), Some(shadow));
        assert_eq!(adv.characteristic(&TPMS_SERVICE_UUID), None);
    }
}

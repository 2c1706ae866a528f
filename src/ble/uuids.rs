//! BLE Service and Characteristic UUIDs.
//!
//! The sensors expose a Nordic UART Service style interface: one service, a
//! write characteristic for commands and a notify characteristic for frames.

use uuid::Uuid;

/// TPMS UART service UUID advertised by the sensors.
pub const TPMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// Write characteristic UUID (commands to the sensor).
pub const TPMS_WRITE_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// Notify characteristic UUID (frames from the sensor).
pub const TPMS_NOTIFY_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

/// Advertised local names of supported sensor receivers.
pub const TARGET_NAMES: [&str; 4] = ["TYREDOG", "JDY-08", "Realtek", "RB8762"];

/// Check if an advertised local name belongs to a supported sensor.
///
/// Names are compared exactly.
pub fn is_target_name(name: &str) -> bool {
    TARGET_NAMES.iter().any(|target| *target == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            TPMS_SERVICE_UUID.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            TPMS_WRITE_UUID,
            Uuid::parse_str("6E400002-B5A3-F393-E0A9-E50E24DCCA9E").unwrap()
        );
        assert_eq!(
            TPMS_NOTIFY_UUID,
            Uuid::parse_str("6E400003-B5A3-F393-E0A9-E50E24DCCA9E").unwrap()
        );
    }

    #[test]
    fn test_is_target_name() {
        for name in TARGET_NAMES {
            assert!(is_target_name(name));
        }
        assert!(!is_target_name("tyredog"));
        assert!(!is_target_name("TYREDOG-2"));
        assert!(!is_target_name(""));
    }
}

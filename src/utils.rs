//! Unit conversion helpers for the tpms-rust-ble crate.

/// Kilopascals per psi.
const KPA_PER_PSI: f64 = 6.894_757;

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use tpms_rust_ble::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(100.0);
/// assert!((fahrenheit - 212.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Convert psi to kilopascals.
///
/// # Example
///
/// ```
/// use tpms_rust_ble::psi_to_kpa;
///
/// let kpa = psi_to_kpa(32.0);
/// assert!((kpa - 220.63).abs() < 0.01);
/// ```
#[inline]
pub fn psi_to_kpa(psi: f64) -> f64 {
    psi * KPA_PER_PSI
}

/// Convert psi to bar.
#[inline]
pub fn psi_to_bar(psi: f64) -> f64 {
    psi_to_kpa(psi) / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert!((celsius_to_fahrenheit(0.0) - 32.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-40.0) - (-40.0)).abs() < 0.001);
    }

    #[test]
    fn test_psi_to_kpa() {
        assert_eq!(psi_to_kpa(0.0), 0.0);
        assert!((psi_to_kpa(1.0) - 6.894757).abs() < 1e-9);
        assert!((psi_to_kpa(35.5) - 244.76).abs() < 0.01);
    }

    #[test]
    fn test_psi_to_bar() {
        assert!((psi_to_bar(14.5038) - 1.0).abs() < 0.001);
    }
}

//! Notification frame decoding.
//!
//! Sensors stream fixed 16-character ASCII frames over the notify
//! characteristic. Frame layout (character offsets):
//!
//! - `0..3`: literal prefix `$A0`
//! - `3..6`: unused
//! - `6`: sensor index (hex digit, 0-based on the wire)
//! - `7..9`: flag byte (two hex digits, high nibble first)
//! - `9..12`: pressure in psi (three hex digits)
//! - `11..13`: temperature in °C offset by 40 (two hex digits, shares offset 11
//!   with the pressure field)
//! - `13..15`: filler
//! - `15`: literal suffix `#`
//!
//! Flag bits: bit 0 adds half a psi to the pressure, bit 1 signals a low
//! battery, bit 7 marks the frame as carrying a fresh measurement.

use chrono::{DateTime, Local};
use std::ops::Range;
use thiserror::Error;

use crate::utils::{celsius_to_fahrenheit, psi_to_bar, psi_to_kpa};

/// Length of a notification frame in characters.
pub const FRAME_LEN: usize = 16;

/// Literal prefix of every notification frame.
pub const FRAME_PREFIX: &str = "$A0";

/// Literal suffix of every notification frame.
pub const FRAME_SUFFIX: char = '#';

/// Offset subtracted from the raw temperature byte.
pub const TEMPERATURE_OFFSET: i16 = 40;

const SENSOR_RANGE: Range<usize> = 6..7;
const FLAGS_RANGE: Range<usize> = 7..9;
const PRESSURE_RANGE: Range<usize> = 9..12;
const TEMPERATURE_RANGE: Range<usize> = 11..13;

const HALF_POINT_BIT: u8 = 0;
const BATTERY_LOW_BIT: u8 = 1;
const DATA_FRESH_BIT: u8 = 7;

/// Hex-encoded field within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameField {
    /// Sensor index digit.
    Sensor,
    /// Flag byte.
    Flags,
    /// Pressure digits.
    Pressure,
    /// Temperature digits.
    Temperature,
}

impl std::fmt::Display for FrameField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sensor => write!(f, "sensor"),
            Self::Flags => write!(f, "flags"),
            Self::Pressure => write!(f, "pressure"),
            Self::Temperature => write!(f, "temperature"),
        }
    }
}

/// Reason a notification frame produced no reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameRejection {
    /// The payload is not valid UTF-8 text.
    #[error("payload is not valid text: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// The text is not exactly 16 characters long.
    #[error("frame is {len} characters long, expected 16")]
    Length {
        /// Character count of the received text.
        len: usize,
    },

    /// The text lacks the `$A0` prefix or the `#` suffix.
    #[error("frame is not delimited by \"$A0\" and '#'")]
    Format,

    /// A hex field contains a non-hex character.
    #[error("{field} field is not hex: {text:?}")]
    Malformed {
        /// The offending field.
        field: FrameField,
        /// The raw field text.
        text: String,
    },

    /// The freshness flag is clear.
    #[error("frame does not carry fresh data")]
    Stale,
}

impl FrameRejection {
    /// Whether this rejection is routine channel noise that should not be logged.
    ///
    /// Short or long frames and stale frames are part of the sensor's normal
    /// traffic.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Length { .. } | Self::Stale)
    }
}

/// The flag byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create from the raw flag byte.
    pub fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Test a single bit.
    ///
    /// The sensor firmware defines bit `b` as the remainder left after halving
    /// the flag byte `b + 1` times, which is the plain `b`-th bit. Positions
    /// past the byte read as clear.
    pub fn bit(&self, bit: u8) -> bool {
        self.0
            .checked_shr(u32::from(bit))
            .is_some_and(|shifted| shifted & 1 == 1)
    }

    /// Pressure carries an extra half psi.
    pub fn half_point(&self) -> bool {
        self.bit(HALF_POINT_BIT)
    }

    /// Sensor battery is low.
    pub fn battery_low(&self) -> bool {
        self.bit(BATTERY_LOW_BIT)
    }

    /// Frame carries a new measurement.
    pub fn data_fresh(&self) -> bool {
        self.bit(DATA_FRESH_BIT)
    }

    /// Get the raw flag byte.
    pub fn raw(&self) -> u8 {
        self.0
    }
}

/// Battery level reported by a sensor.
///
/// The sensor only reports a low-battery flag, so the level is binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BatteryLevel {
    /// Battery is low (reported as 20%).
    Low,
    /// Battery is fine (reported as 100%).
    #[default]
    Ok,
}

impl BatteryLevel {
    /// Create from the low-battery flag.
    pub fn from_low_flag(low: bool) -> Self {
        if low {
            Self::Low
        } else {
            Self::Ok
        }
    }

    /// Battery level as a percentage.
    pub fn percent(&self) -> u8 {
        match self {
            Self::Low => 20,
            Self::Ok => 100,
        }
    }

    /// Check if battery is low.
    pub fn is_low(&self) -> bool {
        matches!(self, Self::Low)
    }
}

/// A reading decoded from one fresh notification frame.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecodedReading {
    /// 1-based sensor (wheel) index.
    pub sensor_index: u8,
    /// Tire pressure in psi, in half-psi steps.
    pub pressure_psi: f64,
    /// Tire temperature in °C.
    pub temperature_celsius: i16,
    /// Battery level.
    pub battery: BatteryLevel,
    /// Local time the frame was decoded.
    pub observed_at: DateTime<Local>,
}

impl DecodedReading {
    /// Host-facing device title for this sensor.
    pub fn display_name(&self) -> String {
        format!("TPMS Sensor {}", self.sensor_index)
    }

    /// Battery level as a percentage (20 or 100).
    pub fn battery_percent(&self) -> u8 {
        self.battery.percent()
    }

    /// Pressure in kilopascals.
    pub fn pressure_kpa(&self) -> f64 {
        psi_to_kpa(self.pressure_psi)
    }

    /// Pressure in bar.
    pub fn pressure_bar(&self) -> f64 {
        psi_to_bar(self.pressure_psi)
    }

    /// Temperature in °F.
    pub fn temperature_fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(f64::from(self.temperature_celsius))
    }
}

/// Decode a notification payload, stamping it with the current local time.
///
/// # Errors
///
/// Returns the [`FrameRejection`] explaining why no reading was produced.
pub fn decode(frame: &[u8]) -> Result<DecodedReading, FrameRejection> {
    decode_at(frame, Local::now())
}

/// Decode a notification payload observed at `observed_at`.
///
/// Gates are applied in order: text encoding, length, delimiters, sensor and
/// flag fields, freshness, then pressure and temperature. A stale frame is
/// rejected before its measurement fields are looked at.
pub fn decode_at(
    frame: &[u8],
    observed_at: DateTime<Local>,
) -> Result<DecodedReading, FrameRejection> {
    let text = std::str::from_utf8(frame)?;

    let chars: Vec<char> = text.chars().collect();
    if chars.len() != FRAME_LEN {
        return Err(FrameRejection::Length { len: chars.len() });
    }

    if !text.starts_with(FRAME_PREFIX) || !text.ends_with(FRAME_SUFFIX) {
        return Err(FrameRejection::Format);
    }

    let sensor = hex_field(&chars[SENSOR_RANGE], FrameField::Sensor)?;
    let flags = FrameFlags::new(hex_field(&chars[FLAGS_RANGE], FrameField::Flags)? as u8);

    if !flags.data_fresh() {
        return Err(FrameRejection::Stale);
    }

    let mut pressure_psi = f64::from(hex_field(&chars[PRESSURE_RANGE], FrameField::Pressure)?);
    if flags.half_point() {
        pressure_psi += 0.5;
    }

    let temperature_raw = hex_field(&chars[TEMPERATURE_RANGE], FrameField::Temperature)? as i16;

    Ok(DecodedReading {
        sensor_index: sensor as u8 + 1,
        pressure_psi,
        temperature_celsius: temperature_raw - TEMPERATURE_OFFSET,
        battery: BatteryLevel::from_low_flag(flags.battery_low()),
        observed_at,
    })
}

/// Parse up to three ASCII hex digits.
fn hex_field(digits: &[char], field: FrameField) -> Result<u16, FrameRejection> {
    digits
        .iter()
        .try_fold(0u16, |acc, c| c.to_digit(16).map(|d| acc * 16 + d as u16))
        .ok_or_else(|| FrameRejection::Malformed {
            field,
            text: digits.iter().collect(),
        })
}

//! Commands written to the sensor's write characteristic.

/// Command that starts the sensor's notification stream.
///
/// Sent verbatim as ASCII, without requesting a write response.
pub const START_STREAM_COMMAND: &[u8] = b"$A0240138#";

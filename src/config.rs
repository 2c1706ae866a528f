//! Session and manager configuration.

use std::time::Duration;

/// Timing of the stream handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Wait before subscribing to the notify characteristic.
    pub settle_delay: Duration,
    /// Wait after the start command so the sensor can begin streaming.
    pub stream_delay: Duration,
}

impl SessionConfig {
    /// Default wait before subscribing (100 ms).
    pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);
    /// Default wait after the start command (300 ms).
    pub const DEFAULT_STREAM_DELAY: Duration = Duration::from_millis(300);

    /// Set the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the stream delay.
    pub fn with_stream_delay(mut self, delay: Duration) -> Self {
        self.stream_delay = delay;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Self::DEFAULT_SETTLE_DELAY,
            stream_delay: Self::DEFAULT_STREAM_DELAY,
        }
    }
}

/// Configuration for [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManagerConfig {
    /// Handshake timing applied to every session.
    pub session: SessionConfig,
    /// Maximum number of sensors tracked at once.
    pub max_devices: usize,
}

impl ManagerConfig {
    /// Default device limit.
    pub const DEFAULT_MAX_DEVICES: usize = 8;
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            max_devices: Self::DEFAULT_MAX_DEVICES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.settle_delay, Duration::from_millis(100));
        assert_eq!(config.stream_delay, Duration::from_millis(300));
    }

    #[test]
    fn test_session_builders() {
        let config = SessionConfig::default()
            .with_settle_delay(Duration::ZERO)
            .with_stream_delay(Duration::from_secs(1));
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert_eq!(config.stream_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_manager_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_devices, 8);
        assert_eq!(config.session, SessionConfig::default());
    }
}

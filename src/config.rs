//! Connection configuration.

use std::time::Duration;

/// Default baud rate for a deCONZ serial link (8N1).
pub const DEFAULT_BAUD_RATE: u32 = 38_400;

/// Default per-request response timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default settle interval between the initial DEVICE_STATE poll and the
/// startup parameter sweep.
pub const DEFAULT_SETTLE_DURATION: Duration = Duration::from_secs(5);

/// Tunables for a [`crate::DeconzTransport`] connection.
///
/// `Default` matches the values this spec calls out explicitly; override
/// `baud_rate` for hardware (e.g. ConBee II) that requires a faster link.
#[derive(Debug, Clone, Copy)]
pub struct ConnectConfig {
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub request_timeout: Duration,
    pub settle_duration: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(100),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            settle_duration: DEFAULT_SETTLE_DURATION,
        }
    }
}

impl ConnectConfig {
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    #[must_use]
    pub fn with_settle_duration(mut self, duration: Duration) -> Self {
        self.settle_duration = duration;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, duration: Duration) -> Self {
        self.request_timeout = duration;
        self
    }
}

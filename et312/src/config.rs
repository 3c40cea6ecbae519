//! Session configuration

use std::time::Duration;

use et312_core::constants;

/// Timeouts and policies for one session
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use et312::SessionConfig;
///
/// let config = SessionConfig::default()
///     .with_timeout(Duration::from_millis(500))
///     .with_shift_baud_rate(true);
/// assert!(config.shift_baud_rate);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long to wait for a reply to a command
    pub timeout: Duration,

    /// How long to wait for each sync acknowledgment
    pub sync_timeout: Duration,

    /// Sync bytes sent before the handshake gives up
    pub sync_attempts: usize,

    /// Protocol failures in a row before the session is treated as desynchronized
    pub max_consecutive_failures: usize,

    /// Switch the box to 38400 baud right after connecting
    pub shift_baud_rate: bool,
}

impl SessionConfig {
    /// Set command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set per-attempt sync timeout
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn with_sync_attempts(mut self, attempts: usize) -> Self {
        self.sync_attempts = attempts.max(1);
        self
    }

    pub fn with_max_consecutive_failures(mut self, failures: usize) -> Self {
        self.max_consecutive_failures = failures.max(1);
        self
    }

    pub fn with_shift_baud_rate(mut self, shift: bool) -> Self {
        self.shift_baud_rate = shift;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(constants::DEFAULT_TIMEOUT_MS),
            sync_timeout: Duration::from_millis(constants::DEFAULT_SYNC_TIMEOUT_MS),
            sync_attempts: constants::SYNC_ATTEMPTS,
            max_consecutive_failures: constants::MAX_CONSECUTIVE_FAILURES,
            shift_baud_rate: false,
        }
    }
}

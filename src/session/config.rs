use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::DecoderCommand;

/// Timing and retry policy shared by every Session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after the last playback before the watchdog disconnects
    /// Default: 5 minutes
    pub disconnect_timeout: Duration,

    /// How often the watchdog checks a Session
    pub watchdog_interval: Duration,

    /// How often a joined connection is checked for readiness
    pub monitor_interval: Duration,

    /// Total join attempts before giving up
    pub join_attempts: u32,

    /// Delay before each join attempt
    pub join_delay: Duration,

    /// Delay before a finished playback is recorded as finished
    pub settle_delay: Duration,

    /// PCM frames buffered between the decoder and the Encode/Send stage
    pub handoff_depth: usize,

    /// External decoder invocation
    pub decoder: DecoderCommand,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            disconnect_timeout: Duration::from_secs(300),
            watchdog_interval: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(5),
            join_attempts: 10,
            join_delay: Duration::from_millis(350),
            settle_delay: Duration::from_secs(1),
            handoff_depth: 2,
            decoder: DecoderCommand::default(),
        }
    }
}

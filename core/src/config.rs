//! Runtime configuration for the scheduler core.

use std::time::Duration;

/// Default polling cadence used when `scheduler.streamSize.polling.delay.seconds`
/// is not supplied (§6).
const DEFAULT_POLLING_DELAY_SECONDS: u64 = 30;

/// Configuration the core itself needs. Everything else (stores, transports,
/// dispatchers) is configured by the host through the `ports` implementations
/// it supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Cadence of the polling fallback (§4.2), converted to milliseconds at
    /// startup as the original config key name implies.
    pub polling_delay: Duration,
}

impl SchedulerConfig {
    pub fn from_seconds(polling_delay_seconds: u64) -> Self {
        Self {
            polling_delay: Duration::from_secs(polling_delay_seconds),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_seconds(DEFAULT_POLLING_DELAY_SECONDS)
    }
}

#[cfg(test)]
mod inline_tests {
    use super::*;

    #[test]
    fn default_matches_documented_default() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.polling_delay, Duration::from_secs(30));
    }

    #[test]
    fn from_seconds_converts_to_millis_scale() {
        let cfg = SchedulerConfig::from_seconds(5);
        assert_eq!(cfg.polling_delay.as_millis(), 5000);
    }
}

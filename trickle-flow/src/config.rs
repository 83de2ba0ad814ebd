//! Throttle configuration.

use std::time::Duration;

use crate::error::{FlowError, FlowResult};

/// Throttle configuration bounds and defaults.
pub mod limits {
    use std::time::Duration;

    /// Default ceiling on a single rate-limit sleep (100 ms).
    pub const MAX_WAIT_DEFAULT: Duration = Duration::from_millis(100);

    /// Largest accepted ceiling on a single rate-limit sleep (60 s).
    ///
    /// Longer sleeps would leave the throttle unresponsive to budget changes
    /// for minutes at a time.
    pub const MAX_WAIT_MAX: Duration = Duration::from_secs(60);
}

/// Configuration for a [`Throttle`](crate::Throttle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Long-run average rate limit in bytes per second.
    pub rate_bytes_per_sec: u64,

    /// Upper bound on any single rate-limit sleep. The budget is re-evaluated
    /// at least this often while data is pending.
    pub max_wait: Duration,
}

impl ThrottleConfig {
    /// Creates a configuration for the given rate with the default wait ceiling.
    #[must_use]
    pub const fn new(rate_bytes_per_sec: u64) -> Self {
        Self {
            rate_bytes_per_sec,
            max_wait: limits::MAX_WAIT_DEFAULT,
        }
    }

    /// Sets the wait ceiling.
    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Creates a configuration for testing (1 KB/s, 100 ms ceiling).
    #[must_use]
    pub const fn for_testing() -> Self {
        Self::new(1_000)
    }

    /// Validates the configuration.
    ///
    /// [`Throttle::new`](crate::Throttle::new) does not call this: a zero rate
    /// is accepted there and simply never emits anything.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` if the rate is zero or the wait
    /// ceiling is zero or above [`limits::MAX_WAIT_MAX`].
    pub fn validate(&self) -> FlowResult<()> {
        if self.rate_bytes_per_sec == 0 {
            return Err(FlowError::InvalidConfig {
                message: "rate_bytes_per_sec must be positive".to_string(),
            });
        }
        if self.max_wait.is_zero() {
            return Err(FlowError::InvalidConfig {
                message: "max_wait must be positive".to_string(),
            });
        }
        if self.max_wait > limits::MAX_WAIT_MAX {
            return Err(FlowError::InvalidConfig {
                message: format!(
                    "max_wait {:?} exceeds maximum {:?}",
                    self.max_wait,
                    limits::MAX_WAIT_MAX
                ),
            });
        }
        Ok(())
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_default_max_wait() {
        let config = ThrottleConfig::new(100);
        assert_eq!(config.rate_bytes_per_sec, 100);
        assert_eq!(config.max_wait, Duration::from_millis(100));
    }

    #[test]
    fn test_with_max_wait() {
        let config = ThrottleConfig::new(100).with_max_wait(Duration::from_millis(250));
        assert_eq!(config.max_wait, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let result = ThrottleConfig::new(0).validate();
        assert!(matches!(result, Err(FlowError::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_max_wait() {
        let result = ThrottleConfig::new(100)
            .with_max_wait(Duration::ZERO)
            .validate();
        assert!(matches!(result, Err(FlowError::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_huge_max_wait() {
        let result = ThrottleConfig::new(100)
            .with_max_wait(Duration::from_secs(3600))
            .validate();
        assert!(matches!(result, Err(FlowError::InvalidConfig { .. })));
    }

    #[test]
    fn test_default_and_testing_configs_are_valid() {
        assert!(ThrottleConfig::default().validate().is_ok());
        assert!(ThrottleConfig::for_testing().validate().is_ok());
    }
}

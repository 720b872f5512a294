use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supervisor timing and queue sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Interval between liveness probes of a connected server.
    pub health_interval_ms: u64,
    /// First delay between connect attempts, doubled per failed attempt.
    pub retry_base_delay_ms: u64,
    /// Upper bound on the delay between connect attempts.
    pub retry_max_delay_ms: u64,
    /// Capacity of the status event queue.
    pub event_capacity: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            health_interval_ms: 30_000,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
            event_capacity: 256,
        }
    }
}

impl SupervisorSettings {
    /// Liveness probe interval.
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    /// Sleep after `failed` connect attempts:
    /// `min(base * 2^failed, max)`.
    pub fn retry_delay(&self, failed: u32) -> Duration {
        let ms = self
            .retry_base_delay_ms
            .saturating_mul(2u64.saturating_pow(failed))
            .min(self.retry_max_delay_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let settings = SupervisorSettings::default();
        assert_eq!(settings.retry_delay(1), Duration::from_millis(2_000));
        assert_eq!(settings.retry_delay(2), Duration::from_millis(4_000));
        assert_eq!(settings.retry_delay(3), Duration::from_millis(8_000));
        assert_eq!(settings.retry_delay(4), Duration::from_millis(10_000));
        assert_eq!(settings.retry_delay(40), Duration::from_millis(10_000));
    }

    #[test]
    fn test_defaults() {
        let settings = SupervisorSettings::default();
        assert_eq!(settings.health_interval(), Duration::from_secs(30));
        assert_eq!(settings.event_capacity, 256);
    }
}

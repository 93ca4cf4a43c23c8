//! Configuration for the allocation engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;

/// Engine tuning knobs loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reservation TTL in seconds (default: 15 minutes)
    pub reservation_ttl_secs: u64,
    /// Interval between expiry sweeps in seconds (default: 1 minute)
    pub sweep_interval_secs: u64,
    /// Maximum reservations processed per sweep pass
    pub sweep_batch_size: u32,
    /// Maximum numbers a single reservation may hold
    pub max_numbers_per_reservation: u32,
    /// Random-selection attempt budget per requested number
    pub attempts_per_number: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: 900,
            sweep_interval_secs: 60,
            sweep_batch_size: 500,
            max_numbers_per_reservation: 100,
            attempts_per_number: 8,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reservation_ttl_secs: env::var("RAFFLE_RESERVATION_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reservation_ttl_secs),
            sweep_interval_secs: env::var("RAFFLE_SWEEP_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.sweep_interval_secs),
            sweep_batch_size: env::var("RAFFLE_SWEEP_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.sweep_batch_size),
            max_numbers_per_reservation: env::var("RAFFLE_MAX_NUMBERS_PER_RESERVATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_numbers_per_reservation),
            attempts_per_number: env::var("RAFFLE_RANDOM_ATTEMPTS_PER_NUMBER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.attempts_per_number),
        }
    }

    /// Reservation TTL as a `chrono` duration
    #[must_use]
    pub fn reservation_ttl(&self) -> chrono::Duration {
        #[allow(clippy::cast_possible_wrap)]
        chrono::Duration::seconds(self.reservation_ttl_secs as i64)
    }

    /// Sweep interval as a `std` duration
    #[must_use]
    pub const fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.reservation_ttl().num_minutes(), 15);
        assert_eq!(config.sweep_interval().as_secs(), 60);
        assert!(config.attempts_per_number > 0);
        assert!(config.max_numbers_per_reservation > 0);
    }
}

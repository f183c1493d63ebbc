use std::str::FromStr;

use crate::error::{PlaneError, Result};

/// Control-plane configuration, read from the environment.
///
/// Unparsable values fall back to their defaults; threshold combinations that
/// violate the invariants below abort startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Scale up while queue depth exceeds this.
    pub queue_threshold_high: usize,
    /// Scale down once queue depth stays below this.
    pub queue_threshold_low: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub scale_down_stable_sec: u64,
    pub worker_heartbeat_timeout_sec: u64,
    /// Admissions per minute; 0 disables rate limiting.
    pub rate_limit_jobs_per_min: u32,
    pub idempotency_ttl_sec: u64,
    /// Docker image for managed workers; autoscaling is enabled when set.
    pub worker_image: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_threshold_high: 10,
            queue_threshold_low: 2,
            min_workers: 1,
            max_workers: 4,
            scale_down_stable_sec: 30,
            worker_heartbeat_timeout_sec: 90,
            rate_limit_jobs_per_min: 120,
            idempotency_ttl_sec: 86_400,
            worker_image: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            queue_threshold_high: env_or("QUEUE_THRESHOLD_HIGH", defaults.queue_threshold_high),
            queue_threshold_low: env_or("QUEUE_THRESHOLD_LOW", defaults.queue_threshold_low),
            min_workers: env_or("MIN_WORKERS", defaults.min_workers),
            max_workers: env_or("MAX_WORKERS", defaults.max_workers),
            scale_down_stable_sec: env_or("SCALE_DOWN_STABLE_SEC", defaults.scale_down_stable_sec),
            worker_heartbeat_timeout_sec: env_or(
                "WORKER_HEARTBEAT_TIMEOUT_SEC",
                defaults.worker_heartbeat_timeout_sec,
            ),
            rate_limit_jobs_per_min: env_or(
                "RATE_LIMIT_JOBS_PER_MIN",
                defaults.rate_limit_jobs_per_min,
            ),
            idempotency_ttl_sec: env_or("IDEMPOTENCY_TTL_SEC", defaults.idempotency_ttl_sec),
            worker_image: std::env::var("WORKER_IMAGE").ok().filter(|s| !s.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_workers > self.max_workers {
            return Err(PlaneError::Config(format!(
                "MIN_WORKERS ({}) must be <= MAX_WORKERS ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.queue_threshold_low >= self.queue_threshold_high {
            return Err(PlaneError::Config(format!(
                "QUEUE_THRESHOLD_LOW ({}) must be < QUEUE_THRESHOLD_HIGH ({})",
                self.queue_threshold_low, self.queue_threshold_high
            )));
        }
        if self.queue_threshold_high == 0 {
            return Err(PlaneError::Config(
                "QUEUE_THRESHOLD_HIGH must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_threshold_high, 10);
        assert_eq!(config.max_workers, 4);
        assert!(config.worker_image.is_none());
    }

    #[test]
    fn min_above_max_is_rejected() {
        let config = Config {
            min_workers: 5,
            max_workers: 4,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn low_threshold_must_be_below_high() {
        let config = Config {
            queue_threshold_low: 10,
            queue_threshold_high: 10,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            queue_threshold_low: 0,
            queue_threshold_high: 1,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}

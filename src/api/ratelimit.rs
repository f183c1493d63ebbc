use chrono::{DateTime, Utc};

use crate::clock::SharedClock;

struct Window {
    started_at: Option<DateTime<Utc>>,
    count: u32,
}

/// Fixed-window rate limiter: at most `max` admissions per minute.
pub struct RateLimiter {
    window: std::sync::Mutex<Window>,
    max: u32,
    period: chrono::Duration,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32, clock: SharedClock) -> Self {
        Self {
            window: std::sync::Mutex::new(Window {
                started_at: None,
                count: 0,
            }),
            max: max_per_minute,
            period: chrono::Duration::minutes(1),
            clock,
        }
    }

    pub fn allow(&self) -> bool {
        let now = self.clock.now();
        let mut window = self.window.lock().unwrap();
        let rolled = window
            .started_at
            .is_none_or(|started| now - started >= self.period);
        if rolled {
            window.started_at = Some(now);
            window.count = 0;
        }
        if window.count >= self.max {
            return false;
        }
        window.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn blocks_over_limit_until_window_rolls() {
        let clock = ManualClock::new(Utc::now());
        let limiter = RateLimiter::new(2, clock.clone());

        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());

        clock.advance(chrono::Duration::seconds(61));
        assert!(limiter.allow());
    }
}

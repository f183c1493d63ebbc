use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::clock::SharedClock;

struct Entry {
    job_id: String,
    expires_at: DateTime<Utc>,
}

/// `X-Idempotency-Key` -> job id cache with TTL. A hit within the TTL makes
/// admission return the prior job instead of creating a new one.
pub struct IdempotencyCache {
    keys: std::sync::Mutex<HashMap<String, Entry>>,
    ttl: chrono::Duration,
    clock: SharedClock,
}

impl IdempotencyCache {
    pub fn new(ttl: chrono::Duration, clock: SharedClock) -> Self {
        Self {
            keys: std::sync::Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let keys = self.keys.lock().unwrap();
        let entry = keys.get(key)?;
        if self.clock.now() > entry.expires_at {
            return None;
        }
        Some(entry.job_id.clone())
    }

    pub fn set(&self, key: String, job_id: String) {
        let expires_at = self.clock.now() + self.ttl;
        self.keys
            .lock()
            .unwrap()
            .insert(key, Entry { job_id, expires_at });
    }
}

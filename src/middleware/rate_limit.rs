// src/middleware/rate_limit.rs
//
// Sliding-window attempt counter keyed by client address. Login calls `check` before
// touching the account store.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub struct LoginThrottle {
    window: Duration,
    max_attempts: u32,
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
}

impl LoginThrottle {
    pub fn new(window: Duration, max_attempts: u32) -> Self {
        Self {
            window,
            max_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Records an attempt for `key`. Returns `Err(retry_after_secs)` once the key has
    /// used up its attempts for the current window; rejected attempts are not counted.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);

        attempts.retain(|_, seen| {
            seen.retain(|t| now.duration_since(*t) < self.window);
            !seen.is_empty()
        });

        let seen = attempts.entry(key.to_string()).or_default();
        if seen.len() as u32 >= self.max_attempts {
            let oldest = seen.first().copied().unwrap_or(now);
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            return Err(wait.as_secs().max(1));
        }

        seen.push(now);
        Ok(())
    }
}

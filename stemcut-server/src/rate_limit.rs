//! Rate Limiter (C10): per-client-IP fixed-window admission gate.
//!
//! Grounded on `original_source/app/core/rate_limit.py`'s Redis
//! fixed-window counter; reimplemented as a single-process map per
//! spec §9's Open Question resolution ("a single-process map suffices"
//! when quota is not shared across processes). Defaults
//! (`rate_limit_requests=12`, `window=3600s`) carried from
//! `original_source/app/core/config.py`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Window {
    count: u32,
    window_started_at: Instant,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_requests: u32,
    window: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub reset_in_seconds: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        RateLimiter {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window: Duration::from_secs(window_seconds),
        }
    }

    /// Consult-and-increment atomically for one client IP.
    pub fn check(&self, client_ip: &str) -> RateLimitDecision {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();

        let entry = windows.entry(client_ip.to_string()).or_insert_with(|| Window {
            count: 0,
            window_started_at: now,
        });

        if now.duration_since(entry.window_started_at) >= self.window {
            entry.count = 0;
            entry.window_started_at = now;
        }

        let reset_in = self.window.saturating_sub(now.duration_since(entry.window_started_at));

        if entry.count >= self.max_requests {
            return RateLimitDecision {
                allowed: false,
                reset_in_seconds: reset_in.as_secs() + 1,
            };
        }

        entry.count += 1;
        RateLimitDecision {
            allowed: true,
            reset_in_seconds: reset_in.as_secs() + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_configured_count_then_rejects() {
        let limiter = RateLimiter::new(3, 3600);
        for _ in 0..3 {
            assert!(limiter.check("1.2.3.4").allowed);
        }
        let decision = limiter.check("1.2.3.4");
        assert!(!decision.allowed);
        assert!(decision.reset_in_seconds > 0);
    }

    #[test]
    fn tracks_each_client_ip_independently() {
        let limiter = RateLimiter::new(1, 3600);
        assert!(limiter.check("1.1.1.1").allowed);
        assert!(limiter.check("2.2.2.2").allowed);
        assert!(!limiter.check("1.1.1.1").allowed);
    }

    #[test]
    fn resets_after_window_elapses() {
        let limiter = RateLimiter::new(1, 0);
        assert!(limiter.check("1.2.3.4").allowed);
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.check("1.2.3.4").allowed);
    }
}

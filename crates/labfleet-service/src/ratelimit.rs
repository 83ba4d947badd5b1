//! Fixed-window admission counter for mutating RPCs.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    max_requests: u32,
    period: Duration,
    window: Mutex<Window>,
}

impl RateLimiter {
    /// Admit at most `max_requests` per `period`. `max_requests == 0`
    /// admits everything.
    pub fn new(max_requests: u32, period: Duration) -> Self {
        Self {
            max_requests,
            period,
            window: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Non-blocking admission check.
    pub fn try_request(&self) -> bool {
        if self.max_requests == 0 {
            return true;
        }
        let mut window = self.window.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        if now > window.started + self.period {
            window.started = now;
            window.count = 0;
        }
        if window.count >= self.max_requests {
            return false;
        }
        window.count += 1;
        true
    }
}

//! Rolling-window request limiter for LLM-bound calls.
//!
//! One limiter is shared by every run in the process. Callers `acquire` a
//! unit before each LLM request; when the window is full the call waits
//! until the oldest dispatch ages out.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    dispatched: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Allow at most `max_requests` dispatches in any rolling `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1) as usize,
            window,
            dispatched: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Consume one unit, waiting for the window to allow it.
    pub async fn acquire(&self) {
        loop {
            let wake_at = {
                let mut dispatched = self.dispatched.lock().await;
                let now = Instant::now();
                self.prune(&mut dispatched, now);

                if dispatched.len() < self.max_requests {
                    dispatched.push_back(now);
                    return;
                }

                match dispatched.front() {
                    Some(oldest) => *oldest + self.window,
                    None => now,
                }
            };

            tracing::debug!(
                wait_ms = wake_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                max_requests = self.max_requests,
                "LLM request budget exhausted; waiting for window"
            );
            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Consume one unit only if the window allows it right now.
    pub async fn try_acquire(&self) -> bool {
        let mut dispatched = self.dispatched.lock().await;
        let now = Instant::now();
        self.prune(&mut dispatched, now);
        if dispatched.len() < self.max_requests {
            dispatched.push_back(now);
            true
        } else {
            false
        }
    }

    /// Units available without waiting.
    pub async fn available(&self) -> usize {
        let mut dispatched = self.dispatched.lock().await;
        self.prune(&mut dispatched, Instant::now());
        self.max_requests - dispatched.len()
    }

    /// Forget every recorded dispatch.
    pub async fn reset(&self) {
        self.dispatched.lock().await.clear();
    }

    fn prune(&self, dispatched: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = dispatched.front() {
            if now.duration_since(*oldest) >= self.window {
                dispatched.pop_front();
            } else {
                break;
            }
        }
    }
}

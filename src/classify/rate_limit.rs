//! Sliding-window limiter for classification calls.
//!
//! `acquire()` holds a fair async mutex while it waits, so callers are admitted in
//! arrival order and at most `per_window` admissions land in any trailing window.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_RPM: usize = 15;
const WINDOW: Duration = Duration::from_secs(60);
const SAFETY_MARGIN: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct RateLimiter {
    per_window: usize,
    window: Duration,
    margin: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Requests-per-minute limiter.
    pub fn per_minute(rpm: usize) -> Self {
        Self::with_window(rpm, WINDOW, SAFETY_MARGIN)
    }

    pub fn with_window(per_window: usize, window: Duration, margin: Duration) -> Self {
        Self {
            per_window: per_window.max(1),
            window,
            margin,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.per_window
    }

    /// Wait until a slot is free in the trailing window, then claim it.
    pub async fn acquire(&self) {
        let mut starts = self.starts.lock().await;
        prune(&mut starts, Instant::now(), self.window);

        if starts.len() >= self.per_window {
            if let Some(&oldest) = starts.front() {
                let wait = (oldest + self.window).saturating_duration_since(Instant::now()) + self.margin;
                tracing::info!(wait_ms = wait.as_millis() as u64, "classifier rate limit reached, waiting");
                tokio::time::sleep(wait).await;
            }
            prune(&mut starts, Instant::now(), self.window);
        }
        starts.push_back(Instant::now());
    }

    /// Admissions inside the trailing window right now.
    pub async fn in_flight_window(&self) -> usize {
        let mut starts = self.starts.lock().await;
        prune(&mut starts, Instant::now(), self.window);
        starts.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute(DEFAULT_RPM)
    }
}

fn prune(starts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = starts.front() {
        if now.duration_since(front) >= window {
            starts.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_capacity_without_waiting() {
        let rl = RateLimiter::per_minute(3);
        let t0 = Instant::now();
        for _ in 0..3 {
            rl.acquire().await;
        }
        assert_eq!(Instant::now(), t0);
        assert_eq!(rl.in_flight_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn next_call_waits_for_oldest_to_expire() {
        let rl = RateLimiter::per_minute(2);
        let t0 = Instant::now();
        rl.acquire().await;
        rl.acquire().await;
        rl.acquire().await;
        let waited = Instant::now() - t0;
        assert!(waited >= Duration::from_secs(60), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(60_200), "waited {waited:?}");
    }
}

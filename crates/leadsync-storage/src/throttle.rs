//! Client-side pacing for remote calls: a sliding-window limiter and GET retry backoff.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Exponential backoff applied to idempotent reads only.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Call timestamps inside the current window.
#[derive(Debug, Default)]
struct Window {
    calls: VecDeque<Instant>,
}

impl Window {
    /// Record a call at `now` if the window has room, else report how long to wait.
    fn admit(&mut self, now: Instant, max_calls: usize, window: Duration) -> Result<(), Duration> {
        while let Some(oldest) = self.calls.front() {
            if now.duration_since(*oldest) >= window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
        if self.calls.len() < max_calls {
            self.calls.push_back(now);
            return Ok(());
        }
        let oldest = self.calls.front().copied().unwrap_or(now);
        Err(window.saturating_sub(now.duration_since(oldest)))
    }
}

/// At most `max_calls` admissions in any `window`. Callers are admitted in arrival
/// order; a full window makes the caller sleep until the oldest call ages out.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_calls: usize,
    window: Duration,
    state: Mutex<Window>,
}

impl SlidingWindowLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            state: Mutex::new(Window::default()),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn acquire(&self) {
        // The lock is held across the sleep so later callers queue behind this one.
        let mut state = self.state.lock().await;
        loop {
            match state.admit(Instant::now(), self.max_calls, self.window) {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!(wait_ms = wait.as_millis() as u64, "rate window full");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn window_admits_up_to_quota_then_reports_wait() {
        let mut window = Window::default();
        let start = Instant::now();
        let span = Duration::from_secs(60);

        for i in 0..5 {
            assert!(window
                .admit(start + Duration::from_secs(i), 5, span)
                .is_ok());
        }
        let wait = window
            .admit(start + Duration::from_secs(10), 5, span)
            .expect_err("window is full");
        assert_eq!(wait, Duration::from_secs(50));

        assert!(window.admit(start + Duration::from_secs(60), 5, span).is_ok());
        assert_eq!(window.calls.len(), 5);
    }

    #[tokio::test]
    async fn limiter_delays_calls_beyond_quota() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_millis(80));
        let started = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(started.elapsed() < Duration::from_millis(80));
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}

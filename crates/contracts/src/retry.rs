//! Capped exponential backoff for transient source failures.

use std::time::Duration;

/// Simple capped exponential backoff policy for synchronous operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 2u32.saturating_pow(attempt as u32);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// `is_retryable` decides whether a given error is worth another attempt;
    /// the final error is returned unchanged either way.
    pub fn retry<T, E>(
        &self,
        mut op: impl FnMut(usize) -> Result<T, E>,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, E> {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !is_retryable(&err) {
                        return Err(err);
                    }
                    std::thread::sleep(self.delay_for(attempt - 1));
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(10), Duration::from_millis(100))
    }
}

// Copyright (c) James Kassemi, SC, US. All rights reserved.

/// Fixed-budget retry policy for async operations.
///
/// Attempts run back to back: there is no delay, backoff, or jitter between
/// them, and every error counts against the budget the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Budget used for outbound file delivery.
    pub fn delivery() -> Self {
        Self::fixed(3)
    }

    /// Runs `op` until it succeeds or the budget is spent. `op` receives the
    /// zero-based attempt index; the last error is returned on exhaustion.
    pub async fn retry_async<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(val) => return Ok(val),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::delivery()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fixed_clamps_to_one_attempt() {
        assert_eq!(RetryPolicy::fixed(0).max_attempts, 1);
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }

    #[tokio::test]
    async fn retry_async_retries_until_success() {
        let policy = RetryPolicy::fixed(3);
        let attempts = Arc::new(AtomicUsize::new(0));

        let result: Result<&'static str, &str> = policy
            .retry_async(|attempt| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err("boom")
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_async_stops_after_max_attempts() {
        let policy = RetryPolicy::fixed(2);
        let attempts = Arc::new(AtomicUsize::new(0));

        let result: Result<(), &str> = policy
            .retry_async(|_| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("nope")
                }
            })
            .await;

        assert_eq!(result, Err("nope"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_async_does_not_wait_between_attempts() {
        let policy = RetryPolicy::delivery();
        let started = tokio::time::Instant::now();
        let result: Result<(), usize> = policy.retry_async(|attempt| async move { Err(attempt) }).await;
        assert_eq!(result, Err(2));
        assert_eq!(started.elapsed(), std::time::Duration::ZERO);
    }
}

//! Bounded, cancellable retry with a fixed delay.

use std::{fmt::Display, future::Future, time::Duration};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32, last_error: Option<E> },
}

impl RetryPolicy {
    /// Runs `operation` until it yields a value.
    ///
    /// `Ok(None)` and `Err(_)` both count as a failed attempt. The token is
    /// checked before every attempt and raced against every attempt and
    /// every delay, so cancellation never waits out a backoff.
    pub async fn run<T, E, F, Fut>(
        &self,
        token: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if token.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(RetryError::Cancelled),
                outcome = operation(attempt) => outcome,
            };

            match outcome {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    tracing::debug!(attempt, max_attempts = attempts, "value not available yet");
                }
                Err(err) => {
                    tracing::warn!(attempt, max_attempts = attempts, error = %err, "attempt failed");
                    last_error = Some(err);
                }
            }

            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }

        Err(RetryError::Exhausted {
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn returns_first_available_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32, RetryError<String>> = fast()
            .run(&CancellationToken::new(), move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok((attempt == 2).then_some(attempt)) }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts_and_keeps_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), RetryError<String>> = fast()
            .run(&CancellationToken::new(), move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("failure {}", attempt)) }
            })
            .await;
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last_error: Some("failure 3".to_string())
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_token_skips_all_attempts() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), RetryError<String>> = fast()
            .run(&token, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(Some(())) }
            })
            .await;
        assert_eq!(result, Err(RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(30),
        };
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result: Result<(), RetryError<String>> =
            policy.run(&token, |_| async { Ok(None) }).await;
        assert_eq!(result, Err(RetryError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            delay: Duration::from_millis(1),
        };
        let result: Result<u8, RetryError<String>> = policy
            .run(&CancellationToken::new(), |_| async { Ok(Some(7)) })
            .await;
        assert_eq!(result, Ok(7));
    }
}

// Bounded retry with exponential backoff for fetching video info.
//
// Attempt n (1-indexed) that fails with attempts remaining is followed by a
// sleep of base_delay * 2^(n-1). The last error is returned unmodified.

use std::{fmt::Display, future::Future, time::Duration};

use tracing::{error, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Total number of invocations, including the first one.
  max_attempts: u32,
  base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      base_delay,
    }
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  /// Delay to wait after the given failed attempt (1-indexed).
  pub fn delay_after(&self, attempt: u32) -> Duration {
    let multiplier = 1u32
      .checked_shl(attempt.saturating_sub(1))
      .unwrap_or(u32::MAX);
    self
      .base_delay
      .checked_mul(multiplier)
      .unwrap_or(Duration::MAX)
  }

  pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
  {
    let mut attempt = 1;
    loop {
      match operation().await {
        Ok(value) => return Ok(value),
        Err(err) if attempt >= self.max_attempts => {
          error!(
            attempts = attempt,
            error = %err,
            "giving up after exhausting retries"
          );
          return Err(err);
        }
        Err(err) => {
          let delay = self.delay_after(attempt);
          warn!(
            attempt,
            max = self.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed, retrying"
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;
  use crate::Error;

  fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1))
  }

  #[test]
  fn test_exponential_schedule() {
    let policy = RetryPolicy::new(5, Duration::from_millis(1000));
    assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
    assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
    assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
  }

  #[test]
  fn test_schedule_saturates() {
    let policy = RetryPolicy::new(100, Duration::from_secs(1));
    assert!(policy.delay_after(64) >= policy.delay_after(32));
  }

  #[test]
  fn test_zero_attempts_normalized() {
    assert_eq!(fast_policy(0).max_attempts(), 1);
    assert_eq!(RetryPolicy::default().max_attempts(), 3);
  }

  #[tokio::test]
  async fn test_succeeds_after_two_failures() {
    let calls = AtomicU32::new(0);
    let result = fast_policy(3)
      .run(|| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
          if n < 3 {
            Err(Error::Extraction(format!("flaky #{n}")))
          } else {
            Ok("info")
          }
        }
      })
      .await;

    assert_eq!(result.unwrap(), "info");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_exhaustion_keeps_last_error() {
    let calls = AtomicU32::new(0);
    let result: Result<(), Error> = fast_policy(3)
      .run(|| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Err(Error::MissingField(if n == 3 { "last" } else { "x" })) }
      })
      .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match result {
      Err(Error::MissingField(field)) => assert_eq!(field, "last"),
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_first_success_is_not_retried() {
    let calls = AtomicU32::new(0);
    let result: Result<u32, Error> = fast_policy(5)
      .run(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(7) }
      })
      .await;

    assert_eq!(result.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}

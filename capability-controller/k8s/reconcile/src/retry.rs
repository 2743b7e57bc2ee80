use std::{future::Future, time::Duration};

/// A bounded, exponential retry policy.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: bool,
    /// The total number of attempts, including the first.
    pub attempts: usize,
}

// === impl Backoff ===

impl Backoff {
    /// Polling for collaborators that may not have been created yet.
    pub fn lookup(attempts: usize) -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter: true,
            attempts,
        }
    }

    /// Optimistic-concurrency conflicts, which are resolved by re-reading, so
    /// there is no reason to wait.
    pub fn conflicts(attempts: usize) -> Self {
        Self {
            initial: Duration::ZERO,
            max: Duration::ZERO,
            factor: 1.0,
            jitter: false,
            attempts,
        }
    }

    /// The delay before retry number `retry` (zero-based).
    pub fn delay(&self, retry: usize) -> Duration {
        let exp = self.factor.powi(retry.min(i32::MAX as usize) as i32);
        let delay = self.initial.mul_f64(exp).min(self.max);
        if self.jitter {
            // Spread retries over [delay/2, delay).
            delay.mul_f64(0.5 + rand::random::<f64>() / 2.0)
        } else {
            delay
        }
    }
}

/// Runs `op` until it succeeds, fails with an error that is not `retryable`,
/// or the policy's attempts are exhausted. The last error is returned.
pub async fn retry<T, E, F, Fut>(
    backoff: &Backoff,
    retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < backoff.attempts && retryable(&error) => {
                let delay = backoff.delay(attempt - 1);
                tracing::debug!(attempt, ?delay, "Retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

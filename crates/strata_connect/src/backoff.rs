//! Exponential backoff for retried Store RPCs.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

/// First delay applied to a retried RPC.
const RPC_INITIAL_BACKOFF: Duration = Duration::from_secs(5);
/// Ceiling on a single backoff delay.
const RPC_MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Retries allowed per RPC before the last error is surfaced.
pub const RPC_MAX_RETRIES: u32 = 5;

/// Returned by `sleep` once the retry budget is spent.
#[derive(Debug, Error)]
#[error("maximum retry attempts exceeded")]
pub struct RetriesExhausted;

/// Doubling backoff with a delay cap and a bounded number of retries.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_retries,
            attempt: 0,
        }
    }

    /// Backoff used by every Store RPC retry loop: 5s initial, five retries.
    pub fn rpc_default() -> Self {
        Self::new(RPC_INITIAL_BACKOFF, RPC_MAX_BACKOFF, RPC_MAX_RETRIES)
    }

    /// Number of retries consumed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Sleep for the next delay, or report exhaustion without sleeping.
    pub async fn sleep(&mut self) -> Result<(), RetriesExhausted> {
        if self.attempt >= self.max_retries {
            return Err(RetriesExhausted);
        }
        let exp = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(self.attempt));
        let delay = exp.min(self.max_delay);
        tracing::warn!(
            attempt = self.attempt + 1,
            max_retries = self.max_retries,
            delay_ms = delay.as_millis() as u64,
            "backing off before retry"
        );
        sleep(delay).await;
        self.attempt += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn delays_double_up_to_the_cap() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(60), 5);
        let expected = [5u64, 10, 20, 40, 60];
        for want in expected {
            let begin = Instant::now();
            backoff.sleep().await.expect("retry budget left");
            assert_eq!((Instant::now() - begin).as_secs(), want);
        }
        assert!(backoff.sleep().await.is_err(), "budget must be exhausted");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_without_sleeping() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(60), 0);
        let begin = Instant::now();
        assert!(backoff.sleep().await.is_err());
        assert_eq!(Instant::now(), begin);
    }
}

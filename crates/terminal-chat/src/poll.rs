use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::ChatError;

/// Bounds for status polling: first wait `interval`, then grow each wait by
/// `multiplier` up to `max_interval`. Gives up after `max_attempts` checks or
/// once the next wait would cross `timeout`.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(10),
            max_attempts: 60,
            timeout: Duration::from_secs(300),
        }
    }
}

impl PollPolicy {
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier.max(1.0)).min(self.max_interval)
    }
}

/// Outcome of one status check.
pub enum Progress<T> {
    Done(T),
    Pending,
}

/// Sleep, check, repeat. `check` receives the 1-based attempt number and is
/// called exactly once per attempt; an error from it ends polling.
pub async fn poll_until<T, F, Fut>(policy: &PollPolicy, mut check: F) -> Result<T, ChatError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Progress<T>, ChatError>>,
{
    let started = Instant::now();
    let mut delay = policy.interval;

    for attempt in 1..=policy.max_attempts {
        if started.elapsed() + delay > policy.timeout {
            return Err(ChatError::PollTimeout(policy.timeout));
        }
        tokio::time::sleep(delay).await;

        match check(attempt).await? {
            Progress::Done(value) => return Ok(value),
            Progress::Pending => debug!(attempt, "still pending"),
        }
        delay = policy.next_delay(delay);
    }

    Err(ChatError::PollExhausted {
        attempts: policy.max_attempts,
    })
}

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::CollaboratorError;

/// Bounded retry with exponential backoff for collaborator calls.
///
/// Only [`CollaboratorError::Transient`] failures are retried; fatal ones
/// surface on the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

#[derive(Debug)]
pub struct RetryExhausted {
    pub attempts: usize,
    pub error: CollaboratorError,
}

impl RetryPolicy {
    pub fn backoff(&self, retry: usize) -> Duration {
        let shift = retry.saturating_sub(1).min(16) as u32;
        self.initial_backoff
            .saturating_mul(1 << shift)
            .min(self.max_backoff)
    }

    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Result<T, CollaboratorError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        call = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying collaborator call"
                    );
                    thread::sleep(delay);
                }
                Err(error) => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

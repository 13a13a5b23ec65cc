//! Bounded retry and timeout for calls to external providers.

use crate::error::{Result, RetrieverError};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How calls to an embedding provider or answer generator are bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPolicy {
    /// Limit for a single attempt
    pub timeout: Duration,
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Wait before the second attempt; doubled for every further attempt
    pub initial_backoff: Duration,
}

impl Default for ProviderPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl ProviderPolicy {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            timeout,
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RetrieverError::configuration(
                "max_attempts must be greater than zero",
            ));
        }
        if self.timeout.is_zero() {
            return Err(RetrieverError::configuration(
                "timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Run `call` until it succeeds, each attempt bounded by the timeout.
    ///
    /// After `max_attempts` failures the last error is reported as
    /// [`RetrieverError::ProviderUnavailable`].
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        tracing::info!("{operation} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("timed out after {:.1}s", self.timeout.as_secs_f64())
                }
            }

            tracing::warn!("{operation} failed (attempt {attempt}/{attempts}): {last_error}");
            if attempt < attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        Err(RetrieverError::ProviderUnavailable {
            attempts,
            message: last_error,
        })
    }
}

//! Delays between connection attempts

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{BrokerError, Result};
use crate::settings::PoolSettings;

/// Decides how long the pool waits before an attempt.
///
/// Attempt 0 is the warm-up before the first dial; attempt `n > 0` is the
/// delay after the `n`-th failed attempt.
#[async_trait]
pub trait BackoffPolicy: Send + Sync {
    async fn wait(&self, cancel: &CancellationToken, attempt: u32) -> Result<()>;
}

/// Fixed warm-up and fixed retry delay
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    warm_up: Duration,
    retry_delay: Duration,
    cancellable: bool,
}

impl FixedBackoff {
    pub fn new(warm_up: Duration, retry_delay: Duration) -> Self {
        Self {
            warm_up,
            retry_delay,
            cancellable: false,
        }
    }

    pub fn from_settings(settings: &PoolSettings) -> Self {
        Self::new(settings.warm_up_delay(), settings.retry_delay())
    }

    /// Let the caller's token cut waits short
    pub fn cancellable(mut self) -> Self {
        self.cancellable = true;
        self
    }

    fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            self.warm_up
        } else {
            self.retry_delay
        }
    }
}

#[async_trait]
impl BackoffPolicy for FixedBackoff {
    async fn wait(&self, cancel: &CancellationToken, attempt: u32) -> Result<()> {
        let delay = self.delay(attempt);
        if delay.is_zero() {
            return Ok(());
        }

        if !self.cancellable {
            tokio::time::sleep(delay).await;
            return Ok(());
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(BrokerError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

use std::fmt::Display;
use std::future::Future;

use tokio::time::{sleep, Duration};
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetrySettings {
    /// One initial attempt plus `retries` more, with a short fixed pause.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            attempts: retries + 1,
            base_delay_ms: 50,
            max_delay_ms: 200,
        }
    }

    pub async fn run_with_retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.attempts.max(1);
        let mut delay = self.base_delay_ms;
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    warn!("Attempt {attempt}/{attempts} failed: {e}");
                    sleep(Duration::from_millis(delay)).await;
                    delay = (delay * 2).min(self.max_delay_ms);
                    attempt += 1;
                }
                Err(e) => {
                    error!("all {attempt} attempts failed: {e}");
                    return Err(e);
                }
            }
        }
    }
}

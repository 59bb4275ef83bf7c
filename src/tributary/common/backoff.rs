use std::future::Future;

use tokio::time::{sleep, Duration};
use tracing::{info, warn, error};

use crate::tributary::common::Result;


/// Exponential backoff schedule: `attempts` tries in total, sleeping
/// `initial`, 2*`initial`, 4*`initial`, ... between consecutive tries.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub attempts: u32,
    pub initial: Duration,
}

impl Backoff {
    pub fn new(attempts: u32, initial: Duration) -> Self {
        Self{ attempts, initial }
    }

    /// The delay to sleep after the given failed attempt (1-based),
    /// or None if that was the last attempt.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.attempts {
            return None;
        }
        Some(self.initial * 2u32.saturating_pow(attempt - 1))
    }

    /// Run f until it succeeds or the attempts are exhausted, returning the last error.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut f: F) -> Result<T>
        where F: FnMut() -> Fut, Fut: Future<Output=Result<T>>
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(v) => {
                    info!(%label, attempt, "connected");
                    return Ok(v);
                },
                Err(e) => {
                    match self.delay_after(attempt) {
                        Some(delay) => {
                            warn!(%label, %e, retries_left = self.attempts - attempt, "failed to connect, retrying in {:?}", delay);
                            sleep(delay).await;
                            attempt += 1;
                        },
                        None => {
                            error!(%label, %e, attempts = self.attempts, "failed to connect after multiple attempts");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

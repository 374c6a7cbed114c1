//! Concurrency limit for message handlers.
//!
//! ```ignore
//! let limiter = HandlerLimiter::new(8)?;
//! let permit = limiter.acquire().await?;
//! // handle one message while holding the permit
//! drop(permit);
//! ```

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AppError;

/// Bounds the number of messages handled at once.
#[derive(Clone)]
pub struct HandlerLimiter {
    sem: Arc<Semaphore>,
}

impl HandlerLimiter {
    pub fn new(max_concurrent: usize) -> Result<Self, AppError> {
        if max_concurrent == 0 {
            return Err(AppError::Config(
                "worker.max_concurrent must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            sem: Arc::new(Semaphore::new(max_concurrent)),
        })
    }

    /// Waits for a free handler slot.
    pub async fn acquire(&self) -> Result<HandlerPermit, AppError> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Handler limiter closed".to_string()))?;
        Ok(HandlerPermit { _permit: permit })
    }
}

/// A held handler slot, released on drop.
pub struct HandlerPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_zero_is_a_config_error() {
        assert!(matches!(HandlerLimiter::new(0), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_permits_are_released_on_drop() {
        let limiter = HandlerLimiter::new(2).unwrap();
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();

        // Full: a third acquire does not complete
        assert!(timeout(Duration::from_millis(20), limiter.acquire()).await.is_err());

        drop(a);
        timeout(Duration::from_secs(1), limiter.acquire())
            .await
            .expect("a dropped permit frees its slot")
            .unwrap();
    }

    #[tokio::test]
    async fn test_acquire_waits_for_a_slot() {
        let limiter = HandlerLimiter::new(1).unwrap();
        let held = limiter.acquire().await.unwrap();

        let waiting = limiter.clone();
        let handle = tokio::spawn(async move { waiting.acquire().await.map(|_| ()) });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(held);
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("acquire should complete once the slot frees")
            .unwrap()
            .unwrap();
    }
}

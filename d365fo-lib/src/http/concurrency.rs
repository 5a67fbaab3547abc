//! Concurrency limiting for simultaneous requests.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::sync::SemaphorePermit;

/// Limits the number of concurrent requests.
///
/// Wraps a `tokio::sync::Semaphore` to enforce a maximum number of
/// simultaneous requests against the environment. Default limit is 10.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    /// Creates a new concurrency limiter with the specified limit.
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Acquires a permit, waiting if necessary.
    ///
    /// The permit is released when dropped.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("semaphore should not be closed")
    }

    /// Returns the configured limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the number of available permits.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_track_acquisition() {
        let limiter = ConcurrencyLimiter::new(2);
        assert_eq!(limiter.available(), 2);

        let permit = limiter.acquire().await;
        assert_eq!(limiter.available(), 1);

        drop(permit);
        assert_eq!(limiter.available(), 2);
    }
}

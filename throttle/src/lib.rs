//! Request throttling and rate limiting for secret store operations
//!
//! Every request sent to a secret store goes through two optional limits:
//!
//! 1. **Concurrent requests** - caps how many requests are in flight at once
//! 2. **Operations throttle** - caps how many requests are started per second
//!
//! Both are disabled until configured with a non-zero value, so library code can call
//! [`request_permit`] and [`get_ops_token`] unconditionally.
//!
//! # Usage
//!
//! ```rust,no_run
//! use throttle::{get_ops_token, init_ops_tokens, request_permit, run_ops_replenish_thread, set_max_requests};
//! use std::time::Duration;
//!
//! # async fn example() {
//! // at most 32 requests in flight
//! set_max_requests(32);
//!
//! // 100 requests per second: 10 tokens every 100ms
//! init_ops_tokens(10);
//! tokio::spawn(run_ops_replenish_thread(10, Duration::from_millis(100)));
//!
//! // before each request
//! get_ops_token().await;
//! let _permit = request_permit().await;
//! // send the request here - the permit is released when dropped
//! # }
//! ```
//!
//! # Replenishment
//!
//! Operation tokens are consumed (never returned) and a background task tops the bucket back up
//! to `replenish` tokens every `interval`. Use [`ops_replenish_schedule`] to turn a
//! requests-per-second figure into a `(tokens, interval)` pair.

mod semaphore;

static MAX_REQUESTS: std::sync::LazyLock<semaphore::Semaphore> =
    std::sync::LazyLock::new(semaphore::Semaphore::new);
static OPS_THROTTLE: std::sync::LazyLock<semaphore::Semaphore> =
    std::sync::LazyLock::new(semaphore::Semaphore::new);

/// Limit the number of concurrently running requests, 0 disables the limit.
pub fn set_max_requests(max_requests: usize) {
    tracing::debug!("max concurrent requests: {}", max_requests);
    MAX_REQUESTS.setup(max_requests);
}

pub struct RequestGuard {
    _permit: Option<tokio::sync::SemaphorePermit<'static>>,
}

pub async fn request_permit() -> RequestGuard {
    RequestGuard {
        _permit: MAX_REQUESTS.acquire().await,
    }
}

pub fn init_ops_tokens(ops_tokens: usize) {
    tracing::debug!("ops tokens per interval: {}", ops_tokens);
    OPS_THROTTLE.setup(ops_tokens);
}

pub async fn get_ops_token() {
    OPS_THROTTLE.consume().await;
}

pub async fn run_ops_replenish_thread(replenish: usize, interval: std::time::Duration) {
    OPS_THROTTLE.run_replenish_thread(replenish, interval).await;
}

/// Split a per-second rate into `(tokens, interval)`.
///
/// Rates of at least 10/s are replenished every 100ms to smooth out bursts, slower rates once a
/// second.
#[must_use]
pub fn ops_replenish_schedule(ops_per_second: usize) -> (usize, std::time::Duration) {
    if ops_per_second >= 10 {
        (ops_per_second / 10, std::time::Duration::from_millis(100))
    } else {
        (ops_per_second, std::time::Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::semaphore::Semaphore;
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn disabled_semaphore_never_blocks() {
        let sem = Semaphore::new();
        assert!(sem.acquire().await.is_none());
        for _ in 0..1000 {
            sem.consume().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn permits_limit_concurrency() {
        let sem = Semaphore::new();
        sem.setup(1);
        let first = sem.acquire().await;
        assert!(first.is_some());
        let second = tokio::time::timeout(Duration::from_secs(1), sem.acquire()).await;
        assert!(second.is_err(), "second permit must wait for the first one");
        drop(first);
        let third = tokio::time::timeout(Duration::from_secs(1), sem.acquire()).await;
        assert!(matches!(third, Ok(Some(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn consume_waits_for_replenish() {
        let sem = std::sync::Arc::new(Semaphore::new());
        sem.setup(2);
        sem.consume().await;
        sem.consume().await;
        let start = tokio::time::Instant::now();
        let replenish = {
            let sem = sem.clone();
            tokio::spawn(async move {
                sem.run_replenish_thread(2, Duration::from_millis(100))
                    .await;
            })
        };
        sem.consume().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
        replenish.abort();
    }

    #[test]
    fn replenish_schedule() {
        assert_eq!(
            ops_replenish_schedule(250),
            (25, Duration::from_millis(100))
        );
        assert_eq!(ops_replenish_schedule(4), (4, Duration::from_secs(1)));
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use lobster_types::{AccountId, LobsterError, Result};

#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_start: Instant,
    count: u32,
}

/// Fixed-window request limiter keyed by account.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    buckets: Arc<RwLock<HashMap<AccountId, Bucket>>>,
}

impl RateLimiter {
    /// `limit == 0` disables limiting.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub async fn check(&self, account: AccountId) -> Result<()> {
        if self.limit == 0 {
            return Ok(());
        }
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(account).or_insert(Bucket {
            window_start: now,
            count: 0,
        });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.window_start = now;
            bucket.count = 0;
        }
        if bucket.count >= self.limit {
            let remaining = self
                .window
                .saturating_sub(now.duration_since(bucket.window_start));
            tracing::warn!("Account {} rate limited", account);
            return Err(LobsterError::RateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }
        bucket.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_limit_per_account() {
        let limiter = RateLimiter::per_minute(2);
        let a = Uuid::new_v4();
        limiter.check(a).await.unwrap();
        limiter.check(a).await.unwrap();
        assert!(matches!(
            limiter.check(a).await,
            Err(LobsterError::RateLimited { .. })
        ));
        limiter.check(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        let a = Uuid::new_v4();
        limiter.check(a).await.unwrap();
        assert!(limiter.check(a).await.is_err());
        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.check(a).await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_disables() {
        let limiter = RateLimiter::per_minute(0);
        let a = Uuid::new_v4();
        for _ in 0..100 {
            limiter.check(a).await.unwrap();
        }
    }
}

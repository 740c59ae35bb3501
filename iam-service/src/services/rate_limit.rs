use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use redis::{aio::ConnectionManager, Client};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    pub fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
        }
    }
}

/// Counter store for login throttling. Errors are surfaced so callers can
/// fail closed.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, anyhow::Error>;
    /// Drops keys whose quota has fully replenished. Returns how many remain.
    async fn evict_idle(&self) -> Result<usize, anyhow::Error>;
}

pub fn rate_limit_key(ip_address: &str, identifier: &str) -> String {
    format!("login:{}:{}", ip_address, identifier.to_lowercase())
}

fn login_quota(attempts: u32, window_seconds: u64) -> Result<Quota, anyhow::Error> {
    let attempts = attempts.max(1);
    let period = Duration::from_millis((window_seconds.max(1) * 1000) / attempts as u64);
    let burst = NonZeroU32::new(attempts)
        .ok_or_else(|| anyhow::anyhow!("attempts must be non-zero"))?;
    let quota = Quota::with_period(period)
        .ok_or_else(|| anyhow::anyhow!("Failed to create quota with period {:?}", period))?
        .allow_burst(burst);
    Ok(quota)
}

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// In-process keyed GCRA limiter.
pub struct GovernorRateLimitStore {
    limiter: KeyedLimiter,
    clock: DefaultClock,
}

impl GovernorRateLimitStore {
    pub fn new(config: &RateLimitConfig) -> Result<Self, anyhow::Error> {
        let quota = login_quota(config.login_attempts, config.window_seconds)?;
        Ok(Self {
            limiter: RateLimiter::dashmap(quota),
            clock: DefaultClock::default(),
        })
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}

#[async_trait]
impl RateLimitStore for GovernorRateLimitStore {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, anyhow::Error> {
        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(RateLimitDecision::allow()),
            Err(negative) => Ok(RateLimitDecision::deny(
                negative.wait_time_from(self.clock.now()),
            )),
        }
    }

    async fn evict_idle(&self) -> Result<usize, anyhow::Error> {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        Ok(self.limiter.len())
    }
}

/// Fixed-window counter in Redis. Keys expire with the window.
#[derive(Clone)]
pub struct RedisRateLimitStore {
    manager: ConnectionManager,
    limit: u32,
    window_seconds: u64,
}

impl RedisRateLimitStore {
    pub async fn connect(url: &str, config: &RateLimitConfig) -> Result<Self, anyhow::Error> {
        let client = Client::open(url)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;
        Ok(Self::with_manager(manager, config))
    }

    pub fn with_manager(manager: ConnectionManager, config: &RateLimitConfig) -> Self {
        Self {
            manager,
            limit: config.login_attempts.max(1),
            window_seconds: config.window_seconds.max(1),
        }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = format!("ratelimit:{}", key);

        let count: u64 = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment rate limit counter: {}", e))?;

        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(self.window_seconds)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to set rate limit window: {}", e))?;
        }

        if count <= self.limit as u64 {
            return Ok(RateLimitDecision::allow());
        }

        let ttl: i64 = redis::cmd("TTL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read rate limit window: {}", e))?;
        let retry = if ttl > 0 { ttl as u64 } else { self.window_seconds };
        Ok(RateLimitDecision::deny(Duration::from_secs(retry)))
    }

    async fn evict_idle(&self) -> Result<usize, anyhow::Error> {
        Ok(0)
    }
}

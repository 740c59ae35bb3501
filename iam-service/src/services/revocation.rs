use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};

/// Set of revoked token keys. An entry only has to live until the token it
/// names would have expired anyway.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn revoke(&self, key: &str, expires_at: DateTime<Utc>) -> Result<(), anyhow::Error>;
    async fn is_revoked(&self, key: &str) -> Result<bool, anyhow::Error>;
    /// Drops entries whose token has expired. Returns how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, anyhow::Error>;
}

#[derive(Default)]
pub struct InMemoryRevocationStore {
    entries: DashMap<String, DateTime<Utc>>,
}

impl InMemoryRevocationStore {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn revoke(&self, key: &str, expires_at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        // Keep the later expiry if the key is revoked twice.
        self.entries
            .entry(key.to_string())
            .and_modify(|existing| {
                if expires_at > *existing {
                    *existing = expires_at;
                }
            })
            .or_insert(expires_at);
        Ok(())
    }

    async fn is_revoked(&self, key: &str) -> Result<bool, anyhow::Error> {
        Ok(self.entries.contains_key(key))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, anyhow::Error> {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }
}

/// Redis-backed store. Entries carry a TTL, so Redis does the eviction.
#[derive(Clone)]
pub struct RedisRevocationStore {
    manager: ConnectionManager,
}

impl RedisRevocationStore {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting revocation store to Redis");
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;
        Ok(Self::with_manager(manager))
    }

    pub fn with_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    fn key(token_key: &str) -> String {
        format!("revoked:{}", token_key)
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn revoke(&self, key: &str, expires_at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let ttl = (expires_at - Utc::now()).num_seconds().max(1);
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(Self::key(key))
            .arg("revoked")
            .arg("EX")
            .arg(ttl)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to revoke token: {}", e))
    }

    async fn is_revoked(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("EXISTS")
            .arg(Self::key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check revocation: {}", e))
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, anyhow::Error> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn purge_keeps_live_entries() {
        let store = InMemoryRevocationStore::default();
        let now = Utc::now();
        store.revoke("old", now - Duration::seconds(1)).await.unwrap();
        store.revoke("live", now + Duration::minutes(5)).await.unwrap();

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(!store.is_revoked("old").await.unwrap());
        assert!(store.is_revoked("live").await.unwrap());
    }

    #[tokio::test]
    async fn second_revoke_never_shortens_the_entry() {
        let store = InMemoryRevocationStore::default();
        let now = Utc::now();
        store.revoke("jti", now + Duration::hours(1)).await.unwrap();
        store.revoke("jti", now + Duration::minutes(1)).await.unwrap();

        store.purge_expired(now + Duration::minutes(30)).await.unwrap();
        assert!(store.is_revoked("jti").await.unwrap());
    }
}

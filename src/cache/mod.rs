//! Redis cache layer
//!
//! Caches resolved role names per (subject, domain). Entries are
//! invalidated synchronously on every assignment or policy mutation for
//! the affected scope; the TTL is a backstop, not the consistency
//! mechanism. Cache failures degrade to database reads.

use crate::config::RedisConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Cache key prefixes
mod keys {
    pub const SUBJECT_ROLES: &str = "aegis:subject_roles";
}

/// Default TTLs
mod ttl {
    pub const SUBJECT_ROLES_SECS: u64 = 300; // 5 minutes
}

/// Cache operations used by the resolvers and services.
#[async_trait]
pub trait CacheOperations: Send + Sync {
    async fn get_subject_roles(
        &self,
        subject: &str,
        domain_key: &str,
    ) -> Result<Option<Vec<String>>>;

    async fn set_subject_roles(
        &self,
        subject: &str,
        domain_key: &str,
        roles: &[String],
    ) -> Result<()>;

    /// Drop cached resolutions for a subject after an assignment
    /// mutation. A tenant-scoped mutation affects one domain; a global
    /// mutation affects every tenant domain of the application.
    async fn invalidate_subject_roles(
        &self,
        subject: &str,
        application_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<()>;

    /// Drop every cached resolution for a domain after a policy or
    /// grouping mutation in that scope.
    async fn invalidate_domain(&self, domain_key: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

/// Cache manager for Redis operations
#[derive(Clone)]
pub struct CacheManager {
    conn: ConnectionManager,
}

impl CacheManager {
    /// Create a new cache manager
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create Redis client: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to connect to Redis: {}", e)))?;

        Ok(Self { conn })
    }

    fn subject_roles_key(subject: &str, domain_key: &str) -> String {
        format!("{}:{}:{}", keys::SUBJECT_ROLES, subject, domain_key)
    }

    /// Get a value from cache
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;

        match value {
            Some(v) => {
                let parsed = serde_json::from_str(&v)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("Cache deserialize error: {}", e)))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Set a value in cache with TTL
    async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(value)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cache serialize error: {}", e)))?;

        let _: () = conn.set_ex(key, serialized, ttl.as_secs()).await?;
        Ok(())
    }

    /// Delete a key from cache
    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// Delete keys matching a pattern
    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await?;

        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CacheOperations for CacheManager {
    async fn get_subject_roles(
        &self,
        subject: &str,
        domain_key: &str,
    ) -> Result<Option<Vec<String>>> {
        self.get(&Self::subject_roles_key(subject, domain_key)).await
    }

    async fn set_subject_roles(
        &self,
        subject: &str,
        domain_key: &str,
        roles: &[String],
    ) -> Result<()> {
        self.set(
            &Self::subject_roles_key(subject, domain_key),
            &roles,
            Duration::from_secs(ttl::SUBJECT_ROLES_SECS),
        )
        .await
    }

    async fn invalidate_subject_roles(
        &self,
        subject: &str,
        application_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<()> {
        match tenant_id {
            Some(tenant) => {
                let key = format!(
                    "{}:{}:{}:{}",
                    keys::SUBJECT_ROLES,
                    subject,
                    application_id,
                    tenant
                );
                self.delete(&key).await
            }
            None => {
                let pattern = format!("{}:{}:{}:*", keys::SUBJECT_ROLES, subject, application_id);
                self.delete_pattern(&pattern).await
            }
        }
    }

    async fn invalidate_domain(&self, domain_key: &str) -> Result<()> {
        let pattern = format!("{}:*:{}", keys::SUBJECT_ROLES, domain_key);
        self.delete_pattern(&pattern).await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Cache that stores nothing. Used when Redis is disabled and in tests.
#[derive(Debug, Clone, Default)]
pub struct NoopCache;

#[async_trait]
impl CacheOperations for NoopCache {
    async fn get_subject_roles(&self, _: &str, _: &str) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    async fn set_subject_roles(&self, _: &str, _: &str, _: &[String]) -> Result<()> {
        Ok(())
    }

    async fn invalidate_subject_roles(&self, _: &str, _: &str, _: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn invalidate_domain(&self, _: &str) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

//! Audit log repository
//!
//! The append path is the one concurrency-sensitive write in the whole
//! subsystem: two writers that read the same tail hash would fork the
//! chain. `append` therefore reads the tail with `FOR UPDATE` and
//! inserts inside the same transaction, serializing appends per chain
//! scope across processes.

use crate::domain::audit::{compute_record_hash, truncate_to_micros, CanonicalEvent};
use crate::domain::{AuditLogEntry, AuditLogFilter, ChainScope, RecordEventInput};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append an entry to the chain scope given by `input.tenant_id`.
    async fn append(&self, input: &RecordEventInput) -> Result<AuditLogEntry>;

    /// Filtered page of entries for one chain scope, in chain order.
    async fn find(
        &self,
        scope: &ChainScope,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLogEntry>>;

    /// Count of entries matching the filter in one chain scope.
    async fn count(&self, scope: &ChainScope, filter: &AuditLogFilter) -> Result<i64>;

    /// Point lookup by internal numeric id, scoped.
    async fn find_by_internal_id(
        &self,
        scope: &ChainScope,
        id: i64,
    ) -> Result<Option<AuditLogEntry>>;

    /// Chain walk: entries with `chain_seq > after_seq`, ascending.
    async fn fetch_chain_page(
        &self,
        scope: &ChainScope,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>>;
}

pub struct AuditRepositoryImpl {
    pool: MySqlPool,
}

impl AuditRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const ENTRY_COLUMNS: &str = "id, chain_seq, event_type, user_id, tenant_id, resource, action, \
     actor_id, actor_ip, actor_user_agent, details, previous_hash, record_hash, created_at";

/// Append the scope predicate. Every query against audit_logs carries
/// one; the global chain is NULL tenant, never a wildcard.
fn push_scope(sql: &mut String, scope: &ChainScope) {
    match scope {
        ChainScope::Tenant(_) => sql.push_str(" AND tenant_id = ?"),
        ChainScope::Global => sql.push_str(" AND tenant_id IS NULL"),
    }
}

fn push_filter(sql: &mut String, filter: &AuditLogFilter) {
    if filter.event_type.is_some() {
        sql.push_str(" AND event_type = ?");
    }
    if filter.actor_id.is_some() {
        sql.push_str(" AND actor_id = ?");
    }
    if filter.resource_type.is_some() {
        sql.push_str(" AND resource = ?");
    }
    if filter.ip_address.is_some() {
        sql.push_str(" AND actor_ip = ?");
    }
    if filter.timestamp_after.is_some() {
        sql.push_str(" AND created_at >= ?");
    }
    if filter.timestamp_before.is_some() {
        sql.push_str(" AND created_at <= ?");
    }
}

#[async_trait]
impl AuditRepository for AuditRepositoryImpl {
    async fn append(&self, input: &RecordEventInput) -> Result<AuditLogEntry> {
        let mut tx = self.pool.begin().await?;

        let scope = ChainScope::from_tenant_id(input.tenant_id.as_deref());
        let mut tail_sql = String::from("SELECT chain_seq, record_hash FROM audit_logs WHERE 1=1");
        push_scope(&mut tail_sql, &scope);
        tail_sql.push_str(" ORDER BY chain_seq DESC LIMIT 1 FOR UPDATE");

        let mut tail_query = sqlx::query_as::<_, (i64, String)>(&tail_sql);
        if let ChainScope::Tenant(tenant) = &scope {
            tail_query = tail_query.bind(tenant);
        }
        let tail = tail_query.fetch_optional(&mut *tx).await?;

        let (chain_seq, previous_hash) = match tail {
            Some((seq, hash)) => (seq + 1, Some(hash)),
            None => (1, None),
        };

        let created_at = truncate_to_micros(Utc::now());
        let record_hash = compute_record_hash(
            previous_hash.as_deref(),
            &CanonicalEvent {
                chain_seq,
                timestamp_micros: created_at.timestamp_micros(),
                event_type: &input.event_type,
                user_id: &input.user_id,
                tenant_id: input.tenant_id.as_deref(),
                resource: &input.resource,
                action: &input.action,
                actor_id: &input.actor_id,
                actor_ip: input.actor_ip.as_deref(),
                actor_user_agent: input.actor_user_agent.as_deref(),
                details: &input.details,
            },
        );

        let details_json = serde_json::to_string(&input.details)
            .map_err(|e| anyhow::anyhow!("Failed to serialize audit details: {}", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs
                (chain_seq, tenant_id, event_type, user_id, resource, action,
                 actor_id, actor_ip, actor_user_agent, details, previous_hash, record_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chain_seq)
        .bind(&input.tenant_id)
        .bind(&input.event_type)
        .bind(&input.user_id)
        .bind(&input.resource)
        .bind(&input.action)
        .bind(&input.actor_id)
        .bind(&input.actor_ip)
        .bind(&input.actor_user_agent)
        .bind(&details_json)
        .bind(&previous_hash)
        .bind(&record_hash)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_id() as i64;
        tx.commit().await?;

        Ok(AuditLogEntry {
            id,
            event_id: String::new(),
            chain_seq,
            event_type: input.event_type.clone(),
            user_id: input.user_id.clone(),
            tenant_id: input.tenant_id.clone(),
            resource: input.resource.clone(),
            action: input.action.clone(),
            actor_id: input.actor_id.clone(),
            actor_ip: input.actor_ip.clone(),
            actor_user_agent: input.actor_user_agent.clone(),
            details: input.details.clone(),
            previous_hash,
            record_hash,
            created_at,
        }
        .with_event_id())
    }

    async fn find(
        &self,
        scope: &ChainScope,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLogEntry>> {
        let mut sql = format!("SELECT {} FROM audit_logs WHERE 1=1", ENTRY_COLUMNS);
        push_scope(&mut sql, scope);
        push_filter(&mut sql, filter);
        sql.push_str(" ORDER BY id LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, AuditLogEntry>(&sql);
        if let ChainScope::Tenant(tenant) = scope {
            query = query.bind(tenant);
        }
        if let Some(ref event_type) = filter.event_type {
            query = query.bind(event_type);
        }
        if let Some(ref actor_id) = filter.actor_id {
            query = query.bind(actor_id);
        }
        if let Some(ref resource_type) = filter.resource_type {
            query = query.bind(resource_type);
        }
        if let Some(ref ip_address) = filter.ip_address {
            query = query.bind(ip_address);
        }
        if let Some(timestamp_after) = filter.timestamp_after {
            query = query.bind(timestamp_after);
        }
        if let Some(timestamp_before) = filter.timestamp_before {
            query = query.bind(timestamp_before);
        }
        query = query.bind(limit).bind(offset);

        let entries = query.fetch_all(&self.pool).await?;
        Ok(entries
            .into_iter()
            .map(AuditLogEntry::with_event_id)
            .collect())
    }

    async fn count(&self, scope: &ChainScope, filter: &AuditLogFilter) -> Result<i64> {
        let mut sql = String::from("SELECT COUNT(*) FROM audit_logs WHERE 1=1");
        push_scope(&mut sql, scope);
        push_filter(&mut sql, filter);

        let mut query = sqlx::query_as::<_, (i64,)>(&sql);
        if let ChainScope::Tenant(tenant) = scope {
            query = query.bind(tenant);
        }
        if let Some(ref event_type) = filter.event_type {
            query = query.bind(event_type);
        }
        if let Some(ref actor_id) = filter.actor_id {
            query = query.bind(actor_id);
        }
        if let Some(ref resource_type) = filter.resource_type {
            query = query.bind(resource_type);
        }
        if let Some(ref ip_address) = filter.ip_address {
            query = query.bind(ip_address);
        }
        if let Some(timestamp_after) = filter.timestamp_after {
            query = query.bind(timestamp_after);
        }
        if let Some(timestamp_before) = filter.timestamp_before {
            query = query.bind(timestamp_before);
        }

        let (count,) = query.fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn find_by_internal_id(
        &self,
        scope: &ChainScope,
        id: i64,
    ) -> Result<Option<AuditLogEntry>> {
        let mut sql = format!("SELECT {} FROM audit_logs WHERE id = ?", ENTRY_COLUMNS);
        push_scope(&mut sql, scope);

        let mut query = sqlx::query_as::<_, AuditLogEntry>(&sql).bind(id);
        if let ChainScope::Tenant(tenant) = scope {
            query = query.bind(tenant);
        }

        let entry = query.fetch_optional(&self.pool).await?;
        Ok(entry.map(AuditLogEntry::with_event_id))
    }

    async fn fetch_chain_page(
        &self,
        scope: &ChainScope,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>> {
        let mut sql = format!(
            "SELECT {} FROM audit_logs WHERE chain_seq > ?",
            ENTRY_COLUMNS
        );
        push_scope(&mut sql, scope);
        sql.push_str(" ORDER BY chain_seq LIMIT ?");

        let mut query = sqlx::query_as::<_, AuditLogEntry>(&sql).bind(after_seq);
        if let ChainScope::Tenant(tenant) = scope {
            query = query.bind(tenant);
        }
        query = query.bind(limit);

        let entries = query.fetch_all(&self.pool).await?;
        Ok(entries
            .into_iter()
            .map(AuditLogEntry::with_event_id)
            .collect())
    }
}

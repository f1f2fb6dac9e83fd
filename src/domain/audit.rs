//! Audit log domain models and the tamper-evident hash chain
//!
//! Each entry commits to its predecessor via `previous_hash`, forming an
//! append-only chain per scope (one chain per tenant, one for global
//! events). `record_hash` is the SHA-256 of the previous hash followed by
//! a canonical serialization of the entry's fields, including its chain
//! sequence number, so tampering, deletion and reordering are all
//! detectable by replaying the chain from the first entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;

/// Sentinel predecessor used when hashing the first entry of a chain.
/// 64 hex zeros, a value that can never be the SHA-256 of real data.
/// The stored `previous_hash` of a genesis entry stays NULL.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Event type names recorded by the core services.
pub mod event_types {
    pub const ROLE_ASSIGNED: &str = "role.assigned";
    pub const ROLE_REMOVED: &str = "role.removed";
    pub const PERMISSION_GRANTED: &str = "permission.granted";
    pub const PERMISSION_DENIED: &str = "permission.denied";
    pub const POLICY_ADDED: &str = "policy.added";
    pub const POLICY_REMOVED: &str = "policy.removed";
}

/// Actor id recorded for automated (non-user) actors.
pub const SYSTEM_ACTOR: &str = "system";

/// The boundary within which hash-chain linkage is maintained and
/// verified: one chain per tenant, plus one global chain for events
/// with no tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChainScope {
    Global,
    Tenant(String),
}

impl ChainScope {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        ChainScope::Tenant(tenant_id.into())
    }

    pub fn from_tenant_id(tenant_id: Option<&str>) -> Self {
        match tenant_id {
            Some(tenant) => ChainScope::Tenant(tenant.to_string()),
            None => ChainScope::Global,
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        match self {
            ChainScope::Global => None,
            ChainScope::Tenant(tenant) => Some(tenant),
        }
    }
}

/// Immutable, hash-chained audit record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// Internal numeric id.
    pub id: i64,
    /// Public identifier, `evt_{id}`. Derived, not stored.
    #[sqlx(skip)]
    pub event_id: String,
    /// 1-based position within the entry's chain scope.
    pub chain_seq: i64,
    pub event_type: String,
    /// Subject of the event.
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub resource: String,
    pub action: String,
    /// Who performed the event; `"system"` for automated actors.
    pub actor_id: String,
    pub actor_ip: Option<String>,
    pub actor_user_agent: Option<String>,
    #[sqlx(json)]
    pub details: serde_json::Value,
    /// None only for the first entry in a chain.
    pub previous_hash: Option<String>,
    pub record_hash: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Fill in the derived public id after a row fetch.
    pub fn with_event_id(mut self) -> Self {
        self.event_id = format!("evt_{}", self.id);
        self
    }

    /// Recompute this entry's hash from its stored fields.
    pub fn expected_hash(&self) -> String {
        compute_record_hash(
            self.previous_hash.as_deref(),
            &CanonicalEvent {
                chain_seq: self.chain_seq,
                timestamp_micros: self.created_at.timestamp_micros(),
                event_type: &self.event_type,
                user_id: &self.user_id,
                tenant_id: self.tenant_id.as_deref(),
                resource: &self.resource,
                action: &self.action,
                actor_id: &self.actor_id,
                actor_ip: self.actor_ip.as_deref(),
                actor_user_agent: self.actor_user_agent.as_deref(),
                details: &self.details,
            },
        )
    }
}

/// The fields committed to by `record_hash`, in their canonical order.
#[derive(Debug)]
pub struct CanonicalEvent<'a> {
    pub chain_seq: i64,
    pub timestamp_micros: i64,
    pub event_type: &'a str,
    pub user_id: &'a str,
    pub tenant_id: Option<&'a str>,
    pub resource: &'a str,
    pub action: &'a str,
    pub actor_id: &'a str,
    pub actor_ip: Option<&'a str>,
    pub actor_user_agent: Option<&'a str>,
    pub details: &'a serde_json::Value,
}

/// `SHA256(previous-or-genesis ‖ canonical fields)`, hex encoded.
///
/// `details` is serialized with serde_json, whose maps are key-ordered,
/// so the digest is stable across storage round-trips even when the
/// database normalizes JSON columns.
pub fn compute_record_hash(previous: Option<&str>, event: &CanonicalEvent<'_>) -> String {
    let details = serde_json::to_string(event.details).unwrap_or_default();
    let canonical = format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}",
        event.chain_seq,
        event.timestamp_micros,
        event.event_type,
        event.user_id,
        event.tenant_id.unwrap_or(""),
        event.resource,
        event.action,
        event.actor_id,
        event.actor_ip.unwrap_or(""),
        event.actor_user_agent.unwrap_or(""),
    );

    let mut hasher = Sha256::new();
    hasher.update(previous.unwrap_or(GENESIS_HASH).as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_bytes());
    hasher.update(b"\n");
    hasher.update(details.as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncate to microsecond precision so in-memory timestamps match what
/// the DATETIME(6) column returns; the hash covers the stored precision.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

/// Parse a public `evt_{n}` identifier into the internal numeric id.
/// Returns None for anything that does not match the format.
pub fn parse_event_id(event_id: &str) -> Option<i64> {
    let digits = event_id.strip_prefix("evt_")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id: i64 = digits.parse().ok()?;
    if id < 1 {
        return None;
    }
    Some(id)
}

/// Input for recording an audit event.
#[derive(Debug, Clone)]
pub struct RecordEventInput {
    pub event_type: String,
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub resource: String,
    pub action: String,
    pub actor_id: String,
    pub actor_ip: Option<String>,
    pub actor_user_agent: Option<String>,
    pub details: serde_json::Value,
}

/// Audit log filter parameters. Timestamp bounds are inclusive.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogFilter {
    pub event_type: Option<String>,
    pub actor_id: Option<String>,
    /// Matches the entry's `resource` field.
    pub resource_type: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp_after: Option<DateTime<Utc>>,
    pub timestamp_before: Option<DateTime<Utc>>,
}

/// Result of replaying a chain scope from its first entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    pub entries_checked: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<ChainViolation>,
}

impl ChainVerification {
    pub fn clean(entries_checked: i64) -> Self {
        Self {
            valid: true,
            entries_checked,
            violation: None,
        }
    }

    pub fn broken(entries_checked: i64, violation: ChainViolation) -> Self {
        Self {
            valid: false,
            entries_checked,
            violation: Some(violation),
        }
    }
}

/// First broken link found while verifying a chain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainViolation {
    pub chain_seq: i64,
    pub entry_id: i64,
    pub kind: ChainViolationKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChainViolationKind {
    /// A stored field no longer matches the entry's record hash.
    TamperedEntry,
    /// `previous_hash` does not match the predecessor's record hash.
    BrokenLink,
    /// The chain sequence is not contiguous (an entry was removed).
    SequenceGap,
}

//! Role and role-assignment domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::common::prefixed_id;

/// Named permission bundle, scoped by application and optionally tenant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub name: String,
    pub application_id: String,
    /// None means a global role usable by any tenant of the application.
    pub tenant_id: Option<String>,
    pub is_system_role: bool,
    pub created_at: DateTime<Utc>,
}

/// The audit-grade record of a user holding a role.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub id: String,
    pub user_id: String,
    pub role_id: String,
    pub application_id: String,
    /// None is a global assignment, distinct from any concrete tenant.
    pub tenant_id: Option<String>,
    pub assigned_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RoleAssignment {
    pub fn new(
        user_id: impl Into<String>,
        role_id: impl Into<String>,
        application_id: impl Into<String>,
        tenant_id: Option<String>,
        assigned_by: Option<String>,
    ) -> Self {
        Self {
            id: prefixed_id("ura"),
            user_id: user_id.into(),
            role_id: role_id.into(),
            application_id: application_id.into(),
            tenant_id,
            assigned_by,
            created_at: Utc::now(),
        }
    }
}

/// Input for assigning a role to a user
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignRoleInput {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
    #[validate(length(min = 1, max = 64))]
    pub role_id: String,
    #[validate(length(min = 1, max = 64))]
    pub application_id: String,
    #[validate(length(min = 1, max = 64))]
    pub tenant_id: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub assigned_by: Option<String>,
}

/// Input for creating a role
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub application_id: String,
    #[validate(length(min = 1, max = 64))]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub is_system_role: bool,
}

/// Three-valued tenant filter for assignment queries.
///
/// `Any` applies no tenant predicate, `GlobalOnly` matches NULL tenants
/// only, and `Tenant` matches that tenant exactly (it does not
/// implicitly include global assignments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantFilter {
    Any,
    GlobalOnly,
    Tenant(String),
}

impl TenantFilter {
    /// Filter matching exactly the given optional tenant.
    pub fn exact(tenant_id: Option<&str>) -> Self {
        match tenant_id {
            Some(t) => TenantFilter::Tenant(t.to_string()),
            None => TenantFilter::GlobalOnly,
        }
    }
}

//! Role resolution strategies
//!
//! Two interchangeable sources of a subject's roles in a domain:
//!
//! - [`AssignmentRoleResolver`] reads role-assignment rows at
//!   enforcement time. The database stays the sole source of truth, so
//!   there is no grouping state to drift. This is the default.
//! - [`GroupingRuleResolver`] reads grouping rules projected into the
//!   policy store by the role assignment service. Cheaper lookups, but
//!   divergence after a restore or manual fix requires `resync_user`.

use crate::cache::CacheOperations;
use crate::domain::Domain;
use crate::error::Result;
use crate::repository::{PolicyRepository, RoleRepository};
use async_trait::async_trait;
use std::sync::Arc;

/// Source of a subject's resolved role names within a domain.
///
/// Both tenant-scoped and application-global assignments contribute;
/// tenant-scoped names come first.
#[async_trait]
pub trait RoleResolver: Send + Sync {
    async fn resolve_roles(&self, subject: &str, domain: &Domain) -> Result<Vec<String>>;
}

/// Resolves roles from role-assignment rows, with an optional cache tier.
pub struct AssignmentRoleResolver<R: RoleRepository> {
    repo: Arc<R>,
    cache: Option<Arc<dyn CacheOperations>>,
}

impl<R: RoleRepository> AssignmentRoleResolver<R> {
    pub fn new(repo: Arc<R>, cache: Option<Arc<dyn CacheOperations>>) -> Self {
        Self { repo, cache }
    }
}

#[async_trait]
impl<R: RoleRepository> RoleResolver for AssignmentRoleResolver<R> {
    async fn resolve_roles(&self, subject: &str, domain: &Domain) -> Result<Vec<String>> {
        let domain_key = domain.key();

        if let Some(cache) = &self.cache {
            match cache.get_subject_roles(subject, &domain_key).await {
                Ok(Some(roles)) => return Ok(roles),
                Ok(None) => {}
                Err(e) => tracing::warn!("Role cache read failed, falling back to db: {}", e),
            }
        }

        let roles = self
            .repo
            .find_user_role_names(subject, &domain.application_id, &domain.tenant_id)
            .await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set_subject_roles(subject, &domain_key, &roles).await {
                tracing::warn!("Role cache write failed: {}", e);
            }
        }

        Ok(roles)
    }
}

/// Resolves roles from projected grouping rules in the policy store.
pub struct GroupingRuleResolver<P: PolicyRepository> {
    repo: Arc<P>,
}

impl<P: PolicyRepository> GroupingRuleResolver<P> {
    pub fn new(repo: Arc<P>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl<P: PolicyRepository> RoleResolver for GroupingRuleResolver<P> {
    async fn resolve_roles(&self, subject: &str, domain: &Domain) -> Result<Vec<String>> {
        let mut roles = self
            .repo
            .find_roles_for_subject(subject, &domain.key())
            .await?;

        if !domain.is_global() {
            let global = self
                .repo
                .find_roles_for_subject(subject, &domain.to_global().key())
                .await?;
            for role in global {
                if !roles.contains(&role) {
                    roles.push(role);
                }
            }
        }

        Ok(roles)
    }
}

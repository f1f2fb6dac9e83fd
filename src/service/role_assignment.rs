//! Role assignment business logic
//!
//! The assignment table is the authoritative record of who holds which
//! role. Every successful mutation emits an audit event and invalidates
//! the affected cache scope; when grouping projection is enabled the
//! mutation is also mirrored into the policy store, and `resync_user`
//! repairs projection drift after a restore or manual data fix.

use crate::cache::CacheOperations;
use crate::domain::audit::{event_types, SYSTEM_ACTOR};
use crate::domain::{
    AssignRoleInput, CreateRoleInput, Domain, PolicyRule, RecordEventInput, Role, RoleAssignment,
    TenantFilter,
};
use crate::error::{AppError, Result};
use crate::repository::{AuditRepository, PolicyRepository, RoleRepository};
use crate::service::audit::AuditService;
use crate::service::ActorContext;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

pub struct RoleAssignmentService<R: RoleRepository, P: PolicyRepository, A: AuditRepository> {
    role_repo: Arc<R>,
    policy_repo: Arc<P>,
    audit: Option<Arc<AuditService<A>>>,
    cache: Option<Arc<dyn CacheOperations>>,
    grouping_projection: bool,
}

impl<R: RoleRepository, P: PolicyRepository, A: AuditRepository> RoleAssignmentService<R, P, A> {
    pub fn new(
        role_repo: Arc<R>,
        policy_repo: Arc<P>,
        audit: Option<Arc<AuditService<A>>>,
        cache: Option<Arc<dyn CacheOperations>>,
        grouping_projection: bool,
    ) -> Self {
        Self {
            role_repo,
            policy_repo,
            audit,
            cache,
            grouping_projection,
        }
    }

    async fn invalidate_cache(&self, user_id: &str, application_id: &str, tenant_id: Option<&str>) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache
                .invalidate_subject_roles(user_id, application_id, tenant_id)
                .await
            {
                tracing::warn!("Role cache invalidation failed: {}", e);
            }
        }
    }

    /// Assign a role to a user. Idempotent: re-assigning an existing
    /// combination returns the stored record with no side effects.
    pub async fn assign_role(
        &self,
        input: AssignRoleInput,
        actor: &ActorContext,
    ) -> Result<RoleAssignment> {
        input.validate()?;

        let role = self
            .role_repo
            .find_role_by_id(&input.role_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Role {} not found", input.role_id)))?;

        if role.application_id != input.application_id {
            return Err(AppError::ScopeMismatch(format!(
                "Role {} belongs to application {}",
                role.id, role.application_id
            )));
        }
        if let (Some(tenant), Some(role_tenant)) =
            (input.tenant_id.as_deref(), role.tenant_id.as_deref())
        {
            if tenant != role_tenant {
                return Err(AppError::ScopeMismatch(format!(
                    "Role {} is scoped to tenant {}",
                    role.id, role_tenant
                )));
            }
        }

        if let Some(existing) = self
            .role_repo
            .find_assignment(
                &input.user_id,
                &input.role_id,
                &input.application_id,
                &input.tenant_id,
            )
            .await?
        {
            return Ok(existing);
        }

        let assignment = RoleAssignment::new(
            input.user_id.clone(),
            input.role_id.clone(),
            input.application_id.clone(),
            input.tenant_id.clone(),
            input.assigned_by.clone(),
        );
        self.role_repo.insert_assignment(&assignment).await?;

        if self.grouping_projection {
            let domain = Domain::new(input.application_id.clone(), input.tenant_id.clone());
            self.policy_repo
                .add_rule(&PolicyRule::grouping(&input.user_id, &role.name, domain))
                .await?;
        }

        if let Some(audit) = &self.audit {
            audit
                .record(RecordEventInput {
                    event_type: event_types::ROLE_ASSIGNED.to_string(),
                    user_id: input.user_id.clone(),
                    tenant_id: input.tenant_id.clone(),
                    resource: "role".to_string(),
                    action: "assign".to_string(),
                    actor_id: input
                        .assigned_by
                        .clone()
                        .or_else(|| actor.actor_id.clone())
                        .unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
                    actor_ip: actor.ip.clone(),
                    actor_user_agent: actor.user_agent.clone(),
                    details: json!({
                        "assignmentId": assignment.id,
                        "roleId": role.id,
                        "roleName": role.name,
                        "applicationId": input.application_id,
                    }),
                })
                .await?;
        }

        self.invalidate_cache(
            &input.user_id,
            &input.application_id,
            input.tenant_id.as_deref(),
        )
        .await;

        Ok(assignment)
    }

    /// Remove one assignment. All four key fields must match, with NULL
    /// tenant distinct from any concrete value. Returns whether a row
    /// was removed.
    pub async fn remove_role(
        &self,
        user_id: &str,
        role_id: &str,
        application_id: &str,
        tenant_id: Option<&str>,
        actor: &ActorContext,
    ) -> Result<bool> {
        let tenant = tenant_id.map(String::from);
        let removed = self
            .role_repo
            .delete_assignment(user_id, role_id, application_id, &tenant)
            .await?;
        if !removed {
            return Ok(false);
        }

        let role = self.role_repo.find_role_by_id(role_id).await?;

        if self.grouping_projection {
            if let Some(role) = &role {
                let domain = Domain::new(application_id, tenant.clone());
                self.policy_repo
                    .remove_grouping_rule(user_id, &role.name, &domain.key())
                    .await?;
            }
        }

        if let Some(audit) = &self.audit {
            audit
                .record(RecordEventInput {
                    event_type: event_types::ROLE_REMOVED.to_string(),
                    user_id: user_id.to_string(),
                    tenant_id: tenant.clone(),
                    resource: "role".to_string(),
                    action: "remove".to_string(),
                    actor_id: actor
                        .actor_id
                        .clone()
                        .unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
                    actor_ip: actor.ip.clone(),
                    actor_user_agent: actor.user_agent.clone(),
                    details: json!({
                        "roleId": role_id,
                        "roleName": role.map(|r| r.name),
                        "applicationId": application_id,
                    }),
                })
                .await?;
        }

        self.invalidate_cache(user_id, application_id, tenant_id).await;

        Ok(true)
    }

    pub async fn get_user_roles(
        &self,
        user_id: &str,
        application_id: &str,
        tenant: &TenantFilter,
    ) -> Result<Vec<RoleAssignment>> {
        self.role_repo
            .find_user_assignments(user_id, application_id, tenant)
            .await
    }

    pub async fn get_user_role_names(
        &self,
        user_id: &str,
        application_id: &str,
        tenant: &TenantFilter,
    ) -> Result<Vec<String>> {
        let assignments = self
            .role_repo
            .find_user_assignments(user_id, application_id, tenant)
            .await?;

        let mut names = Vec::new();
        for assignment in &assignments {
            if let Some(role) = self.role_repo.find_role_by_id(&assignment.role_id).await? {
                if !names.contains(&role.name) {
                    names.push(role.name);
                }
            }
        }
        Ok(names)
    }

    pub async fn get_users_with_role(
        &self,
        role_id: &str,
        application_id: &str,
        tenant: &TenantFilter,
    ) -> Result<Vec<RoleAssignment>> {
        self.role_repo
            .find_assignments_for_role(role_id, application_id, tenant)
            .await
    }

    /// Remove every matching assignment one at a time, so each removal
    /// gets its own audit event and projection side effects.
    pub async fn remove_all_user_roles(
        &self,
        user_id: &str,
        application_id: &str,
        tenant: &TenantFilter,
        actor: &ActorContext,
    ) -> Result<u64> {
        let assignments = self.get_user_roles(user_id, application_id, tenant).await?;

        let mut removed = 0u64;
        for assignment in assignments {
            if self
                .remove_role(
                    &assignment.user_id,
                    &assignment.role_id,
                    &assignment.application_id,
                    assignment.tenant_id.as_deref(),
                    actor,
                )
                .await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Drift repair: rebuild the grouping rules for a user in a domain
    /// from the assignment rows. The replace runs in one transaction, so
    /// concurrent readers never observe the user with zero roles
    /// mid-sync. Returns the number of roles projected.
    pub async fn resync_user(&self, user_id: &str, domain: &Domain) -> Result<usize> {
        let filter = TenantFilter::exact(domain.tenant_id.as_deref());
        let assignments = self
            .role_repo
            .find_user_assignments(user_id, &domain.application_id, &filter)
            .await?;

        let mut roles = Vec::new();
        for assignment in &assignments {
            if let Some(role) = self.role_repo.find_role_by_id(&assignment.role_id).await? {
                if !roles.contains(&role.name) {
                    roles.push(role.name);
                }
            }
        }

        self.policy_repo
            .replace_grouping_rules(user_id, &domain.key(), &roles)
            .await?;

        self.invalidate_cache(user_id, &domain.application_id, domain.tenant_id.as_deref())
            .await;

        tracing::info!(
            user_id,
            domain = %domain,
            roles = roles.len(),
            "grouping rules resynchronized"
        );
        Ok(roles.len())
    }

    /// Whether the user resolves to `role_name` in the given scope.
    /// Both tenant-scoped and global assignments contribute.
    pub async fn has_role(
        &self,
        user_id: &str,
        role_name: &str,
        application_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<bool> {
        let names = self
            .role_repo
            .find_user_role_names(user_id, application_id, &tenant_id.map(String::from))
            .await?;
        Ok(names.iter().any(|name| name == role_name))
    }

    /// Roles usable by a tenant (its own plus the application's global ones).
    pub async fn list_roles(
        &self,
        application_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<Role>> {
        self.role_repo
            .list_roles(application_id, &tenant_id.map(String::from))
            .await
    }

    pub async fn create_role(&self, input: CreateRoleInput) -> Result<Role> {
        input.validate()?;
        if self
            .role_repo
            .find_role_by_name(&input.application_id, &input.tenant_id, &input.name)
            .await?
            .is_some()
        {
            return Err(AppError::Validation(format!(
                "Role {} already exists in this scope",
                input.name
            )));
        }
        self.role_repo.create_role(&input).await
    }
}

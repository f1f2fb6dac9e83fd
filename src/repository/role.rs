//! Role and role-assignment repository

use crate::domain::{prefixed_id, CreateRoleInput, Role, RoleAssignment, TenantFilter};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn create_role(&self, input: &CreateRoleInput) -> Result<Role>;
    async fn find_role_by_id(&self, id: &str) -> Result<Option<Role>>;
    async fn find_role_by_name(
        &self,
        application_id: &str,
        tenant_id: &Option<String>,
        name: &str,
    ) -> Result<Option<Role>>;

    /// Roles usable by a tenant: its own plus the application's global roles.
    async fn list_roles(
        &self,
        application_id: &str,
        tenant_id: &Option<String>,
    ) -> Result<Vec<Role>>;

    async fn insert_assignment(&self, assignment: &RoleAssignment) -> Result<()>;
    async fn find_assignment(
        &self,
        user_id: &str,
        role_id: &str,
        application_id: &str,
        tenant_id: &Option<String>,
    ) -> Result<Option<RoleAssignment>>;
    async fn delete_assignment(
        &self,
        user_id: &str,
        role_id: &str,
        application_id: &str,
        tenant_id: &Option<String>,
    ) -> Result<bool>;
    async fn find_user_assignments(
        &self,
        user_id: &str,
        application_id: &str,
        tenant: &TenantFilter,
    ) -> Result<Vec<RoleAssignment>>;
    async fn find_assignments_for_role(
        &self,
        role_id: &str,
        application_id: &str,
        tenant: &TenantFilter,
    ) -> Result<Vec<RoleAssignment>>;

    /// Role names a user resolves to in a domain. Both tenant-scoped and
    /// global assignments contribute; tenant-scoped names come first.
    async fn find_user_role_names(
        &self,
        user_id: &str,
        application_id: &str,
        tenant_id: &Option<String>,
    ) -> Result<Vec<String>>;
}

pub struct RoleRepositoryImpl {
    pool: MySqlPool,
}

impl RoleRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

/// Append a tenant predicate for the three-valued filter.
fn push_tenant_filter(sql: &mut String, tenant: &TenantFilter) {
    match tenant {
        TenantFilter::Any => {}
        TenantFilter::GlobalOnly => sql.push_str(" AND tenant_id IS NULL"),
        TenantFilter::Tenant(_) => sql.push_str(" AND tenant_id = ?"),
    }
}

/// Append an exact tenant predicate, NULL distinct from any value.
fn push_exact_tenant(sql: &mut String, tenant_id: &Option<String>) {
    if tenant_id.is_some() {
        sql.push_str(" AND tenant_id = ?");
    } else {
        sql.push_str(" AND tenant_id IS NULL");
    }
}

const ROLE_COLUMNS: &str = "id, name, application_id, tenant_id, is_system_role, created_at";
const ASSIGNMENT_COLUMNS: &str =
    "id, user_id, role_id, application_id, tenant_id, assigned_by, created_at";

#[async_trait]
impl RoleRepository for RoleRepositoryImpl {
    async fn create_role(&self, input: &CreateRoleInput) -> Result<Role> {
        let id = prefixed_id("role");
        let created_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO roles (id, name, application_id, tenant_id, is_system_role, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&input.name)
        .bind(&input.application_id)
        .bind(&input.tenant_id)
        .bind(input.is_system_role)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        self.find_role_by_id(&id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create role")))
    }

    async fn find_role_by_id(&self, id: &str) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(&format!(
            "SELECT {} FROM roles WHERE id = ?",
            ROLE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role)
    }

    async fn find_role_by_name(
        &self,
        application_id: &str,
        tenant_id: &Option<String>,
        name: &str,
    ) -> Result<Option<Role>> {
        let mut sql = format!(
            "SELECT {} FROM roles WHERE application_id = ? AND name = ?",
            ROLE_COLUMNS
        );
        push_exact_tenant(&mut sql, tenant_id);

        let mut query = sqlx::query_as::<_, Role>(&sql)
            .bind(application_id)
            .bind(name);
        if let Some(tenant) = tenant_id {
            query = query.bind(tenant);
        }

        let role = query.fetch_optional(&self.pool).await?;
        Ok(role)
    }

    async fn list_roles(
        &self,
        application_id: &str,
        tenant_id: &Option<String>,
    ) -> Result<Vec<Role>> {
        let mut sql = format!(
            "SELECT {} FROM roles WHERE application_id = ?",
            ROLE_COLUMNS
        );
        if tenant_id.is_some() {
            sql.push_str(" AND (tenant_id IS NULL OR tenant_id = ?)");
        } else {
            sql.push_str(" AND tenant_id IS NULL");
        }
        sql.push_str(" ORDER BY name");

        let mut query = sqlx::query_as::<_, Role>(&sql).bind(application_id);
        if let Some(tenant) = tenant_id {
            query = query.bind(tenant);
        }

        let roles = query.fetch_all(&self.pool).await?;
        Ok(roles)
    }

    async fn insert_assignment(&self, assignment: &RoleAssignment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO role_assignments (id, user_id, role_id, application_id, tenant_id, assigned_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&assignment.id)
        .bind(&assignment.user_id)
        .bind(&assignment.role_id)
        .bind(&assignment.application_id)
        .bind(&assignment.tenant_id)
        .bind(&assignment.assigned_by)
        .bind(assignment.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_assignment(
        &self,
        user_id: &str,
        role_id: &str,
        application_id: &str,
        tenant_id: &Option<String>,
    ) -> Result<Option<RoleAssignment>> {
        let mut sql = format!(
            "SELECT {} FROM role_assignments WHERE user_id = ? AND role_id = ? AND application_id = ?",
            ASSIGNMENT_COLUMNS
        );
        push_exact_tenant(&mut sql, tenant_id);

        let mut query = sqlx::query_as::<_, RoleAssignment>(&sql)
            .bind(user_id)
            .bind(role_id)
            .bind(application_id);
        if let Some(tenant) = tenant_id {
            query = query.bind(tenant);
        }

        let assignment = query.fetch_optional(&self.pool).await?;
        Ok(assignment)
    }

    async fn delete_assignment(
        &self,
        user_id: &str,
        role_id: &str,
        application_id: &str,
        tenant_id: &Option<String>,
    ) -> Result<bool> {
        let mut sql = String::from(
            "DELETE FROM role_assignments WHERE user_id = ? AND role_id = ? AND application_id = ?",
        );
        push_exact_tenant(&mut sql, tenant_id);

        let mut query = sqlx::query(&sql)
            .bind(user_id)
            .bind(role_id)
            .bind(application_id);
        if let Some(tenant) = tenant_id {
            query = query.bind(tenant);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_user_assignments(
        &self,
        user_id: &str,
        application_id: &str,
        tenant: &TenantFilter,
    ) -> Result<Vec<RoleAssignment>> {
        let mut sql = format!(
            "SELECT {} FROM role_assignments WHERE user_id = ? AND application_id = ?",
            ASSIGNMENT_COLUMNS
        );
        push_tenant_filter(&mut sql, tenant);
        sql.push_str(" ORDER BY created_at");

        let mut query = sqlx::query_as::<_, RoleAssignment>(&sql)
            .bind(user_id)
            .bind(application_id);
        if let TenantFilter::Tenant(t) = tenant {
            query = query.bind(t);
        }

        let assignments = query.fetch_all(&self.pool).await?;
        Ok(assignments)
    }

    async fn find_assignments_for_role(
        &self,
        role_id: &str,
        application_id: &str,
        tenant: &TenantFilter,
    ) -> Result<Vec<RoleAssignment>> {
        let mut sql = format!(
            "SELECT {} FROM role_assignments WHERE role_id = ? AND application_id = ?",
            ASSIGNMENT_COLUMNS
        );
        push_tenant_filter(&mut sql, tenant);
        sql.push_str(" ORDER BY created_at");

        let mut query = sqlx::query_as::<_, RoleAssignment>(&sql)
            .bind(role_id)
            .bind(application_id);
        if let TenantFilter::Tenant(t) = tenant {
            query = query.bind(t);
        }

        let assignments = query.fetch_all(&self.pool).await?;
        Ok(assignments)
    }

    async fn find_user_role_names(
        &self,
        user_id: &str,
        application_id: &str,
        tenant_id: &Option<String>,
    ) -> Result<Vec<String>> {
        let mut sql = String::from(
            "SELECT r.name, ra.tenant_id FROM roles r \
             INNER JOIN role_assignments ra ON r.id = ra.role_id \
             WHERE ra.user_id = ? AND ra.application_id = ?",
        );
        if tenant_id.is_some() {
            sql.push_str(" AND (ra.tenant_id = ? OR ra.tenant_id IS NULL)");
        } else {
            sql.push_str(" AND ra.tenant_id IS NULL");
        }

        let mut query = sqlx::query_as::<_, (String, Option<String>)>(&sql)
            .bind(user_id)
            .bind(application_id);
        if let Some(tenant) = tenant_id {
            query = query.bind(tenant);
        }

        let mut rows = query.fetch_all(&self.pool).await?;
        // Tenant-scoped assignments take precedence in matching order.
        rows.sort_by_key(|(_, tenant)| tenant.is_none());

        let mut names = Vec::new();
        for (name, _) in rows {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

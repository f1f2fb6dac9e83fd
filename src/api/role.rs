//! Role assignment API handlers

use crate::api::{actor_context, MetaResponse, SuccessResponse};
use crate::domain::{AssignRoleInput, TenantFilter};
use crate::error::{AppError, Result};
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRoleBody {
    pub role_id: String,
    pub application_id: String,
    pub assigned_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppScopeQuery {
    pub application_id: Option<String>,
}

impl AppScopeQuery {
    fn require(&self) -> Result<&str> {
        self.application_id
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                AppError::Validation("applicationId query parameter is required".to_string())
            })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemovalResult {
    removed: bool,
}

/// Assign a role to a user within the tenant
pub async fn assign(
    State(state): State<AppState>,
    Path((tenant_id, user_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<AssignRoleBody>,
) -> Result<impl IntoResponse> {
    let actor = actor_context(&headers);
    let input = AssignRoleInput {
        user_id,
        role_id: body.role_id,
        application_id: body.application_id,
        tenant_id: Some(tenant_id),
        assigned_by: body.assigned_by.or_else(|| actor.actor_id.clone()),
    };

    let assignment = state.assignment_service.assign_role(input, &actor).await?;
    Ok(Json(SuccessResponse::new(assignment)))
}

/// Remove one role assignment
pub async fn remove(
    State(state): State<AppState>,
    Path((tenant_id, user_id, role_id)): Path<(String, String, String)>,
    Query(scope): Query<AppScopeQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let application_id = scope.require()?;
    let actor = actor_context(&headers);

    let removed = state
        .assignment_service
        .remove_role(&user_id, &role_id, application_id, Some(&tenant_id), &actor)
        .await?;
    if !removed {
        return Err(AppError::NotFound("Role assignment not found".to_string()));
    }

    Ok(Json(SuccessResponse::new(RemovalResult { removed })))
}

/// List a user's role assignments in the tenant
pub async fn list_user_roles(
    State(state): State<AppState>,
    Path((tenant_id, user_id)): Path<(String, String)>,
    Query(scope): Query<AppScopeQuery>,
) -> Result<impl IntoResponse> {
    let application_id = scope.require()?;
    let assignments = state
        .assignment_service
        .get_user_roles(
            &user_id,
            application_id,
            &TenantFilter::Tenant(tenant_id.clone()),
        )
        .await?;

    Ok(Json(MetaResponse::new(assignments, tenant_id)))
}

/// List roles available to the tenant
pub async fn list_roles(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(scope): Query<AppScopeQuery>,
) -> Result<impl IntoResponse> {
    let application_id = scope.require()?;
    let roles = state
        .assignment_service
        .list_roles(application_id, Some(&tenant_id))
        .await?;

    Ok(Json(MetaResponse::new(roles, tenant_id)))
}

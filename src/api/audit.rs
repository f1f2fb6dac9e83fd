//! Audit log API handlers

use crate::api::{MetaResponse, ResponseMeta, SuccessResponse};
use crate::domain::AuditLogFilter;
use crate::error::{AppError, Result};
use crate::server::{AppState, AuditServiceImpl};
use crate::service::audit::{PageRequest, Pagination};
use crate::service::{ExportOutcome, ExportRequest};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// List query parameters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditListQuery {
    pub event_type: Option<String>,
    pub actor_id: Option<String>,
    pub resource_type: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp_after: Option<DateTime<Utc>>,
    pub timestamp_before: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl AuditListQuery {
    fn filter(&self) -> AuditLogFilter {
        AuditLogFilter {
            event_type: self.event_type.clone(),
            actor_id: self.actor_id.clone(),
            resource_type: self.resource_type.clone(),
            ip_address: self.ip_address.clone(),
            timestamp_after: self.timestamp_after,
            timestamp_before: self.timestamp_before,
        }
    }

    fn page(&self) -> PageRequest {
        let defaults = PageRequest::default();
        PageRequest {
            page: self.page.unwrap_or(defaults.page),
            page_size: self.page_size.unwrap_or(defaults.page_size),
        }
    }
}

#[derive(Debug, Serialize)]
struct AuditListResponse {
    data: Vec<crate::domain::AuditLogEntry>,
    pagination: Pagination,
    meta: ResponseMeta,
}

/// The audit service is an optional collaborator; deployments without
/// it answer 503, not 500.
fn require_audit(state: &AppState) -> Result<&Arc<AuditServiceImpl>> {
    state.audit_service.as_ref().ok_or_else(|| {
        AppError::ServiceUnavailable("Audit log service is not configured".to_string())
    })
}

/// List audit logs for a tenant
pub async fn list(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<AuditListQuery>,
) -> Result<impl IntoResponse> {
    let service = require_audit(&state)?;
    let page = service
        .query_logs(Some(&tenant_id), &query.filter(), &query.page())
        .await?;

    Ok(Json(AuditListResponse {
        data: page.data,
        pagination: page.pagination,
        meta: ResponseMeta { tenant_id },
    }))
}

/// Point lookup by public event id
pub async fn get_by_id(
    State(state): State<AppState>,
    Path((tenant_id, event_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let service = require_audit(&state)?;
    let entry = service.get_log_by_id(Some(&tenant_id), &event_id).await?;
    Ok(Json(MetaResponse::new(entry, tenant_id)))
}

/// Export audit logs: 200 with a data URL for small result sets, 202
/// with a job handle for large ones.
pub async fn export(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<ExportRequest>,
) -> Result<Response> {
    let service = require_audit(&state)?;
    match service.export(Some(&tenant_id), &request).await? {
        ExportOutcome::Ready(download) => {
            Ok((StatusCode::OK, Json(SuccessResponse::new(download))).into_response())
        }
        ExportOutcome::Queued(job) => {
            Ok((StatusCode::ACCEPTED, Json(SuccessResponse::new(job))).into_response())
        }
    }
}

/// Replay the tenant's hash chain and report the first violation, if any.
pub async fn verify(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse> {
    let service = require_audit(&state)?;
    let verification = service.verify_chain(Some(&tenant_id)).await?;
    Ok(Json(MetaResponse::new(verification, tenant_id)))
}

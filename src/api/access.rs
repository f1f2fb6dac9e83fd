//! Access check API handler

use crate::api::{actor_context, SuccessResponse};
use crate::domain::Domain;
use crate::enforcer::EnforceContext;
use crate::error::Result;
use crate::server::AppState;
use crate::service::AccessCheckRequest;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheckBody {
    pub subject: String,
    pub application_id: String,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub context: EnforceContext,
}

/// The decision is a bare boolean; denial detail lives in the audit
/// trail only.
#[derive(Debug, Clone, Serialize)]
struct AccessDecision {
    allowed: bool,
}

/// Check whether a subject may perform an action on a resource
pub async fn check(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AccessCheckBody>,
) -> Result<impl IntoResponse> {
    let actor = actor_context(&headers);
    let request = AccessCheckRequest {
        subject: body.subject,
        domain: Domain::new(body.application_id, Some(tenant_id)),
        resource: body.resource,
        action: body.action,
        context: body.context,
    };

    let allowed = state.access_service.check_access(&request, &actor).await?;
    Ok(Json(SuccessResponse::new(AccessDecision { allowed })))
}

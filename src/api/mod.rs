//! REST API shared utilities (response envelopes, actor extraction)

pub mod access;
pub mod audit;
pub mod health;
pub mod role;

use crate::service::ActorContext;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Success response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Response metadata attached to tenant-scoped reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub tenant_id: String,
}

/// Response wrapper carrying data plus metadata
#[derive(Debug, Clone, Serialize)]
pub struct MetaResponse<T> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> MetaResponse<T> {
    pub fn new(data: T, tenant_id: impl Into<String>) -> Self {
        Self {
            data,
            meta: ResponseMeta {
                tenant_id: tenant_id.into(),
            },
        }
    }
}

/// Build the audit actor context from request headers. Caller identity
/// arrives from the authenticating gateway in `x-actor-id`.
pub(crate) fn actor_context(headers: &HeaderMap) -> ActorContext {
    ActorContext {
        actor_id: headers
            .get("x-actor-id")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        ip: extract_ip(headers),
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string()),
    }
}

pub(crate) fn extract_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-forwarded-for") {
        if let Ok(forwarded) = value.to_str() {
            if let Some(first) = forwarded.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }

    if let Some(value) = headers.get("x-real-ip") {
        if let Ok(real_ip) = value.to_str() {
            if !real_ip.trim().is_empty() {
                return Some(real_ip.trim().to_string());
            }
        }
    }

    None
}

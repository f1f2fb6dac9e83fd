//! Common types for domain models

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The (application, tenant) pair that scopes both role grouping and
/// policy rules.
///
/// The policy store keys rules by a single flattened domain string;
/// this type is the only place that string is composed or parsed, so
/// call sites never concatenate scope keys by hand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub application_id: String,
    /// None means the application-global scope.
    pub tenant_id: Option<String>,
}

impl Domain {
    pub fn new(application_id: impl Into<String>, tenant_id: Option<String>) -> Self {
        Self {
            application_id: application_id.into(),
            tenant_id,
        }
    }

    /// Application-global domain (no tenant).
    pub fn global(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            tenant_id: None,
        }
    }

    /// Flattened storage key: `"{applicationId}:{tenantId-or-empty}"`.
    pub fn key(&self) -> String {
        format!(
            "{}:{}",
            self.application_id,
            self.tenant_id.as_deref().unwrap_or("")
        )
    }

    /// Inverse of [`Domain::key`]. Returns None for strings without the
    /// separator; such keys never come from this type.
    pub fn parse_key(key: &str) -> Option<Self> {
        let (app, tenant) = key.split_once(':')?;
        if app.is_empty() {
            return None;
        }
        Some(Self {
            application_id: app.to_string(),
            tenant_id: if tenant.is_empty() {
                None
            } else {
                Some(tenant.to_string())
            },
        })
    }

    /// The app-global counterpart of this domain.
    pub fn to_global(&self) -> Self {
        Self::global(self.application_id.clone())
    }

    pub fn is_global(&self) -> bool {
        self.tenant_id.is_none()
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Generate a prefixed identifier derived from the current time plus a
/// random component, e.g. `ura_18c2f40d1a39e4b21f7a`.
pub fn prefixed_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random = Uuid::new_v4().simple().to_string();
    format!("{}_{:x}{}", prefix, millis, &random[..8])
}

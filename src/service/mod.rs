//! Business logic layer

pub mod access;
pub mod audit;
pub mod export;
pub mod role_assignment;

pub use access::{AccessCheckRequest, AccessService};
pub use audit::{AuditLogPage, AuditService, PageRequest, Pagination};
pub use export::{ExportFormat, ExportJobQueue, ExportOutcome, ExportRequest, LoggingExportQueue};
pub use role_assignment::RoleAssignmentService;

/// Caller identity attached to audit events emitted by service calls.
#[derive(Debug, Clone, Default)]
pub struct ActorContext {
    pub actor_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

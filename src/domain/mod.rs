//! Domain models

pub mod audit;
pub mod common;
pub mod policy;
pub mod role;

pub use audit::{
    parse_event_id, AuditLogEntry, AuditLogFilter, ChainScope, ChainVerification, ChainViolation,
    ChainViolationKind, RecordEventInput,
};
pub use common::{prefixed_id, Domain};
pub use policy::{Condition, Effect, PolicyRule, PolicyTuple, RuleType};
pub use role::{AssignRoleInput, CreateRoleInput, Role, RoleAssignment, TenantFilter};

//! Aegis Core - Multi-Tenant Authorization Backend
//!
//! This crate provides the authorization core: a role-based policy engine
//! scoped by application and tenant, a database-backed role assignment
//! service, and a tamper-evident hash-chained audit log.

pub mod api;
pub mod cache;
pub mod config;
pub mod domain;
pub mod enforcer;
pub mod error;
pub mod migration;
pub mod repository;
pub mod server;
pub mod service;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};

//! Configuration management for Aegis Core

use anyhow::{Context, Result};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server host
    pub http_host: String,
    /// HTTP server port
    pub http_port: u16,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Audit log configuration
    pub audit: AuditConfig,
    /// Mirror role assignments into the policy store's grouping rules.
    ///
    /// When false (the default) role resolution reads assignment rows
    /// directly at enforcement time, so there is no grouping state to
    /// drift. When true, grouping rules are projected on every mutation
    /// and `resync_user` repairs divergence.
    pub grouping_projection: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Whether the audit log service is configured for this deployment.
    /// When false the audit HTTP surface answers 503.
    pub enabled: bool,
    /// Matching-row count at or above which export goes through the
    /// asynchronous job queue instead of returning a data URL.
    pub sync_export_threshold: i64,
    /// Lifetime of a synchronous export download link, in seconds.
    pub export_link_ttl_secs: i64,
    /// Rows fetched per round-trip when walking a chain for verification
    /// or a result set for export.
    pub scan_page_size: i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_export_threshold: 10_000,
            export_link_ttl_secs: 3600,
            scan_page_size: 500,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            http_host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid HTTP_PORT")?,
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                enabled: env::var("REDIS_ENABLED")
                    .map(|v| v != "false" && v != "0")
                    .unwrap_or(true),
            },
            audit: AuditConfig {
                enabled: env::var("AUDIT_ENABLED")
                    .map(|v| v != "false" && v != "0")
                    .unwrap_or(true),
                sync_export_threshold: env::var("AUDIT_SYNC_EXPORT_THRESHOLD")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse()
                    .unwrap_or(10_000),
                export_link_ttl_secs: env::var("AUDIT_EXPORT_LINK_TTL_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600),
                scan_page_size: env::var("AUDIT_SCAN_PAGE_SIZE")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500),
            },
            grouping_projection: env::var("GROUPING_PROJECTION")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }

    /// HTTP bind address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

//! Audit log export formats and job handoff
//!
//! Small result sets are serialized inline and returned as a base64
//! data URL. Large ones are handed to an [`ExportJobQueue`]; the job
//! runner that eventually produces a downloadable artifact lives out of
//! process and is a collaborator, not part of this core.

use crate::domain::{AuditLogEntry, AuditLogFilter};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Fixed CSV header row; column order is part of the export contract.
pub const CSV_HEADER: &str =
    "eventId,eventType,timestamp,userId,tenantId,resource,action,actorId,actorIp,details";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }
}

/// Export request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub timestamp_after: Option<DateTime<Utc>>,
    pub timestamp_before: Option<DateTime<Utc>>,
    pub event_type: Option<String>,
}

impl ExportRequest {
    pub fn filter(&self) -> AuditLogFilter {
        AuditLogFilter {
            event_type: self.event_type.clone(),
            timestamp_after: self.timestamp_after,
            timestamp_before: self.timestamp_before,
            ..Default::default()
        }
    }
}

/// Synchronous export result: an ephemeral data URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDownload {
    pub download_url: String,
    pub event_count: i64,
    pub expires_at: DateTime<Utc>,
}

/// Asynchronous export handoff.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub enum ExportOutcome {
    Ready(ExportDownload),
    Queued(ExportJob),
}

/// Work order submitted to the out-of-process export runner.
#[derive(Debug, Clone)]
pub struct QueuedExportJob {
    pub job_id: String,
    pub tenant_id: Option<String>,
    pub format: ExportFormat,
    pub filter: AuditLogFilter,
}

/// Collaborator that runs large exports out of process.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExportJobQueue: Send + Sync {
    /// The job record must be durably accepted before this returns;
    /// callers hand the job id to the client immediately after.
    async fn submit(&self, job: &QueuedExportJob) -> Result<()>;
}

/// Default queue for deployments without an export runner: accepts the
/// handoff and leaves a trace of it.
pub struct LoggingExportQueue;

#[async_trait]
impl ExportJobQueue for LoggingExportQueue {
    async fn submit(&self, job: &QueuedExportJob) -> Result<()> {
        tracing::info!(
            job_id = %job.job_id,
            tenant_id = ?job.tenant_id,
            format = ?job.format,
            "export job handed off"
        );
        Ok(())
    }
}

/// RFC 4180 quoting: fields with embedded delimiters, quotes or
/// newlines are wrapped in quotes with inner quotes doubled.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Serialize entries as CSV with the fixed header row.
pub fn to_csv(entries: &[AuditLogEntry]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for entry in entries {
        let details = serde_json::to_string(&entry.details).unwrap_or_default();
        let row = [
            Cow::Borrowed(entry.event_id.as_str()),
            Cow::Borrowed(entry.event_type.as_str()),
            Cow::Owned(
                entry
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
            ),
            Cow::Borrowed(entry.user_id.as_str()),
            Cow::Borrowed(entry.tenant_id.as_deref().unwrap_or("")),
            Cow::Borrowed(entry.resource.as_str()),
            Cow::Borrowed(entry.action.as_str()),
            Cow::Borrowed(entry.actor_id.as_str()),
            Cow::Borrowed(entry.actor_ip.as_deref().unwrap_or("")),
            Cow::Owned(details),
        ];
        let mut first = true;
        for field in row {
            if !first {
                out.push(',');
            }
            out.push_str(&csv_field(&field));
            first = false;
        }
        out.push('\n');
    }
    out
}

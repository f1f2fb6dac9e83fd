//! Audit log business logic
//!
//! Appends are serialized per chain scope with an in-process mutex on
//! top of the repository's FOR UPDATE tail read; either alone leaves a
//! window in which two writers read the same tail hash.

use crate::config::AuditConfig;
use crate::domain::audit::parse_event_id;
use crate::domain::{
    AuditLogEntry, AuditLogFilter, ChainScope, ChainVerification, ChainViolation,
    ChainViolationKind, RecordEventInput,
};
use crate::domain::common::prefixed_id;
use crate::error::{AppError, Result};
use crate::repository::AuditRepository;
use crate::service::export::{
    to_csv, ExportDownload, ExportJob, ExportJobQueue, ExportOutcome, ExportRequest,
    QueuedExportJob,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Hard ceiling on a query page.
const MAX_PAGE_SIZE: i64 = 100;

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    50
}

/// Pagination query parameters
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: i64, page_size: i64, total_items: i64) -> Self {
        let total_pages = if total_items == 0 {
            0
        } else {
            (total_items + page_size - 1) / page_size
        };
        Self {
            page,
            page_size,
            total_items,
            total_pages,
            has_more: page < total_pages,
        }
    }
}

/// One page of audit log entries.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogPage {
    pub data: Vec<AuditLogEntry>,
    pub pagination: Pagination,
}

pub struct AuditService<A: AuditRepository> {
    repo: Arc<A>,
    config: AuditConfig,
    export_queue: Arc<dyn ExportJobQueue>,
    /// Per-scope append locks; the map key is the tenant id, empty for
    /// the global chain.
    append_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<A: AuditRepository> AuditService<A> {
    pub fn new(repo: Arc<A>, config: AuditConfig, export_queue: Arc<dyn ExportJobQueue>) -> Self {
        Self {
            repo,
            config,
            export_queue,
            append_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn scope_lock(&self, tenant_id: Option<&str>) -> Arc<tokio::sync::Mutex<()>> {
        let key = tenant_id.unwrap_or("").to_string();
        let mut locks = self
            .append_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Append an event to its chain scope.
    pub async fn record(&self, input: RecordEventInput) -> Result<AuditLogEntry> {
        let lock = self.scope_lock(input.tenant_id.as_deref());
        let _guard = lock.lock().await;

        let entry = self.repo.append(&input).await?;
        tracing::debug!(
            event_type = %entry.event_type,
            tenant_id = ?entry.tenant_id,
            chain_seq = entry.chain_seq,
            "audit event recorded"
        );
        Ok(entry)
    }

    /// Filtered, paginated query over one chain scope.
    pub async fn query_logs(
        &self,
        tenant_id: Option<&str>,
        filter: &AuditLogFilter,
        page: &PageRequest,
    ) -> Result<AuditLogPage> {
        let page_number = page.page.max(1);
        let page_size = page.page_size.clamp(1, MAX_PAGE_SIZE);
        let scope = ChainScope::from_tenant_id(tenant_id);

        let total_items = self.repo.count(&scope, filter).await?;
        let offset = (page_number - 1) * page_size;
        let data = self.repo.find(&scope, filter, page_size, offset).await?;

        Ok(AuditLogPage {
            data,
            pagination: Pagination::new(page_number, page_size, total_items),
        })
    }

    /// Point lookup by public `evt_{n}` id. A malformed id is simply an
    /// unknown entry, never a parse error.
    pub async fn get_log_by_id(
        &self,
        tenant_id: Option<&str>,
        event_id: &str,
    ) -> Result<AuditLogEntry> {
        let not_found = || AppError::NotFound(format!("Audit log entry {} not found", event_id));

        let id = parse_event_id(event_id).ok_or_else(not_found)?;
        self.repo
            .find_by_internal_id(&ChainScope::from_tenant_id(tenant_id), id)
            .await?
            .ok_or_else(not_found)
    }

    pub async fn count_logs(&self, tenant_id: Option<&str>, filter: &AuditLogFilter) -> Result<i64> {
        self.repo
            .count(&ChainScope::from_tenant_id(tenant_id), filter)
            .await
    }

    /// Replay a chain scope from its first entry, recomputing every hash
    /// and checking linkage and sequence continuity. Violations are
    /// reported, never repaired.
    pub async fn verify_chain(&self, tenant_id: Option<&str>) -> Result<ChainVerification> {
        let scope = ChainScope::from_tenant_id(tenant_id);
        let mut expected_seq = 1i64;
        let mut previous_hash: Option<String> = None;
        let mut checked = 0i64;
        let mut after_seq = 0i64;

        loop {
            let page = self
                .repo
                .fetch_chain_page(&scope, after_seq, self.config.scan_page_size)
                .await?;
            if page.is_empty() {
                break;
            }

            for entry in &page {
                if entry.chain_seq != expected_seq {
                    return Ok(ChainVerification::broken(
                        checked,
                        ChainViolation {
                            chain_seq: entry.chain_seq,
                            entry_id: entry.id,
                            kind: ChainViolationKind::SequenceGap,
                            detail: format!(
                                "expected sequence {}, found {}",
                                expected_seq, entry.chain_seq
                            ),
                        },
                    ));
                }
                if entry.previous_hash != previous_hash {
                    return Ok(ChainVerification::broken(
                        checked,
                        ChainViolation {
                            chain_seq: entry.chain_seq,
                            entry_id: entry.id,
                            kind: ChainViolationKind::BrokenLink,
                            detail: "previous hash does not match predecessor".to_string(),
                        },
                    ));
                }
                if entry.expected_hash() != entry.record_hash {
                    return Ok(ChainVerification::broken(
                        checked,
                        ChainViolation {
                            chain_seq: entry.chain_seq,
                            entry_id: entry.id,
                            kind: ChainViolationKind::TamperedEntry,
                            detail: "record hash does not match entry fields".to_string(),
                        },
                    ));
                }

                previous_hash = Some(entry.record_hash.clone());
                expected_seq += 1;
                checked += 1;
            }

            after_seq = page.last().map(|e| e.chain_seq).unwrap_or(after_seq);
        }

        Ok(ChainVerification::clean(checked))
    }

    /// Export matching entries. Below the threshold the payload is
    /// serialized inline and returned as a data URL; at or above it the
    /// work is handed to the export job queue and the row fetch never
    /// runs.
    pub async fn export(
        &self,
        tenant_id: Option<&str>,
        request: &ExportRequest,
    ) -> Result<ExportOutcome> {
        let filter = request.filter();
        let scope = ChainScope::from_tenant_id(tenant_id);
        let total = self.repo.count(&scope, &filter).await?;

        if total >= self.config.sync_export_threshold {
            let job = QueuedExportJob {
                job_id: prefixed_id("job"),
                tenant_id: tenant_id.map(|t| t.to_string()),
                format: request.format,
                filter,
            };
            self.export_queue.submit(&job).await?;
            tracing::info!(
                job_id = %job.job_id,
                matching = total,
                "export exceeds synchronous threshold, queued"
            );
            return Ok(ExportOutcome::Queued(ExportJob {
                job_id: job.job_id,
                status: "pending".to_string(),
            }));
        }

        let mut entries: Vec<AuditLogEntry> = Vec::with_capacity(total.max(0) as usize);
        let mut offset = 0i64;
        loop {
            let page = self
                .repo
                .find(&scope, &filter, self.config.scan_page_size, offset)
                .await?;
            let fetched = page.len() as i64;
            entries.extend(page);
            if fetched < self.config.scan_page_size {
                break;
            }
            offset += fetched;
        }

        let payload = match request.format {
            super::export::ExportFormat::Json => serde_json::to_vec(&entries)
                .map_err(|e| anyhow::anyhow!("Failed to serialize export: {}", e))?,
            super::export::ExportFormat::Csv => to_csv(&entries).into_bytes(),
        };

        let download_url = format!(
            "data:{};base64,{}",
            request.format.mime_type(),
            BASE64.encode(payload)
        );

        Ok(ExportOutcome::Ready(ExportDownload {
            download_url,
            event_count: entries.len() as i64,
            expires_at: Utc::now() + Duration::seconds(self.config.export_link_ttl_secs),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::truncate_to_micros;
    use crate::repository::audit::MockAuditRepository;
    use crate::service::export::{ExportFormat, MockExportJobQueue};
    use serde_json::json;

    fn test_config() -> AuditConfig {
        AuditConfig::default()
    }

    fn chain_entry(seq: i64, previous_hash: Option<String>) -> AuditLogEntry {
        let mut entry = AuditLogEntry {
            id: seq,
            event_id: format!("evt_{}", seq),
            chain_seq: seq,
            event_type: "role.assigned".to_string(),
            user_id: "user123".to_string(),
            tenant_id: Some("org1".to_string()),
            resource: "role".to_string(),
            action: "assign".to_string(),
            actor_id: "admin42".to_string(),
            actor_ip: None,
            actor_user_agent: None,
            details: json!({"roleId": "r_1"}),
            previous_hash,
            record_hash: String::new(),
            created_at: truncate_to_micros(Utc::now()),
        };
        entry.record_hash = entry.expected_hash();
        entry
    }

    fn chain(len: i64) -> Vec<AuditLogEntry> {
        let mut entries: Vec<AuditLogEntry> = Vec::new();
        for seq in 1..=len {
            let previous = entries.last().map(|e: &AuditLogEntry| e.record_hash.clone());
            entries.push(chain_entry(seq, previous));
        }
        entries
    }

    fn mock_chain_pages(mock: &mut MockAuditRepository, entries: Vec<AuditLogEntry>) {
        mock.expect_fetch_chain_page()
            .returning(move |_, after_seq, limit| {
                Ok(entries
                    .iter()
                    .filter(|e| e.chain_seq > after_seq)
                    .take(limit as usize)
                    .cloned()
                    .collect())
            });
    }

    fn service(mock: MockAuditRepository) -> AuditService<MockAuditRepository> {
        AuditService::new(Arc::new(mock), test_config(), Arc::new(LoggingQueueStub))
    }

    struct LoggingQueueStub;

    #[async_trait::async_trait]
    impl ExportJobQueue for LoggingQueueStub {
        async fn submit(&self, _job: &QueuedExportJob) -> crate::error::Result<()> {
            Ok(())
        }
    }

    // ==================== Pagination ====================

    #[test]
    fn test_pagination_total_pages_ceiling() {
        let pagination = Pagination::new(1, 10, 25);
        assert_eq!(pagination.total_pages, 3);
        assert!(pagination.has_more);
    }

    #[test]
    fn test_pagination_final_page_has_no_more() {
        let pagination = Pagination::new(3, 10, 25);
        assert_eq!(pagination.total_pages, 3);
        assert!(!pagination.has_more);
    }

    #[test]
    fn test_pagination_empty() {
        let pagination = Pagination::new(1, 50, 0);
        assert_eq!(pagination.total_pages, 0);
        assert!(!pagination.has_more);
    }

    #[test]
    fn test_page_request_defaults() {
        let page: PageRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, 50);
    }

    #[tokio::test]
    async fn test_query_logs_computes_offset_and_meta() {
        let mut mock = MockAuditRepository::new();
        mock.expect_count().returning(|_, _| Ok(25));
        mock.expect_find()
            .withf(|scope, _, limit, offset| {
                *scope == ChainScope::tenant("org1") && *limit == 10 && *offset == 20
            })
            .returning(|_, _, _, _| Ok(vec![]));

        let service = service(mock);
        let page = service
            .query_logs(
                Some("org1"),
                &AuditLogFilter::default(),
                &PageRequest { page: 3, page_size: 10 },
            )
            .await
            .unwrap();

        assert_eq!(page.pagination.total_items, 25);
        assert_eq!(page.pagination.total_pages, 3);
        assert!(!page.pagination.has_more);
    }

    #[tokio::test]
    async fn test_query_logs_clamps_page_size() {
        let mut mock = MockAuditRepository::new();
        mock.expect_count().returning(|_, _| Ok(0));
        mock.expect_find()
            .withf(|_, _, limit, _| *limit == MAX_PAGE_SIZE)
            .returning(|_, _, _, _| Ok(vec![]));

        let service = service(mock);
        let page = service
            .query_logs(
                Some("org1"),
                &AuditLogFilter::default(),
                &PageRequest { page: 1, page_size: 100_000 },
            )
            .await
            .unwrap();
        assert_eq!(page.pagination.page_size, MAX_PAGE_SIZE);
    }

    // ==================== Point lookup ====================

    #[tokio::test]
    async fn test_get_log_by_id_malformed_is_not_found() {
        let mut mock = MockAuditRepository::new();
        mock.expect_find_by_internal_id().times(0);

        let service = service(mock);
        let result = service.get_log_by_id(Some("org1"), "invalid-id").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_log_by_id_found() {
        let mut mock = MockAuditRepository::new();
        mock.expect_find_by_internal_id()
            .withf(|scope, id| *scope == ChainScope::tenant("org1") && *id == 7)
            .returning(|_, _| Ok(Some(chain_entry(7, None))));

        let service = service(mock);
        let entry = service.get_log_by_id(Some("org1"), "evt_7").await.unwrap();
        assert_eq!(entry.event_id, "evt_7");
    }

    #[tokio::test]
    async fn test_get_log_by_id_missing_row() {
        let mut mock = MockAuditRepository::new();
        mock.expect_find_by_internal_id().returning(|_, _| Ok(None));

        let service = service(mock);
        let result = service.get_log_by_id(Some("org1"), "evt_9").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    // ==================== Chain verification ====================

    #[tokio::test]
    async fn test_verify_chain_clean() {
        let mut mock = MockAuditRepository::new();
        mock_chain_pages(&mut mock, chain(5));

        let service = service(mock);
        let verification = service.verify_chain(Some("org1")).await.unwrap();
        assert!(verification.valid);
        assert_eq!(verification.entries_checked, 5);
    }

    #[tokio::test]
    async fn test_verify_chain_empty_is_clean() {
        let mut mock = MockAuditRepository::new();
        mock_chain_pages(&mut mock, vec![]);

        let service = service(mock);
        let verification = service.verify_chain(Some("org1")).await.unwrap();
        assert!(verification.valid);
        assert_eq!(verification.entries_checked, 0);
    }

    #[tokio::test]
    async fn test_verify_chain_detects_tampered_field() {
        let mut entries = chain(4);
        entries[1].user_id = "intruder".to_string();
        let mut mock = MockAuditRepository::new();
        mock_chain_pages(&mut mock, entries);

        let service = service(mock);
        let verification = service.verify_chain(Some("org1")).await.unwrap();
        assert!(!verification.valid);
        let violation = verification.violation.unwrap();
        assert_eq!(violation.chain_seq, 2);
        assert_eq!(violation.kind, ChainViolationKind::TamperedEntry);
    }

    #[tokio::test]
    async fn test_verify_chain_detects_deleted_entry() {
        let mut entries = chain(4);
        entries.remove(1);
        let mut mock = MockAuditRepository::new();
        mock_chain_pages(&mut mock, entries);

        let service = service(mock);
        let verification = service.verify_chain(Some("org1")).await.unwrap();
        assert!(!verification.valid);
        let violation = verification.violation.unwrap();
        assert_eq!(violation.kind, ChainViolationKind::SequenceGap);
        assert_eq!(violation.chain_seq, 3);
    }

    #[tokio::test]
    async fn test_verify_chain_detects_forged_link() {
        let mut entries = chain(3);
        // Re-hash the second entry against a forged predecessor hash.
        entries[1].previous_hash = Some("ff".repeat(32));
        entries[1].record_hash = entries[1].expected_hash();
        let mut mock = MockAuditRepository::new();
        mock_chain_pages(&mut mock, entries);

        let service = service(mock);
        let verification = service.verify_chain(Some("org1")).await.unwrap();
        assert!(!verification.valid);
        let violation = verification.violation.unwrap();
        assert_eq!(violation.kind, ChainViolationKind::BrokenLink);
        assert_eq!(violation.chain_seq, 2);
    }

    // ==================== Export ====================

    fn export_request(format: ExportFormat) -> ExportRequest {
        ExportRequest {
            format,
            timestamp_after: None,
            timestamp_before: None,
            event_type: None,
        }
    }

    #[tokio::test]
    async fn test_export_large_result_is_queued_without_fetch() {
        let mut mock = MockAuditRepository::new();
        mock.expect_count().returning(|_, _| Ok(15_000));
        mock.expect_find().times(0);

        let mut queue = MockExportJobQueue::new();
        queue
            .expect_submit()
            .withf(|job| job.job_id.starts_with("job_") && job.tenant_id.as_deref() == Some("org1"))
            .times(1)
            .returning(|_| Ok(()));

        let service = AuditService::new(Arc::new(mock), test_config(), Arc::new(queue));
        let outcome = service
            .export(Some("org1"), &export_request(ExportFormat::Json))
            .await
            .unwrap();

        match outcome {
            ExportOutcome::Queued(job) => {
                assert!(job.job_id.starts_with("job_"));
                assert_eq!(job.status, "pending");
            }
            ExportOutcome::Ready(_) => panic!("expected queued export"),
        }
    }

    #[tokio::test]
    async fn test_export_small_result_returns_csv_data_url() {
        let entries = vec![chain_entry(1, None), chain_entry(2, None)];
        let mut mock = MockAuditRepository::new();
        mock.expect_count().returning(|_, _| Ok(2));
        let entries_clone = entries.clone();
        mock.expect_find()
            .returning(move |_, _, _, _| Ok(entries_clone.clone()));

        let service = service(mock);
        let outcome = service
            .export(Some("org1"), &export_request(ExportFormat::Csv))
            .await
            .unwrap();

        let download = match outcome {
            ExportOutcome::Ready(download) => download,
            ExportOutcome::Queued(_) => panic!("expected synchronous export"),
        };
        assert_eq!(download.event_count, 2);
        assert!(download.expires_at > Utc::now());

        let encoded = download
            .download_url
            .strip_prefix("data:text/csv;base64,")
            .expect("csv data url");
        let body = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], crate::service::export::CSV_HEADER);
        assert!(lines[1].starts_with("evt_1,"));
        assert!(lines[2].starts_with("evt_2,"));
    }

    #[tokio::test]
    async fn test_export_json_round_trips() {
        let entries = vec![chain_entry(1, None)];
        let mut mock = MockAuditRepository::new();
        mock.expect_count().returning(|_, _| Ok(1));
        let entries_clone = entries.clone();
        mock.expect_find()
            .returning(move |_, _, _, _| Ok(entries_clone.clone()));

        let service = service(mock);
        let outcome = service
            .export(Some("org1"), &export_request(ExportFormat::Json))
            .await
            .unwrap();

        let download = match outcome {
            ExportOutcome::Ready(download) => download,
            ExportOutcome::Queued(_) => panic!("expected synchronous export"),
        };
        let encoded = download
            .download_url
            .strip_prefix("data:application/json;base64,")
            .expect("json data url");
        let parsed: serde_json::Value =
            serde_json::from_slice(&BASE64.decode(encoded).unwrap()).unwrap();
        assert_eq!(parsed[0]["eventId"], "evt_1");
        assert_eq!(parsed[0]["tenantId"], "org1");
    }

    // ==================== Record ====================

    #[tokio::test]
    async fn test_record_appends_through_repo() {
        let mut mock = MockAuditRepository::new();
        mock.expect_append()
            .withf(|input| input.event_type == "role.assigned")
            .returning(|input| {
                let mut entry = chain_entry(1, None);
                entry.event_type = input.event_type.clone();
                Ok(entry)
            });

        let service = service(mock);
        let entry = service
            .record(RecordEventInput {
                event_type: "role.assigned".to_string(),
                user_id: "user123".to_string(),
                tenant_id: Some("org1".to_string()),
                resource: "role".to_string(),
                action: "assign".to_string(),
                actor_id: "admin42".to_string(),
                actor_ip: None,
                actor_user_agent: None,
                details: json!({}),
            })
            .await
            .unwrap();
        assert_eq!(entry.chain_seq, 1);
    }
}

//! Access check and policy administration
//!
//! Wraps the enforcer so that every decision and policy mutation can be
//! recorded in the audit trail. The synchronous answer is a bare
//! boolean; denial detail goes to the audit record only, so callers
//! cannot probe policy structure through the check response.

use crate::cache::CacheOperations;
use crate::domain::audit::{event_types, SYSTEM_ACTOR};
use crate::domain::{Domain, PolicyRule, RecordEventInput, RuleType};
use crate::enforcer::{EnforceContext, Enforcer};
use crate::error::Result;
use crate::repository::{AuditRepository, PolicyRepository};
use crate::service::audit::AuditService;
use crate::service::ActorContext;
use serde_json::json;
use std::sync::Arc;

/// One authorization question.
#[derive(Debug, Clone)]
pub struct AccessCheckRequest {
    pub subject: String,
    pub domain: Domain,
    pub resource: String,
    pub action: String,
    pub context: EnforceContext,
}

pub struct AccessService<P: PolicyRepository, A: AuditRepository> {
    enforcer: Arc<Enforcer<P>>,
    audit: Option<Arc<AuditService<A>>>,
    cache: Option<Arc<dyn CacheOperations>>,
}

impl<P: PolicyRepository, A: AuditRepository> AccessService<P, A> {
    pub fn new(
        enforcer: Arc<Enforcer<P>>,
        audit: Option<Arc<AuditService<A>>>,
        cache: Option<Arc<dyn CacheOperations>>,
    ) -> Self {
        Self {
            enforcer,
            audit,
            cache,
        }
    }

    async fn invalidate_domain(&self, domain: &Domain) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate_domain(&domain.key()).await {
                tracing::warn!("Domain cache invalidation failed: {}", e);
            }
        }
    }

    /// Evaluate a check and record the outcome. A failure to write the
    /// audit record does not change the decision; the check itself is
    /// the security boundary here.
    pub async fn check_access(
        &self,
        request: &AccessCheckRequest,
        actor: &ActorContext,
    ) -> Result<bool> {
        let allowed = self
            .enforcer
            .enforce(
                &request.subject,
                &request.domain,
                &request.resource,
                &request.action,
                &request.context,
            )
            .await?;

        if let Some(audit) = &self.audit {
            let event_type = if allowed {
                event_types::PERMISSION_GRANTED
            } else {
                event_types::PERMISSION_DENIED
            };
            let mut details = json!({
                "applicationId": request.domain.application_id,
                "allowed": allowed,
            });
            if !allowed {
                details["reason"] = json!("no allow rule matched or a deny rule applied");
            }

            let record = audit
                .record(RecordEventInput {
                    event_type: event_type.to_string(),
                    user_id: request.subject.clone(),
                    tenant_id: request.domain.tenant_id.clone(),
                    resource: request.resource.clone(),
                    action: request.action.clone(),
                    actor_id: actor
                        .actor_id
                        .clone()
                        .unwrap_or_else(|| request.subject.clone()),
                    actor_ip: actor.ip.clone(),
                    actor_user_agent: actor.user_agent.clone(),
                    details,
                })
                .await;
            if let Err(e) = record {
                tracing::warn!("Failed to record access check outcome: {}", e);
            }
        }

        Ok(allowed)
    }

    /// Insert a policy rule; idempotent. Emits `policy.added` only when
    /// a rule was actually inserted.
    pub async fn add_policy(&self, rule: &PolicyRule, actor: &ActorContext) -> Result<bool> {
        let added = self.enforcer.add_policy(rule).await?;
        if added {
            self.record_policy_event(event_types::POLICY_ADDED, "add", rule, actor)
                .await?;
            self.invalidate_domain(&rule.domain).await;
        }
        Ok(added)
    }

    /// Delete matching policy rules; returns the count removed.
    pub async fn remove_policy(&self, rule: &PolicyRule, actor: &ActorContext) -> Result<u64> {
        let removed = self.enforcer.remove_policy(rule).await?;
        if removed > 0 {
            self.record_policy_event(event_types::POLICY_REMOVED, "remove", rule, actor)
                .await?;
            self.invalidate_domain(&rule.domain).await;
        }
        Ok(removed)
    }

    async fn record_policy_event(
        &self,
        event_type: &str,
        action: &str,
        rule: &PolicyRule,
        actor: &ActorContext,
    ) -> Result<()> {
        if let Some(audit) = &self.audit {
            audit
                .record(RecordEventInput {
                    event_type: event_type.to_string(),
                    user_id: actor
                        .actor_id
                        .clone()
                        .unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
                    tenant_id: rule.domain.tenant_id.clone(),
                    resource: "policy".to_string(),
                    action: action.to_string(),
                    actor_id: actor
                        .actor_id
                        .clone()
                        .unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
                    actor_ip: actor.ip.clone(),
                    actor_user_agent: actor.user_agent.clone(),
                    details: json!({
                        "subject": rule.subject,
                        "applicationId": rule.domain.application_id,
                        "resource": rule.object,
                        "ruleAction": rule.action,
                        "effect": rule.effect.map(|e| e.as_str()),
                        "condition": rule.condition.as_str(),
                    }),
                })
                .await?;
        }
        Ok(())
    }

    /// Raw rule retrieval for drift diagnostics.
    pub async fn get_filtered_policy(
        &self,
        rule_type: RuleType,
        field_index: usize,
        values: &[String],
    ) -> Result<Vec<PolicyRule>> {
        self.enforcer
            .get_filtered_policy(rule_type, field_index, values)
            .await
    }

    /// Resolved role names for a user in a domain.
    pub async fn get_roles_for_user_in_domain(
        &self,
        user_id: &str,
        domain: &Domain,
    ) -> Result<Vec<String>> {
        self.enforcer
            .get_roles_for_user_in_domain(user_id, domain)
            .await
    }
}

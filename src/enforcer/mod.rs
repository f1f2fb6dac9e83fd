//! Policy enforcement
//!
//! Evaluation order: resolve the subject's roles in the domain, fetch
//! policy rules for the exact domain plus the application-global domain,
//! then apply deny-overrides with fail-closed default deny. Rules with
//! an `owner` or `shared` condition participate only when the runtime
//! context satisfies the condition.

pub mod resolver;

pub use resolver::{AssignmentRoleResolver, GroupingRuleResolver, RoleResolver};

use crate::domain::{Condition, Domain, Effect, PolicyRule, RuleType};
use crate::error::{AppError, Result};
use crate::repository::PolicyRepository;
use serde::Deserialize;
use std::sync::Arc;

/// Runtime context for conditional rules.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforceContext {
    /// Owner of the resource under check, for `owner` conditions.
    pub resource_owner_id: Option<String>,
    /// Whether the resource is shared with the subject, for `shared`
    /// conditions.
    #[serde(default)]
    pub shared_with_subject: bool,
}

fn condition_holds(condition: Condition, subject: &str, ctx: &EnforceContext) -> bool {
    match condition {
        Condition::None => true,
        Condition::Owner => ctx.resource_owner_id.as_deref() == Some(subject),
        Condition::Shared => ctx.shared_with_subject,
    }
}

/// Pure evaluation over an already-fetched rule set.
///
/// A rule matches when its subject is the checked subject itself or one
/// of the subject's resolved roles and its condition holds. Any matching
/// deny wins; no match at all denies.
pub fn evaluate(
    rules: &[PolicyRule],
    subject: &str,
    roles: &[String],
    ctx: &EnforceContext,
) -> bool {
    let mut allowed = false;
    for rule in rules {
        if rule.rule_type != RuleType::Policy {
            continue;
        }
        let subject_matches =
            rule.subject == subject || roles.iter().any(|role| *role == rule.subject);
        if !subject_matches {
            continue;
        }
        if !condition_holds(rule.condition, subject, ctx) {
            continue;
        }
        match rule.effect {
            Some(Effect::Deny) => return false,
            Some(Effect::Allow) => allowed = true,
            None => {}
        }
    }
    allowed
}

/// Policy store facade: rule administration plus enforcement.
pub struct Enforcer<P: PolicyRepository> {
    policy_repo: Arc<P>,
    resolver: Arc<dyn RoleResolver>,
}

impl<P: PolicyRepository> Enforcer<P> {
    pub fn new(policy_repo: Arc<P>, resolver: Arc<dyn RoleResolver>) -> Self {
        Self {
            policy_repo,
            resolver,
        }
    }

    /// Can `subject` perform `action` on `resource` in `domain`?
    pub async fn enforce(
        &self,
        subject: &str,
        domain: &Domain,
        resource: &str,
        action: &str,
        ctx: &EnforceContext,
    ) -> Result<bool> {
        let roles = self.resolver.resolve_roles(subject, domain).await?;

        let mut domain_keys = vec![domain.key()];
        if !domain.is_global() {
            domain_keys.push(domain.to_global().key());
        }

        let rules = self
            .policy_repo
            .find_policy_rules(&domain_keys, resource, action)
            .await?;

        let allowed = evaluate(&rules, subject, &roles, ctx);
        tracing::debug!(
            subject,
            domain = %domain,
            resource,
            action,
            allowed,
            matched_rules = rules.len(),
            "enforcement decision"
        );
        Ok(allowed)
    }

    /// Insert a policy rule; no-op when an identical rule exists.
    pub async fn add_policy(&self, rule: &PolicyRule) -> Result<bool> {
        if rule.rule_type != RuleType::Policy {
            return Err(AppError::Validation(
                "add_policy accepts policy rules only".to_string(),
            ));
        }
        self.policy_repo.add_rule(rule).await
    }

    /// Delete matching policy rules; returns the count removed.
    pub async fn remove_policy(&self, rule: &PolicyRule) -> Result<u64> {
        if rule.rule_type != RuleType::Policy {
            return Err(AppError::Validation(
                "remove_policy accepts policy rules only".to_string(),
            ));
        }
        self.policy_repo.remove_rule(rule).await
    }

    /// Raw matching rules by positional filter, for drift diagnostics
    /// and filtered removal.
    pub async fn get_filtered_policy(
        &self,
        rule_type: RuleType,
        field_index: usize,
        values: &[String],
    ) -> Result<Vec<PolicyRule>> {
        self.policy_repo
            .find_filtered(rule_type, field_index, values)
            .await
    }

    /// Filtered removal by the same positional filter.
    pub async fn remove_filtered_policy(
        &self,
        rule_type: RuleType,
        field_index: usize,
        values: &[String],
    ) -> Result<u64> {
        self.policy_repo
            .remove_filtered(rule_type, field_index, values)
            .await
    }

    /// Resolved role names for a user in a domain.
    pub async fn get_roles_for_user_in_domain(
        &self,
        user_id: &str,
        domain: &Domain,
    ) -> Result<Vec<String>> {
        self.resolver.resolve_roles(user_id, domain).await
    }
}

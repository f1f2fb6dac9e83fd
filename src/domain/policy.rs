//! Policy and grouping rule models
//!
//! Rules live in a generic 7-column tuple store (`ptype`, `v0..v6`).
//! A `policy` rule grants or denies an action on a resource to a role
//! (or directly to a user) within a domain. A `grouping` rule assigns
//! a role to a user within a domain and carries no action, effect or
//! condition.

use super::common::Domain;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Rule discriminator in the tuple store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Policy,
    Grouping,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Policy => "p",
            RuleType::Grouping => "g",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "p" => Some(RuleType::Policy),
            "g" => Some(RuleType::Grouping),
            _ => None,
        }
    }
}

/// Outcome attached to a policy rule. Deny overrides allow when both match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Effect::Allow),
            "deny" => Some(Effect::Deny),
            _ => None,
        }
    }
}

/// Dynamic predicate evaluated against runtime context in addition to the
/// static role/resource/action match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    #[default]
    None,
    Owner,
    Shared,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::None => "",
            Condition::Owner => "owner",
            Condition::Shared => "shared",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" => Some(Condition::None),
            "owner" => Some(Condition::Owner),
            "shared" => Some(Condition::Shared),
            _ => None,
        }
    }
}

/// Raw tuple-store row.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct PolicyTuple {
    pub ptype: String,
    pub v0: String,
    pub v1: String,
    pub v2: String,
    pub v3: String,
    pub v4: String,
    pub v5: String,
    pub v6: String,
}

/// A single authorization rule.
///
/// For `Policy` rules: `subject` is a role name or user id, `object` is
/// the resource. For `Grouping` rules: `subject` is a user id, `object`
/// is the role name, and action/effect/condition are unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub rule_type: RuleType,
    pub subject: String,
    pub domain: Domain,
    pub object: String,
    pub action: String,
    pub effect: Option<Effect>,
    pub condition: Condition,
}

impl PolicyRule {
    pub fn policy(
        subject: impl Into<String>,
        domain: Domain,
        resource: impl Into<String>,
        action: impl Into<String>,
        effect: Effect,
        condition: Condition,
    ) -> Self {
        Self {
            rule_type: RuleType::Policy,
            subject: subject.into(),
            domain,
            object: resource.into(),
            action: action.into(),
            effect: Some(effect),
            condition,
        }
    }

    pub fn grouping(user_id: impl Into<String>, role: impl Into<String>, domain: Domain) -> Self {
        Self {
            rule_type: RuleType::Grouping,
            subject: user_id.into(),
            domain,
            object: role.into(),
            action: String::new(),
            effect: None,
            condition: Condition::None,
        }
    }

    /// Role name carried by a grouping rule.
    pub fn role(&self) -> &str {
        &self.object
    }

    /// Tuple-store layout. Policy rules put the domain at `v1`, grouping
    /// rules at `v2`; the composite indexes depend on these positions.
    pub fn to_tuple(&self) -> PolicyTuple {
        match self.rule_type {
            RuleType::Policy => PolicyTuple {
                ptype: self.rule_type.as_str().to_string(),
                v0: self.subject.clone(),
                v1: self.domain.key(),
                v2: self.object.clone(),
                v3: self.action.clone(),
                v4: self.effect.map(|e| e.as_str()).unwrap_or("").to_string(),
                v5: self.condition.as_str().to_string(),
                ..Default::default()
            },
            RuleType::Grouping => PolicyTuple {
                ptype: self.rule_type.as_str().to_string(),
                v0: self.subject.clone(),
                v1: self.object.clone(),
                v2: self.domain.key(),
                ..Default::default()
            },
        }
    }

    pub fn from_tuple(tuple: &PolicyTuple) -> Result<Self, AppError> {
        let rule_type = RuleType::parse(&tuple.ptype)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown ptype {}", tuple.ptype)))?;
        match rule_type {
            RuleType::Policy => {
                let domain = Domain::parse_key(&tuple.v1).ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!("malformed domain key {}", tuple.v1))
                })?;
                let effect = Effect::parse(&tuple.v4).ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!("malformed effect {}", tuple.v4))
                })?;
                let condition = Condition::parse(&tuple.v5).ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!("malformed condition {}", tuple.v5))
                })?;
                Ok(Self {
                    rule_type,
                    subject: tuple.v0.clone(),
                    domain,
                    object: tuple.v2.clone(),
                    action: tuple.v3.clone(),
                    effect: Some(effect),
                    condition,
                })
            }
            RuleType::Grouping => {
                let domain = Domain::parse_key(&tuple.v2).ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!("malformed domain key {}", tuple.v2))
                })?;
                Ok(Self {
                    rule_type,
                    subject: tuple.v0.clone(),
                    domain,
                    object: tuple.v1.clone(),
                    action: String::new(),
                    effect: None,
                    condition: Condition::None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_rule_tuple_round_trip() {
        let rule = PolicyRule::policy(
            "editor",
            Domain::new("app1", Some("org1".to_string())),
            "posts",
            "update",
            Effect::Allow,
            Condition::None,
        );

        let tuple = rule.to_tuple();
        assert_eq!(tuple.ptype, "p");
        assert_eq!(tuple.v0, "editor");
        assert_eq!(tuple.v1, "app1:org1");
        assert_eq!(tuple.v2, "posts");
        assert_eq!(tuple.v3, "update");
        assert_eq!(tuple.v4, "allow");
        assert_eq!(tuple.v5, "");

        assert_eq!(PolicyRule::from_tuple(&tuple).unwrap(), rule);
    }

    #[test]
    fn test_grouping_rule_tuple_round_trip() {
        let rule = PolicyRule::grouping(
            "user123",
            "editor",
            Domain::new("app1", Some("org1".to_string())),
        );

        let tuple = rule.to_tuple();
        assert_eq!(tuple.ptype, "g");
        assert_eq!(tuple.v0, "user123");
        assert_eq!(tuple.v1, "editor");
        assert_eq!(tuple.v2, "app1:org1");
        assert_eq!(tuple.v3, "");
        assert_eq!(tuple.v4, "");

        let parsed = PolicyRule::from_tuple(&tuple).unwrap();
        assert_eq!(parsed, rule);
        assert_eq!(parsed.role(), "editor");
        assert!(parsed.effect.is_none());
        assert_eq!(parsed.condition, Condition::None);
    }

    #[test]
    fn test_grouping_rule_global_domain() {
        let rule = PolicyRule::grouping("user123", "admin", Domain::global("app1"));
        let tuple = rule.to_tuple();
        assert_eq!(tuple.v2, "app1:");
        assert_eq!(PolicyRule::from_tuple(&tuple).unwrap(), rule);
    }

    #[test]
    fn test_from_tuple_rejects_unknown_ptype() {
        let tuple = PolicyTuple {
            ptype: "x".to_string(),
            ..Default::default()
        };
        assert!(PolicyRule::from_tuple(&tuple).is_err());
    }

    #[test]
    fn test_from_tuple_rejects_malformed_effect() {
        let mut tuple = PolicyRule::policy(
            "viewer",
            Domain::global("app1"),
            "posts",
            "read",
            Effect::Allow,
            Condition::None,
        )
        .to_tuple();
        tuple.v4 = "maybe".to_string();
        assert!(PolicyRule::from_tuple(&tuple).is_err());
    }

    #[test]
    fn test_condition_parse() {
        assert_eq!(Condition::parse(""), Some(Condition::None));
        assert_eq!(Condition::parse("owner"), Some(Condition::Owner));
        assert_eq!(Condition::parse("shared"), Some(Condition::Shared));
        assert_eq!(Condition::parse("other"), None);
    }
}

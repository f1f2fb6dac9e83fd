use aegis_core::config::AuditConfig;
use aegis_core::domain::{
    AssignRoleInput, Condition, CreateRoleInput, Domain, Effect, PolicyRule, RuleType,
};
use aegis_core::enforcer::{AssignmentRoleResolver, EnforceContext, Enforcer};
use aegis_core::repository::audit::AuditRepositoryImpl;
use aegis_core::repository::policy::PolicyRepositoryImpl;
use aegis_core::repository::role::RoleRepositoryImpl;
use aegis_core::repository::RoleRepository;
use aegis_core::service::{
    ActorContext, AuditService, LoggingExportQueue, RoleAssignmentService,
};
use sqlx::MySqlPool;
use std::sync::Arc;

mod common;

struct Fixture {
    enforcer: Enforcer<PolicyRepositoryImpl>,
    assignment_service:
        RoleAssignmentService<RoleRepositoryImpl, PolicyRepositoryImpl, AuditRepositoryImpl>,
    app: String,
    tenant: String,
}

impl Fixture {
    async fn new(pool: &MySqlPool) -> Self {
        let role_repo = Arc::new(RoleRepositoryImpl::new(pool.clone()));
        let policy_repo = Arc::new(PolicyRepositoryImpl::new(pool.clone()));
        let audit = Arc::new(AuditService::new(
            Arc::new(AuditRepositoryImpl::new(pool.clone())),
            AuditConfig::default(),
            Arc::new(LoggingExportQueue),
        ));

        let enforcer = Enforcer::new(
            policy_repo.clone(),
            Arc::new(AssignmentRoleResolver::new(role_repo.clone(), None)),
        );
        let assignment_service = RoleAssignmentService::new(
            role_repo,
            policy_repo,
            Some(audit),
            None,
            false,
        );

        Self {
            enforcer,
            assignment_service,
            app: common::unique("app"),
            tenant: common::unique("org"),
        }
    }

    fn domain(&self) -> Domain {
        Domain::new(self.app.clone(), Some(self.tenant.clone()))
    }

    async fn grant_role(&self, pool: &MySqlPool, user: &str, role_name: &str) {
        let role = RoleRepositoryImpl::new(pool.clone())
            .create_role(&CreateRoleInput {
                name: role_name.to_string(),
                application_id: self.app.clone(),
                tenant_id: Some(self.tenant.clone()),
                is_system_role: false,
            })
            .await
            .unwrap();

        self.assignment_service
            .assign_role(
                AssignRoleInput {
                    user_id: user.to_string(),
                    role_id: role.id,
                    application_id: self.app.clone(),
                    tenant_id: Some(self.tenant.clone()),
                    assigned_by: None,
                },
                &ActorContext::default(),
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_editor_can_update_posts() {
    let pool = match common::get_test_pool().await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Skipping test: could not connect to database: {}", e);
            return;
        }
    };

    let fixture = Fixture::new(&pool).await;
    fixture.grant_role(&pool, "user123", "editor").await;
    fixture
        .enforcer
        .add_policy(&PolicyRule::policy(
            "editor",
            fixture.domain(),
            "posts",
            "update",
            Effect::Allow,
            Condition::None,
        ))
        .await
        .unwrap();

    let allowed = fixture
        .enforcer
        .enforce(
            "user123",
            &fixture.domain(),
            "posts",
            "update",
            &EnforceContext::default(),
        )
        .await
        .unwrap();
    assert!(allowed);

    // Unmatched action stays denied (fail-closed).
    let allowed = fixture
        .enforcer
        .enforce(
            "user123",
            &fixture.domain(),
            "posts",
            "delete",
            &EnforceContext::default(),
        )
        .await
        .unwrap();
    assert!(!allowed);
}

#[tokio::test]
async fn test_deny_overrides_allow() {
    let pool = match common::get_test_pool().await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Skipping test: could not connect to database: {}", e);
            return;
        }
    };

    let fixture = Fixture::new(&pool).await;
    fixture.grant_role(&pool, "user123", "editor").await;
    for effect in [Effect::Allow, Effect::Deny] {
        fixture
            .enforcer
            .add_policy(&PolicyRule::policy(
                "editor",
                fixture.domain(),
                "posts",
                "update",
                effect,
                Condition::None,
            ))
            .await
            .unwrap();
    }

    let allowed = fixture
        .enforcer
        .enforce(
            "user123",
            &fixture.domain(),
            "posts",
            "update",
            &EnforceContext::default(),
        )
        .await
        .unwrap();
    assert!(!allowed);
}

#[tokio::test]
async fn test_owner_condition() {
    let pool = match common::get_test_pool().await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Skipping test: could not connect to database: {}", e);
            return;
        }
    };

    let fixture = Fixture::new(&pool).await;
    fixture.grant_role(&pool, "user123", "author").await;
    fixture
        .enforcer
        .add_policy(&PolicyRule::policy(
            "author",
            fixture.domain(),
            "posts",
            "delete",
            Effect::Allow,
            Condition::Owner,
        ))
        .await
        .unwrap();

    // Not the owner: the base match is not enough.
    let allowed = fixture
        .enforcer
        .enforce(
            "user123",
            &fixture.domain(),
            "posts",
            "delete",
            &EnforceContext {
                resource_owner_id: Some("someone-else".to_string()),
                shared_with_subject: false,
            },
        )
        .await
        .unwrap();
    assert!(!allowed);

    let allowed = fixture
        .enforcer
        .enforce(
            "user123",
            &fixture.domain(),
            "posts",
            "delete",
            &EnforceContext {
                resource_owner_id: Some("user123".to_string()),
                shared_with_subject: false,
            },
        )
        .await
        .unwrap();
    assert!(allowed);
}

#[tokio::test]
async fn test_policy_idempotent_add_and_counted_remove() {
    let pool = match common::get_test_pool().await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Skipping test: could not connect to database: {}", e);
            return;
        }
    };

    let fixture = Fixture::new(&pool).await;
    let rule = PolicyRule::policy(
        "editor",
        fixture.domain(),
        "posts",
        "update",
        Effect::Allow,
        Condition::None,
    );

    assert!(fixture.enforcer.add_policy(&rule).await.unwrap());
    assert!(!fixture.enforcer.add_policy(&rule).await.unwrap());

    let removed = fixture.enforcer.remove_policy(&rule).await.unwrap();
    assert_eq!(removed, 1);
    let removed = fixture.enforcer.remove_policy(&rule).await.unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
async fn test_cross_tenant_roles_do_not_leak() {
    let pool = match common::get_test_pool().await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Skipping test: could not connect to database: {}", e);
            return;
        }
    };

    let fixture = Fixture::new(&pool).await;
    fixture.grant_role(&pool, "user123", "editor").await;
    fixture
        .enforcer
        .add_policy(&PolicyRule::policy(
            "editor",
            fixture.domain(),
            "posts",
            "update",
            Effect::Allow,
            Condition::None,
        ))
        .await
        .unwrap();

    // Same user, same application, different tenant: no roles, no access.
    let other_domain = Domain::new(fixture.app.clone(), Some(common::unique("org")));
    let allowed = fixture
        .enforcer
        .enforce(
            "user123",
            &other_domain,
            "posts",
            "update",
            &EnforceContext::default(),
        )
        .await
        .unwrap();
    assert!(!allowed);

    let roles = fixture
        .enforcer
        .get_roles_for_user_in_domain("user123", &other_domain)
        .await
        .unwrap();
    assert!(roles.is_empty());
}

#[tokio::test]
async fn test_get_filtered_policy_by_domain() {
    let pool = match common::get_test_pool().await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Skipping test: could not connect to database: {}", e);
            return;
        }
    };

    let fixture = Fixture::new(&pool).await;
    fixture
        .enforcer
        .add_policy(&PolicyRule::policy(
            "editor",
            fixture.domain(),
            "posts",
            "update",
            Effect::Allow,
            Condition::None,
        ))
        .await
        .unwrap();

    // Field index 1 is the domain position for policy rules.
    let rules = fixture
        .enforcer
        .get_filtered_policy(RuleType::Policy, 1, &[fixture.domain().key()])
        .await
        .unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].subject, "editor");
    assert_eq!(rules[0].domain, fixture.domain());

    // Filtered removal clears the domain's rules by the same predicate.
    let removed = fixture
        .enforcer
        .remove_filtered_policy(RuleType::Policy, 1, &[fixture.domain().key()])
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let rules = fixture
        .enforcer
        .get_filtered_policy(RuleType::Policy, 1, &[fixture.domain().key()])
        .await
        .unwrap();
    assert!(rules.is_empty());
}

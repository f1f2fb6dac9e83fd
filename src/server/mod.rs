//! Server initialization and routing

use crate::api;
use crate::cache::{CacheManager, CacheOperations};
use crate::config::Config;
use crate::enforcer::{AssignmentRoleResolver, Enforcer, GroupingRuleResolver, RoleResolver};
use crate::repository::{
    audit::AuditRepositoryImpl, policy::PolicyRepositoryImpl, role::RoleRepositoryImpl,
};
use crate::service::{
    AccessService, AuditService, LoggingExportQueue, RoleAssignmentService,
};
use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use sqlx::{mysql::MySqlPoolOptions, MySqlPool};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub type AssignmentServiceImpl =
    RoleAssignmentService<RoleRepositoryImpl, PolicyRepositoryImpl, AuditRepositoryImpl>;
pub type AccessServiceImpl = AccessService<PolicyRepositoryImpl, AuditRepositoryImpl>;
pub type AuditServiceImpl = AuditService<AuditRepositoryImpl>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db_pool: MySqlPool,
    pub assignment_service: Arc<AssignmentServiceImpl>,
    pub access_service: Arc<AccessServiceImpl>,
    /// None when the deployment has no audit collaborator; the audit
    /// HTTP surface then answers 503.
    pub audit_service: Option<Arc<AuditServiceImpl>>,
    pub cache: Option<Arc<dyn CacheOperations>>,
}

/// Wire repositories, resolver and services from a pool.
pub fn build_state(
    config: Config,
    pool: MySqlPool,
    cache: Option<Arc<dyn CacheOperations>>,
) -> AppState {
    let role_repo = Arc::new(RoleRepositoryImpl::new(pool.clone()));
    let policy_repo = Arc::new(PolicyRepositoryImpl::new(pool.clone()));
    let audit_repo = Arc::new(AuditRepositoryImpl::new(pool.clone()));

    let audit_service = config.audit.enabled.then(|| {
        Arc::new(AuditService::new(
            audit_repo,
            config.audit.clone(),
            Arc::new(LoggingExportQueue),
        ))
    });

    let resolver: Arc<dyn RoleResolver> = if config.grouping_projection {
        Arc::new(GroupingRuleResolver::new(policy_repo.clone()))
    } else {
        Arc::new(AssignmentRoleResolver::new(role_repo.clone(), cache.clone()))
    };
    let enforcer = Arc::new(Enforcer::new(policy_repo.clone(), resolver));

    let access_service = Arc::new(AccessService::new(
        enforcer,
        audit_service.clone(),
        cache.clone(),
    ));
    let assignment_service = Arc::new(RoleAssignmentService::new(
        role_repo,
        policy_repo,
        audit_service.clone(),
        cache.clone(),
        config.grouping_projection,
    ));

    AppState {
        config: Arc::new(config),
        db_pool: pool,
        assignment_service,
        access_service,
        audit_service,
        cache,
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(api::health::health))
        .route("/readyz", get(api::health::ready))
        .route("/{tenant_id}/audit-logs", get(api::audit::list))
        .route("/{tenant_id}/audit-logs/export", post(api::audit::export))
        .route("/{tenant_id}/audit-logs/verify", post(api::audit::verify))
        .route("/{tenant_id}/audit-logs/{event_id}", get(api::audit::get_by_id))
        .route("/{tenant_id}/roles", get(api::role::list_roles))
        .route(
            "/{tenant_id}/users/{user_id}/roles",
            get(api::role::list_user_roles).post(api::role::assign),
        )
        .route(
            "/{tenant_id}/users/{user_id}/roles/{role_id}",
            delete(api::role::remove),
        )
        .route("/{tenant_id}/access-checks", post(api::access::check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Connect to backing stores, build state and serve HTTP.
pub async fn run(config: Config) -> Result<()> {
    let pool = MySqlPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;

    let cache: Option<Arc<dyn CacheOperations>> = if config.redis.enabled {
        match CacheManager::new(&config.redis).await {
            Ok(manager) => Some(Arc::new(manager)),
            Err(e) => {
                warn!("Redis unavailable, running without cache: {}", e);
                None
            }
        }
    } else {
        None
    };

    let addr = config.http_addr();
    let state = build_state(config, pool, cache);
    let router = build_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

//! Common test utilities

use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::sync::Once;
use uuid::Uuid;

static ENV_INIT: Once = Once::new();

fn init_env() {
    ENV_INIT.call_once(|| {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();
    });
}

/// Connect to the test database from DATABASE_URL and apply migrations.
/// Tests skip themselves when this fails.
pub async fn get_test_pool() -> Result<MySqlPool, sqlx::Error> {
    init_env();

    let url = std::env::var("DATABASE_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| sqlx::Error::Configuration("DATABASE_URL is not set".into()))?;

    let pool = MySqlPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| sqlx::Error::Configuration(e.to_string().into()))?;

    Ok(pool)
}

/// Unique identifier so concurrent tests never share tenants, apps or
/// users.
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..12])
}

// Common test utilities that are shared across integration tests
use sqlx::PgPool;
use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init()
            .ok();
    });
}

/// A migrated pool for `TEST_DATABASE_URL`, or `None` when no test database
/// is configured.
pub async fn test_pool() -> Option<PgPool> {
    init_test_logging();
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = leavers_backend::database::create_pool(&url)
        .await
        .expect("Failed to connect to test database");
    leavers_backend::database::migrate(&pool)
        .await
        .expect("Failed to run migrations");
    Some(pool)
}

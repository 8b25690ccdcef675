// Common test utilities that are shared across integration tests
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();
    });
}

/// Connect to a throwaway database and bring the schema up to date.
pub async fn migrated_pool(database_url: &str) -> PgPool {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}

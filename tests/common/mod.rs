//! Shared test helpers for integration tests.

#![allow(dead_code)]

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if a test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// Connects to the test database and ensures the `titles` master table exists.
pub async fn setup_test_pool() -> sqlx::PgPool {
    let pool = sqlx::PgPool::connect(&test_db_url())
        .await
        .expect("failed to connect to test database");
    smax_postgres::dbconn::ensure_master_table(&pool)
        .await
        .expect("failed to ensure master table");
    pool
}

//! Connection Manager — connects to PostgreSQL with fixed-interval retries,
//! bootstraps the master mapping table, and exposes the pool the Writer
//! serializes all access through.

use crate::error::SqlError;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::time::Duration;

/// Retry cadence for the initial connection: 60s x 60 attempts. Exhausting
/// retries is one of the few conditions this daemon treats as fatal.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(60);
const CONNECT_RETRY_ATTEMPTS: u32 = 60;

/// The `titles` master mapping table.
const MASTER_TABLE: &str = "titles";

/// Connects to PostgreSQL, retrying on failure per the fixed backoff above.
/// Returns an error only after exhausting all attempts.
pub async fn connect_with_retry(opts: PgConnectOptions) -> Result<PgPool, SqlError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match PgPoolOptions::new()
            .max_connections(1)
            .connect_with(opts.clone())
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if attempt < CONNECT_RETRY_ATTEMPTS => {
                tracing::warn!(
                    attempt,
                    max_attempts = CONNECT_RETRY_ATTEMPTS,
                    error = %e,
                    "SQL connection failed, retrying"
                );
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(SqlError::Connection(e)),
        }
    }
}

/// Builds connection options from the individually configured
/// `sql_server`/`sql_db`/`sql_user`/`sql_auth` fields — there is no single
/// `DATABASE_URL` in this daemon's config grammar.
pub fn connect_options(host: &str, db: &str, user: &str, password: Option<&str>) -> PgConnectOptions {
    let mut opts = PgConnectOptions::new()
        .host(host)
        .database(db)
        .username(user)
        .statement_cache_capacity(0);
    if let Some(pw) = password {
        opts = opts.password(pw);
    }
    opts
}

/// Creates the `titles` master table if absent. Idempotent; safe to call on
/// every startup, including non-bootstrap runs, since ordinary operation
/// also depends on this table existing.
pub async fn ensure_master_table(pool: &PgPool) -> Result<(), SqlError> {
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {MASTER_TABLE} (name TEXT PRIMARY KEY, tid SERIAL UNIQUE)"
    ))
    .execute(pool)
    .await
    .map_err(|source| SqlError::Statement {
        statement: format!("CREATE TABLE {MASTER_TABLE}"),
        source,
    })?;
    Ok(())
}

/// Runs the `-b` bootstrap flow: connects as the admin user, creates the
/// logger's database role and database if they don't already exist.
pub async fn bootstrap(admin_opts: PgConnectOptions, db: &str, user: &str, password: &str) -> Result<(), SqlError> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(admin_opts)
        .await?;

    let role_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_roles WHERE rolname = $1)")
        .bind(user)
        .fetch_one(&pool)
        .await
        .map_err(|source| SqlError::Statement {
            statement: "SELECT FROM pg_roles".to_string(),
            source,
        })?;

    if !role_exists {
        let create_role = format!(
            "CREATE ROLE \"{}\" LOGIN PASSWORD '{}'",
            user.replace('"', "\"\""),
            password.replace('\'', "''")
        );
        sqlx::query(&create_role)
            .execute(&pool)
            .await
            .map_err(|source| SqlError::Statement {
                statement: "CREATE ROLE".to_string(),
                source,
            })?;
    }

    let db_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(db)
        .fetch_one(&pool)
        .await
        .map_err(|source| SqlError::Statement {
            statement: "SELECT FROM pg_database".to_string(),
            source,
        })?;

    if !db_exists {
        let create_db = format!(
            "CREATE DATABASE \"{}\" OWNER \"{}\"",
            db.replace('"', "\"\""),
            user.replace('"', "\"\"")
        );
        sqlx::query(&create_db)
            .execute(&pool)
            .await
            .map_err(|source| SqlError::Statement {
                statement: "CREATE DATABASE".to_string(),
                source,
            })?;
    }

    Ok(())
}

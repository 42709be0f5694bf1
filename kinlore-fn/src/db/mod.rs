//! Database access for kinlore-fn
//!
//! Shares `kinlore.db` in the root folder. Schema creation lives in
//! `kinlore_common::db`; this module holds the gateway's queries.

pub mod invitations;

use kinlore_common::retry::{retry_with_backoff, RetryPolicy};
use kinlore_common::{Error, Result};
use sqlx::SqlitePool;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// Open (or create) the database and make sure every table exists
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = kinlore_common::db::init_database(db_path).await?;
    tracing::info!("Database tables initialized (settings, role_permissions, invitations)");
    Ok(pool)
}

/// Backoff for writes that hit "database is locked"
///
/// busy_timeout already waits 5 s inside SQLite; this covers the rarer
/// SQLITE_BUSY returned without waiting (e.g. WAL checkpoint races).
fn lock_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 6,
        initial_delay: Duration::from_millis(10),
        multiplier: 2.0,
        max_delay: Duration::from_millis(1000),
    }
}

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => db_err.to_string().contains("database is locked"),
        _ => false,
    }
}

/// Retry a database operation while SQLite reports lock contention
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(operation_name, &lock_retry_policy(), is_lock_error, operation).await
}

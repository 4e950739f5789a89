//! PostgreSQL implementations of the store traits.
//!
//! One [`PgStore`] implements every store; each submodule holds the queries
//! and row types for one table. Typed permission collections cross the
//! boundary as JSONB through `sqlx::types::Json`.

mod analytics;
mod audit;
mod bulk;
mod directory;
mod grant;
mod invitation;
mod permission_request;

pub use directory::PgUserDirectory;

use sqlx::PgPool;

use farmgate_core::error::{AppError, ErrorKind};

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Return the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a sqlx error: unique violations become `Conflict`, everything else
/// `StorageUnavailable`.
pub(crate) fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| {
        let kind = match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => ErrorKind::Conflict,
            _ => ErrorKind::StorageUnavailable,
        };
        AppError::with_source(kind, context, e)
    }
}

/// Name of the violated constraint, if the error is a unique violation.
pub(crate) fn violated_constraint(e: &sqlx::Error) -> Option<&str> {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => db.constraint(),
        _ => None,
    }
}

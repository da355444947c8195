//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<DbError> for dockyard_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => dockyard_core::Error::NotFound(msg),
            other => dockyard_core::Error::Persistence(other.to_string()),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

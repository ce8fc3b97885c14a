use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load configuration for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("Database query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("A stored row could not be decoded: {0}")]
    Corrupt(String),

    #[error("The requested data was not found in the database.")]
    NotFound,
}

impl DbError {
    /// Serialization failures and deadlocks abort the transaction without
    /// writing anything; the caller may run the whole unit again.
    pub fn is_retryable(&self) -> bool {
        match self {
            DbError::Query(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            DbError::Query(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

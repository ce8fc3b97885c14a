use crate::error::DbError;
use configuration::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Establishes a connection pool to the PostgreSQL database.
///
/// The pool is cheap to clone and is shared by the HTTP handlers and the
/// background tasks.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DbError> {
    if config.url.trim().is_empty() {
        return Err(DbError::ConnectionConfigError(
            "database.url (or DATABASE_URL) must be set.".to_string(),
        ));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.url)
        .await?;

    tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL.");
    Ok(pool)
}

/// Applies the embedded migrations so the schema is up-to-date before the
/// application starts serving.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    // Use a relative path from the crate root
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

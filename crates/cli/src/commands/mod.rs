//! Subcommand implementations.

pub mod admin;
pub mod migrate;
pub mod shipping;

use secrecy::SecretString;
use sqlx::PgPool;

/// Errors shared by every command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Connect to the store database named by `RATNA_DATABASE_URL`, falling back
/// to `DATABASE_URL`.
pub(crate) async fn connect() -> Result<PgPool, CommandError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("RATNA_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("RATNA_DATABASE_URL"))?;

    tracing::info!("Connecting to database...");
    Ok(ratna_api::db::create_pool(&database_url).await?)
}

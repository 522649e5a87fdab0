use gateway::GatewayError;
use thiserror::Error;

/// Everything that can stop the station from starting.
#[derive(Debug, Error)]
pub enum StationError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serial gateway: {0}")]
    Gateway(#[from] GatewayError),
}

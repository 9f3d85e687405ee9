use thiserror::Error;

/// Upstream provider failures, classified so the scheduler knows which
/// ones are worth retrying within a cycle.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("product no longer exists upstream")]
    NotFound,

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("network error: {0}")]
    TransientNetwork(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Only rate limiting and transient network failures may be retried
    /// within the same cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientNetwork(_))
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        let constraint = err
            .as_database_error()
            .filter(|db| db.is_unique_violation() || db.is_foreign_key_violation())
            .map(|db| db.message().to_string());

        match constraint {
            Some(message) => StorageError::ConstraintViolation(message),
            None => StorageError::Database(err),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {resource}")]
    NotFound { resource: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(StorageError::from(err))
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

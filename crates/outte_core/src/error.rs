use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutteError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
    #[error("transient fetch failure: {message}")]
    TransientFetch { message: String },
    #[error("data integrity anomaly: {message}")]
    DataIntegrity { message: String },
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl OutteError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientFetch {
            message: message.into(),
        }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether a retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OutteError::TransientFetch { .. } | OutteError::DataIntegrity { .. }
        )
    }
}

pub type OutteResult<T> = Result<T, OutteError>;

impl From<sea_orm::DbErr> for OutteError {
    fn from(value: sea_orm::DbErr) -> Self {
        OutteError::storage(value.to_string())
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("User not authenticated")]
    Unauthenticated,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Text suitable for an alert shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthenticated => "You need to sign in first".to_string(),
            AppError::PermissionDenied(msg) | AppError::Validation(msg) => msg.clone(),
            AppError::NotFound(_) => "That spot no longer exists".to_string(),
            AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => "Something went wrong, please try again".to_string(),
        }
    }

    /// True for network/service failures as opposed to caller mistakes.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Migration(_)
                | AppError::Serialization(_)
                | AppError::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

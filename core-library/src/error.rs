use thiserror::Error;

/// Failures raised by the channel and video store.
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity_type} '{id}' is not stored")]
    NotFound { entity_type: String, id: String },

    #[error("Rejected {field}: {message}")]
    InvalidInput { field: String, message: String },

    /// A video lifecycle move that the state machine does not allow
    #[error("Cannot move video from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

impl LibraryError {
    pub fn not_found(entity_type: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            id: id.into(),
        }
    }

    pub fn invalid_input(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// True when the store refused a row because a unique key already exists.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;

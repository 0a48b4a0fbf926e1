use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write matched no row: the row is missing or its version moved on.
    #[error("No rows affected writing {entity} {id}")]
    NoRowsAffected { entity: &'static str, id: String },

    /// A row with the same key already exists.
    #[error("Duplicate {entity}: {id}")]
    Duplicate { entity: &'static str, id: String },

    /// A stored row could not be turned back into a domain value.
    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    /// The backing store refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn no_rows(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NoRowsAffected {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

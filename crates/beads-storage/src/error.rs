//! Storage error types.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g., "instance", "step", "config").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A record with the same key already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: String, id: String },

    /// A guarded update found the record in a different state than expected.
    #[error("{entity} {id} changed concurrently: {message}")]
    Conflict {
        entity: String,
        id: String,
        message: String,
    },

    /// A validation constraint was violated.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The transaction body stopped for a reason of its own; the caller
    /// holds the actual cause. Nothing was committed.
    #[error("transaction aborted")]
    Aborted,

    /// The database is locked by another process.
    #[error("database locked: {0}")]
    DatabaseLocked(String),

    /// Failed to establish or maintain a database connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A transaction operation failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A schema migration failed.
    #[error("migration {name} failed: {reason}")]
    Migration {
        /// Name of the migration that failed.
        name: String,
        /// Underlying error description.
        reason: String,
    },

    /// A stored value could not be decoded.
    #[error("corrupt {column} value {value:?}")]
    Corrupt { column: String, value: String },

    /// A raw SQLite query error.
    #[error("query error: {0}")]
    Query(#[from] rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`StorageError::NotFound`] for the given entity kind and id.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a [`StorageError::AlreadyExists`] for the given entity kind and id.
    pub fn already_exists(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a [`StorageError::Conflict`].
    pub fn conflict(
        entity: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            entity: entity.into(),
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates a [`StorageError::Validation`] with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if this is a [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a [`StorageError::AlreadyExists`].
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns `true` if the error is transient and the operation may succeed
    /// on retry (e.g., database locked, connection errors).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DatabaseLocked(_) | Self::Connection(_) | Self::Transaction(_) => true,
            Self::Query(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Maps "no rows" to [`StorageError::NotFound`].
pub(crate) fn map_no_rows(entity: &str, id: &str) -> impl FnOnce(rusqlite::Error) -> StorageError {
    let entity = entity.to_string();
    let id = id.to_string();
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound { entity, id },
        other => StorageError::Query(other),
    }
}

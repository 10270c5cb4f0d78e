//! Error types for the migration engine.

use strata_schema::SchemaError;
use thiserror::Error;

use crate::connector::ConnectorError;
use crate::operation::SchemaOperation;
use crate::status::Drift;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Scaffolding found no difference between the previous and current model.
    #[error("No schema changes detected: the current model matches the latest migration")]
    EmptyDiff,

    /// A migration with this id already exists.
    #[error("Migration '{id}' already exists")]
    NameCollision {
        /// Colliding migration ID.
        id: String,
    },

    /// The migration name cannot be turned into an id.
    #[error("Invalid migration name '{0}'")]
    InvalidName(String),

    /// Migration not found in the repository.
    #[error("Migration '{id}' not found")]
    ArtifactNotFound {
        /// Requested migration ID or name.
        id: String,
    },

    /// A target name matches more than one migration.
    #[error("Migration name '{name}' is ambiguous, candidates: {}", candidates.join(", "))]
    AmbiguousTarget {
        /// Requested name.
        name: String,
        /// Matching migration IDs.
        candidates: Vec<String>,
    },

    /// Another process holds the migration lock.
    #[error("Another migration is in progress (lock '{lock}' is taken)")]
    ConcurrentMigration {
        /// Name of the contended lock.
        lock: String,
    },

    /// A schema operation failed against the database.
    #[error("Migration '{migration_id}' failed at operation {index} ({}): {source}", operation.describe())]
    OperationExecution {
        /// Migration being applied or reverted.
        migration_id: String,
        /// Zero-based index of the failing operation.
        index: usize,
        /// The failing operation.
        operation: Box<SchemaOperation>,
        /// Underlying database error.
        #[source]
        source: ConnectorError,
    },

    /// The migration transaction did not finish in time and was rolled back.
    #[error("Migration '{migration_id}' timed out after {timeout_ms}ms and was rolled back")]
    Timeout {
        /// Migration being applied or reverted.
        migration_id: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The repository and the history store disagree.
    #[error("History drift detected: {}", format_drift(issues))]
    HistoryDrift {
        /// Detected inconsistencies.
        issues: Vec<Drift>,
    },

    /// A stored artifact is malformed.
    #[error("Invalid migration artifact '{id}': {message}")]
    InvalidArtifact {
        /// Artifact ID or path.
        id: String,
        /// What is wrong with it.
        message: String,
    },

    /// An operation cannot be applied to the model.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Application was cancelled between migrations.
    #[error("Migration cancelled after {applied} migration(s)")]
    Cancelled {
        /// Migrations completed before cancellation.
        applied: usize,
    },

    /// Database error outside of operation execution.
    #[error("Database error: {0}")]
    Database(#[from] ConnectorError),

    /// Model error.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact encoding error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_drift(issues: &[Drift]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl MigrationError {
    /// Create a name collision error.
    pub fn name_collision(id: impl Into<String>) -> Self {
        Self::NameCollision { id: id.into() }
    }

    /// Create an artifact not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::ArtifactNotFound { id: id.into() }
    }

    /// Create an invalid artifact error.
    pub fn invalid_artifact(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArtifact {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(ConnectorError::new(msg))
    }

    /// Create a concurrent migration error.
    pub fn concurrent(lock: impl Into<String>) -> Self {
        Self::ConcurrentMigration { lock: lock.into() }
    }

    /// Check if the caller may safely retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentMigration { .. } | Self::Timeout { .. } | Self::Cancelled { .. }
        )
    }

    /// Migration ID this error is attributed to, if any.
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            Self::OperationExecution { migration_id, .. } | Self::Timeout { migration_id, .. } => {
                Some(migration_id)
            }
            Self::NameCollision { id }
            | Self::ArtifactNotFound { id }
            | Self::InvalidArtifact { id, .. } => Some(id),
            _ => None,
        }
    }
}

//! Error types for model snapshots and model files.

// These warnings are false positives - the fields are used by derive macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while building, loading or validating a model snapshot.
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaError {
    /// Error reading a model file.
    #[error("failed to read model file: {path}")]
    #[diagnostic(code(strata::schema::io_error))]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse model file: {source}")]
    #[diagnostic(code(strata::schema::toml_error))]
    TomlError {
        #[source]
        source: toml::de::Error,
    },

    /// Duplicate definition.
    #[error("duplicate {kind} `{name}`")]
    #[diagnostic(code(strata::schema::duplicate))]
    Duplicate { kind: String, name: String },

    /// Reference to a table that does not exist.
    #[error("unknown table `{name}`")]
    #[diagnostic(code(strata::schema::unknown_table))]
    UnknownTable { name: String },

    /// Reference to a column that does not exist.
    #[error("unknown column `{table}.{column}`")]
    #[diagnostic(code(strata::schema::unknown_column))]
    UnknownColumn { table: String, column: String },

    /// Invalid table definition.
    #[error("invalid table `{name}`: {message}")]
    #[diagnostic(code(strata::schema::invalid_table))]
    InvalidTable { name: String, message: String },

    /// Invalid index or constraint definition.
    #[error("invalid {kind} `{table}.{name}`: {message}")]
    #[diagnostic(code(strata::schema::invalid_definition))]
    InvalidDefinition {
        kind: String,
        table: String,
        name: String,
        message: String,
    },

    /// Validation error with multiple issues.
    #[error("model validation failed with {count} error(s)")]
    #[diagnostic(code(strata::schema::validation_failed))]
    ValidationFailed {
        count: usize,
        #[related]
        errors: Vec<SchemaError>,
    },
}

impl SchemaError {
    /// Create a duplicate definition error.
    pub fn duplicate(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Duplicate {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an unknown table error.
    pub fn unknown_table(name: impl Into<String>) -> Self {
        Self::UnknownTable { name: name.into() }
    }

    /// Create an unknown column error.
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create an invalid table error.
    pub fn invalid_table(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTable {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid index or constraint error.
    pub fn invalid_definition(
        kind: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidDefinition {
            kind: kind.into(),
            table: table.into(),
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for SchemaError {
    fn from(source: toml::de::Error) -> Self {
        Self::TomlError { source }
    }
}

#[cfg(test)]
#[allow(unused_assignments)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_error() {
        let err = SchemaError::duplicate("table", "users");
        assert_eq!(err.to_string(), "duplicate table `users`");
    }

    #[test]
    fn test_unknown_column_error() {
        let err = SchemaError::unknown_column("users", "email");

        match &err {
            SchemaError::UnknownColumn { table, column } => {
                assert_eq!(table, "users");
                assert_eq!(column, "email");
            }
            _ => panic!("Expected UnknownColumn"),
        }
        assert!(err.to_string().contains("users.email"));
    }

    #[test]
    fn test_invalid_definition_error() {
        let err = SchemaError::invalid_definition("index", "users", "idx_email", "no columns");
        assert_eq!(err.to_string(), "invalid index `users.idx_email`: no columns");
    }

    #[test]
    fn test_validation_failed_counts() {
        let err = SchemaError::ValidationFailed {
            count: 2,
            errors: vec![
                SchemaError::unknown_table("posts"),
                SchemaError::unknown_column("users", "id"),
            ],
        };
        assert!(err.to_string().contains("2 error(s)"));
    }
}

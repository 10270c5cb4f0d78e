//! Model providers: where the current target model comes from.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{SchemaError, SchemaResult};
use crate::snapshot::Snapshot;

/// Supplies the current model the engine should migrate towards.
pub trait ModelProvider: Send + Sync {
    /// Return the current model snapshot.
    fn current_model(&self) -> SchemaResult<Snapshot>;
}

impl ModelProvider for Snapshot {
    fn current_model(&self) -> SchemaResult<Snapshot> {
        Ok(self.clone())
    }
}

impl<P: ModelProvider + ?Sized> ModelProvider for &P {
    fn current_model(&self) -> SchemaResult<Snapshot> {
        (**self).current_model()
    }
}

/// Reads the model from a TOML file every time it is asked.
#[derive(Debug, Clone)]
pub struct FileModelProvider {
    path: PathBuf,
}

impl FileModelProvider {
    /// Create a provider for the given model file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the model file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelProvider for FileModelProvider {
    fn current_model(&self) -> SchemaResult<Snapshot> {
        load_model_file(&self.path)
    }
}

/// Parse a model from TOML source.
pub fn parse_model(source: &str) -> SchemaResult<Snapshot> {
    let snapshot: Snapshot = toml::from_str(source)?;
    debug!(tables = snapshot.len(), "Model parsed");
    Ok(snapshot)
}

/// Load a model from a TOML file.
pub fn load_model_file(path: impl AsRef<Path>) -> SchemaResult<Snapshot> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| SchemaError::IoError {
        path: path.display().to_string(),
        source: e,
    })?;

    let snapshot = parse_model(&source)?;
    info!(path = %path.display(), tables = snapshot.len(), "Model loaded");
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;
    use crate::constraint::ConstraintKind;
    use std::io::Write;

    const MODEL: &str = r#"
[[tables]]
name = "users"

[[tables.columns]]
name = "id"
type = "integer"

[[tables.columns]]
name = "email"
type = { varchar = 255 }
nullable = true

[[tables.indexes]]
name = "idx_users_email"
columns = ["email"]
unique = true

[[tables.constraints]]
name = "users_pkey"
kind = "primary_key"
columns = ["id"]
"#;

    #[test]
    fn test_parse_model() {
        let snapshot = parse_model(MODEL).unwrap();
        let users = snapshot.table("users").unwrap();

        assert_eq!(users.column_count(), 2);
        let email = users.get_column("email").unwrap();
        assert_eq!(email.column_type, ColumnType::Varchar(255));
        assert!(email.nullable);
        assert!(users.get_index("idx_users_email").unwrap().unique);
        assert!(matches!(
            users.primary_key().unwrap().kind,
            ConstraintKind::PrimaryKey { .. }
        ));
    }

    #[test]
    fn test_parse_empty_model() {
        let snapshot = parse_model("").unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_parse_duplicate_column_fails() {
        let source = r#"
[[tables]]
name = "t"
[[tables.columns]]
name = "a"
type = "text"
[[tables.columns]]
name = "a"
type = "text"
"#;
        assert!(parse_model(source).is_err());
    }

    #[test]
    fn test_file_provider() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MODEL.as_bytes()).unwrap();

        let provider = FileModelProvider::new(file.path());
        let snapshot = provider.current_model().unwrap();
        assert!(snapshot.contains_table("users"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_model_file("/nonexistent/model.toml").unwrap_err();
        assert!(matches!(err, SchemaError::IoError { .. }));
    }

    #[test]
    fn test_snapshot_is_its_own_provider() {
        let snapshot = parse_model(MODEL).unwrap();
        assert_eq!(snapshot.current_model().unwrap(), snapshot);
    }
}

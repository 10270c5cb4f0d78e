//! Structural validation of model snapshots.

use tracing::debug;

use crate::column::ColumnType;
use crate::constraint::ConstraintKind;
use crate::error::{SchemaError, SchemaResult};
use crate::snapshot::{Snapshot, Table};

/// Collects every problem in a snapshot instead of stopping at the first one.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<SchemaError>,
}

impl Validator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a snapshot.
    pub fn validate(mut self, snapshot: &Snapshot) -> SchemaResult<()> {
        for table in snapshot.tables() {
            self.validate_table(snapshot, table);
        }

        debug!(
            tables = snapshot.len(),
            errors = self.errors.len(),
            "Model validated"
        );

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::ValidationFailed {
                count: self.errors.len(),
                errors: self.errors,
            })
        }
    }

    fn validate_table(&mut self, snapshot: &Snapshot, table: &Table) {
        if table.name().is_empty() {
            self.errors
                .push(SchemaError::invalid_table("", "table name is empty"));
        }
        if table.column_count() == 0 {
            self.errors.push(SchemaError::invalid_table(
                table.name(),
                "a table needs at least one column",
            ));
        }

        for column in table.columns() {
            if column.column_type == ColumnType::Varchar(0) {
                self.errors.push(SchemaError::invalid_definition(
                    "column",
                    table.name(),
                    &column.name,
                    "varchar length must be positive",
                ));
            }
        }

        for index in table.indexes() {
            if index.columns.is_empty() {
                self.errors.push(SchemaError::invalid_definition(
                    "index",
                    table.name(),
                    &index.name,
                    "an index needs at least one column",
                ));
            }
            for column in &index.columns {
                if !table.has_column(column) {
                    self.errors
                        .push(SchemaError::unknown_column(table.name(), column));
                }
            }
        }

        let primary_keys = table.constraints().filter(|c| c.is_primary_key()).count();
        if primary_keys > 1 {
            self.errors.push(SchemaError::invalid_table(
                table.name(),
                format!("{} primary keys declared, at most one allowed", primary_keys),
            ));
        }

        for constraint in table.constraints() {
            for column in constraint.columns() {
                if !table.has_column(column) {
                    self.errors
                        .push(SchemaError::unknown_column(table.name(), column));
                }
            }

            match &constraint.kind {
                ConstraintKind::PrimaryKey { columns } | ConstraintKind::Unique { columns }
                    if columns.is_empty() =>
                {
                    self.errors.push(SchemaError::invalid_definition(
                        constraint.kind_name(),
                        table.name(),
                        &constraint.name,
                        "no columns listed",
                    ));
                }
                ConstraintKind::ForeignKey {
                    columns,
                    references_table,
                    references_columns,
                    ..
                } => {
                    if columns.len() != references_columns.len() || columns.is_empty() {
                        self.errors.push(SchemaError::invalid_definition(
                            "foreign key",
                            table.name(),
                            &constraint.name,
                            format!(
                                "{} local column(s) but {} referenced column(s)",
                                columns.len(),
                                references_columns.len()
                            ),
                        ));
                    }
                    match snapshot.table(references_table) {
                        Some(target) => {
                            for column in references_columns {
                                if !target.has_column(column) {
                                    self.errors
                                        .push(SchemaError::unknown_column(references_table, column));
                                }
                            }
                        }
                        None => self
                            .errors
                            .push(SchemaError::unknown_table(references_table)),
                    }
                }
                ConstraintKind::Check { expression } if expression.trim().is_empty() => {
                    self.errors.push(SchemaError::invalid_definition(
                        "check constraint",
                        table.name(),
                        &constraint.name,
                        "empty expression",
                    ));
                }
                _ => {}
            }
        }
    }
}

impl Snapshot {
    /// Validate the structural integrity of this snapshot.
    pub fn validate(&self) -> SchemaResult<()> {
        Validator::new().validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;
    use crate::constraint::{Constraint, Index};

    fn error_count(result: SchemaResult<()>) -> usize {
        match result {
            Err(SchemaError::ValidationFailed { count, .. }) => count,
            Err(other) => panic!("Expected ValidationFailed, got {other:?}"),
            Ok(()) => 0,
        }
    }

    #[test]
    fn test_valid_snapshot() {
        let snapshot = Snapshot::new()
            .with_table(
                Table::new("users")
                    .column(Column::new("id", ColumnType::Integer))
                    .constraint(Constraint::primary_key("users_pkey", ["id"])),
            )
            .with_table(
                Table::new("posts")
                    .column(Column::new("id", ColumnType::Integer))
                    .column(Column::new("author", ColumnType::Integer))
                    .index(Index::new("idx_posts_author", ["author"]))
                    .constraint(Constraint::foreign_key("fk", ["author"], "users", ["id"])),
            );

        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn test_empty_snapshot_is_valid() {
        assert!(Snapshot::new().validate().is_ok());
    }

    #[test]
    fn test_table_without_columns() {
        let snapshot = Snapshot::new().with_table(Table::new("empty"));
        assert_eq!(error_count(snapshot.validate()), 1);
    }

    #[test]
    fn test_index_on_missing_column() {
        let snapshot = Snapshot::new().with_table(
            Table::new("users")
                .column(Column::new("id", ColumnType::Integer))
                .index(Index::new("idx_email", ["email"])),
        );
        assert_eq!(error_count(snapshot.validate()), 1);
    }

    #[test]
    fn test_foreign_key_to_missing_table() {
        let snapshot = Snapshot::new().with_table(
            Table::new("posts")
                .column(Column::new("author", ColumnType::Integer))
                .constraint(Constraint::foreign_key("fk", ["author"], "users", ["id"])),
        );
        assert_eq!(error_count(snapshot.validate()), 1);
    }

    #[test]
    fn test_errors_are_collected() {
        let snapshot = Snapshot::new()
            .with_table(Table::new("empty"))
            .with_table(
                Table::new("users")
                    .column(Column::new("id", ColumnType::Integer))
                    .column(Column::new("code", ColumnType::Varchar(0)))
                    .constraint(Constraint::primary_key("pk1", ["id"]))
                    .constraint(Constraint::primary_key("pk2", ["code"])),
            );
        assert_eq!(error_count(snapshot.validate()), 3);
    }
}

//! Schema operations: the steps a migration is made of.

use serde::{Deserialize, Serialize};
use strata_schema::{Column, Constraint, Index, Snapshot, Table};

use crate::error::{MigrateResult, MigrationError};

/// A single schema change.
///
/// Every variant carries enough data to be executed and to be inverted: drop
/// operations hold the full definition of what they remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOperation {
    /// Create a table.
    CreateTable { table: Table },
    /// Drop a table.
    DropTable { table: Table },
    /// Add a column to a table.
    AddColumn { table: String, column: Column },
    /// Drop a column from a table.
    DropColumn { table: String, column: Column },
    /// Change a column's type, nullability or default.
    AlterColumn {
        table: String,
        from: Column,
        to: Column,
    },
    /// Create an index.
    CreateIndex { table: String, index: Index },
    /// Drop an index.
    DropIndex { table: String, index: Index },
    /// Add a constraint.
    AddConstraint {
        table: String,
        constraint: Constraint,
    },
    /// Drop a constraint.
    DropConstraint {
        table: String,
        constraint: Constraint,
    },
    /// Rename a table.
    RenameTable { from: String, to: String },
    /// Rename a column.
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
}

impl SchemaOperation {
    /// The structural inverse of this operation.
    pub fn invert(&self) -> SchemaOperation {
        match self.clone() {
            Self::CreateTable { table } => Self::DropTable { table },
            Self::DropTable { table } => Self::CreateTable { table },
            Self::AddColumn { table, column } => Self::DropColumn { table, column },
            Self::DropColumn { table, column } => Self::AddColumn { table, column },
            Self::AlterColumn { table, from, to } => Self::AlterColumn {
                table,
                from: to,
                to: from,
            },
            Self::CreateIndex { table, index } => Self::DropIndex { table, index },
            Self::DropIndex { table, index } => Self::CreateIndex { table, index },
            Self::AddConstraint { table, constraint } => {
                Self::DropConstraint { table, constraint }
            }
            Self::DropConstraint { table, constraint } => {
                Self::AddConstraint { table, constraint }
            }
            Self::RenameTable { from, to } => Self::RenameTable { from: to, to: from },
            Self::RenameColumn { table, from, to } => Self::RenameColumn {
                table,
                from: to,
                to: from,
            },
        }
    }

    /// Name of the table this operation acts on (the old name for renames).
    pub fn table_name(&self) -> &str {
        match self {
            Self::CreateTable { table } | Self::DropTable { table } => table.name(),
            Self::RenameTable { from, .. } => from,
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::AddConstraint { table, .. }
            | Self::DropConstraint { table, .. }
            | Self::RenameColumn { table, .. } => table,
        }
    }

    /// Check whether the operation can lose data.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::DropTable { .. } | Self::DropColumn { .. })
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        match self {
            Self::CreateTable { table } => format!("create table {}", table.name()),
            Self::DropTable { table } => format!("drop table {}", table.name()),
            Self::AddColumn { table, column } => {
                format!("add column {}.{} ({})", table, column.name, column.column_type)
            }
            Self::DropColumn { table, column } => format!("drop column {}.{}", table, column.name),
            Self::AlterColumn { table, to, .. } => {
                format!("alter column {}.{} ({})", table, to.name, to.column_type)
            }
            Self::CreateIndex { table, index } => {
                format!("create index {} on {}", index.name, table)
            }
            Self::DropIndex { table, index } => format!("drop index {} on {}", index.name, table),
            Self::AddConstraint { table, constraint } => format!(
                "add {} {} on {}",
                constraint.kind_name(),
                constraint.name,
                table
            ),
            Self::DropConstraint { table, constraint } => format!(
                "drop {} {} on {}",
                constraint.kind_name(),
                constraint.name,
                table
            ),
            Self::RenameTable { from, to } => format!("rename table {} to {}", from, to),
            Self::RenameColumn { table, from, to } => {
                format!("rename column {}.{} to {}", table, from, to)
            }
        }
    }

    /// Apply this operation to a model snapshot.
    pub fn apply_to(&self, snapshot: &mut Snapshot) -> MigrateResult<()> {
        let invalid = |reason: String| {
            MigrationError::invalid_operation(format!("{}: {}", self.describe(), reason))
        };

        match self {
            Self::CreateTable { table } => {
                snapshot
                    .add_table(table.clone())
                    .map_err(|e| invalid(e.to_string()))?;
            }
            Self::DropTable { table } => {
                let referenced_by: Vec<String> = snapshot
                    .references_to(table.name())
                    .into_iter()
                    .filter(|(owner, _)| *owner != table.name())
                    .map(|(owner, fk)| format!("{}.{}", owner, fk.name))
                    .collect();
                if !referenced_by.is_empty() {
                    return Err(invalid(format!(
                        "still referenced by {}",
                        referenced_by.join(", ")
                    )));
                }
                snapshot
                    .remove_table(table.name())
                    .ok_or_else(|| invalid("table does not exist".to_string()))?;
            }
            Self::AddColumn { table, column } => {
                require_table(snapshot, table, &invalid)?
                    .add_column(column.clone())
                    .map_err(|e| invalid(e.to_string()))?;
            }
            Self::DropColumn { table, column } => {
                let t = require_table(snapshot, table, &invalid)?;
                if t.is_column_referenced(&column.name) {
                    return Err(invalid(
                        "column is still used by an index or constraint".to_string(),
                    ));
                }
                t.remove_column(&column.name)
                    .ok_or_else(|| invalid("column does not exist".to_string()))?;
            }
            Self::AlterColumn { table, from, to } => {
                if from.name != to.name {
                    return Err(invalid("alter cannot change the column name".to_string()));
                }
                require_table(snapshot, table, &invalid)?
                    .replace_column(to.clone())
                    .map_err(|e| invalid(e.to_string()))?;
            }
            Self::CreateIndex { table, index } => {
                let t = require_table(snapshot, table, &invalid)?;
                require_columns(t, &index.columns, &invalid)?;
                t.add_index(index.clone())
                    .map_err(|e| invalid(e.to_string()))?;
            }
            Self::DropIndex { table, index } => {
                require_table(snapshot, table, &invalid)?
                    .remove_index(&index.name)
                    .ok_or_else(|| invalid("index does not exist".to_string()))?;
            }
            Self::AddConstraint { table, constraint } => {
                if let Some(target) = constraint.references_table() {
                    if target != table.as_str() && !snapshot.contains_table(target) {
                        return Err(invalid(format!("referenced table {} does not exist", target)));
                    }
                }
                let t = require_table(snapshot, table, &invalid)?;
                require_columns(t, constraint.columns(), &invalid)?;
                t.add_constraint(constraint.clone())
                    .map_err(|e| invalid(e.to_string()))?;
            }
            Self::DropConstraint { table, constraint } => {
                require_table(snapshot, table, &invalid)?
                    .remove_constraint(&constraint.name)
                    .ok_or_else(|| invalid("constraint does not exist".to_string()))?;
            }
            Self::RenameTable { from, to } => {
                snapshot
                    .rename_table(from, to)
                    .map_err(|e| invalid(e.to_string()))?;
            }
            Self::RenameColumn { table, from, to } => {
                snapshot
                    .rename_column(table, from, to)
                    .map_err(|e| invalid(e.to_string()))?;
            }
        }
        Ok(())
    }
}

fn require_table<'s>(
    snapshot: &'s mut Snapshot,
    name: &str,
    invalid: &impl Fn(String) -> MigrationError,
) -> MigrateResult<&'s mut Table> {
    snapshot
        .table_mut(name)
        .ok_or_else(|| invalid("table does not exist".to_string()))
}

fn require_columns(
    table: &Table,
    columns: &[String],
    invalid: &impl Fn(String) -> MigrationError,
) -> MigrateResult<()> {
    match columns.iter().find(|c| !table.has_column(c)) {
        Some(missing) => Err(invalid(format!("column {} does not exist", missing))),
        None => Ok(()),
    }
}

/// Apply a sequence of operations to a copy of `snapshot`.
pub fn apply_operations(
    snapshot: &Snapshot,
    operations: &[SchemaOperation],
) -> MigrateResult<Snapshot> {
    let mut result = snapshot.clone();
    for op in operations {
        op.apply_to(&mut result)?;
    }
    Ok(result)
}

/// Inverse of a sequence of operations: every operation inverted, in reverse order.
pub fn invert_all(operations: &[SchemaOperation]) -> Vec<SchemaOperation> {
    operations.iter().rev().map(SchemaOperation::invert).collect()
}

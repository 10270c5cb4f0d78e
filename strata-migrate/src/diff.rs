//! Model diffing: the operations that turn one snapshot into another.

use std::collections::BTreeMap;

use strata_schema::{Constraint, Snapshot, Table};
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};
use crate::operation::{SchemaOperation, invert_all};

/// The forward and reverse operation lists between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    /// Operations from the previous snapshot to the current one.
    pub up: Vec<SchemaOperation>,
    /// Exact inverse of `up`, in reverse order.
    pub down: Vec<SchemaOperation>,
}

impl SchemaDiff {
    fn from_up(up: Vec<SchemaOperation>) -> Self {
        let down = invert_all(&up);
        Self { up, down }
    }

    /// Check if there are any differences.
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }

    /// Number of forward operations.
    pub fn len(&self) -> usize {
        self.up.len()
    }

    /// Get a human-readable summary of the diff.
    pub fn summary(&self) -> String {
        let mut counts: BTreeMap<usize, (&'static str, usize)> = BTreeMap::new();
        for op in &self.up {
            let (rank, label) = summary_label(op);
            counts.entry(rank).or_insert((label, 0)).1 += 1;
        }

        if counts.is_empty() {
            return "No changes".to_string();
        }
        counts
            .values()
            .map(|(label, count)| format!("{} {}", label, count))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn summary_label(op: &SchemaOperation) -> (usize, &'static str) {
    match op {
        SchemaOperation::RenameTable { .. } => (0, "Rename tables:"),
        SchemaOperation::RenameColumn { .. } => (1, "Rename columns:"),
        SchemaOperation::CreateTable { .. } => (2, "Create tables:"),
        SchemaOperation::DropTable { .. } => (3, "Drop tables:"),
        SchemaOperation::AddColumn { .. } => (4, "Add columns:"),
        SchemaOperation::DropColumn { .. } => (5, "Drop columns:"),
        SchemaOperation::AlterColumn { .. } => (6, "Alter columns:"),
        SchemaOperation::CreateIndex { .. } => (7, "Create indexes:"),
        SchemaOperation::DropIndex { .. } => (8, "Drop indexes:"),
        SchemaOperation::AddConstraint { .. } => (9, "Add constraints:"),
        SchemaOperation::DropConstraint { .. } => (10, "Drop constraints:"),
    }
}

/// Computes schema diffs.
///
/// Renames are never guessed: a column missing from one side and present on
/// the other is a drop plus an add unless a rename hint says otherwise.
#[derive(Debug, Clone, Default)]
pub struct Differ {
    table_renames: Vec<(String, String)>,
    column_renames: Vec<(String, String, String)>,
}

impl Differ {
    /// Create a differ without rename hints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat table `from` in the previous model as table `to` in the current one.
    pub fn rename_table(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.table_renames.push((from.into(), to.into()));
        self
    }

    /// Treat column `from` as column `to` of `table`, named as in the current model.
    pub fn rename_column(
        mut self,
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.column_renames
            .push((table.into(), from.into(), to.into()));
        self
    }

    /// Diff two snapshots.
    pub fn diff(&self, previous: &Snapshot, current: &Snapshot) -> MigrateResult<SchemaDiff> {
        let mut up = Vec::new();
        let base = self.apply_renames(previous, current, &mut up)?;

        let dropped: Vec<&Table> = sorted_tables(&base)
            .into_iter()
            .filter(|t| !current.contains_table(t.name()))
            .collect();
        let created: Vec<&Table> = sorted_tables(current)
            .into_iter()
            .filter(|t| !base.contains_table(t.name()))
            .collect();
        let kept: Vec<(&Table, &Table)> = sorted_tables(&base)
            .into_iter()
            .filter_map(|old| current.table(old.name()).map(|new| (old, new)))
            .collect();

        // Constraints that go away or change, foreign keys first.
        let mut drop_constraints = Vec::new();
        for (old, new) in &kept {
            for constraint in sorted_constraints(old) {
                if new.get_constraint(&constraint.name) != Some(constraint) {
                    drop_constraints.push((old.name(), constraint));
                }
            }
        }
        for table in &dropped {
            for constraint in sorted_constraints(table) {
                if constraint.is_foreign_key() {
                    drop_constraints.push((table.name(), constraint));
                }
            }
        }
        drop_constraints.sort_by_key(|(_, c)| !c.is_foreign_key());
        up.extend(
            drop_constraints
                .into_iter()
                .map(|(table, constraint)| SchemaOperation::DropConstraint {
                    table: table.to_string(),
                    constraint: constraint.clone(),
                }),
        );

        for (old, new) in &kept {
            let mut indexes: Vec<_> = old.indexes().collect();
            indexes.sort_by(|a, b| a.name.cmp(&b.name));
            for index in indexes {
                if new.get_index(&index.name) != Some(index) {
                    up.push(SchemaOperation::DropIndex {
                        table: old.name().to_string(),
                        index: index.clone(),
                    });
                }
            }
        }

        for table in &dropped {
            up.push(SchemaOperation::DropTable {
                table: table.without_foreign_keys(),
            });
        }

        for (old, new) in &kept {
            let mut columns: Vec<_> = old.columns().filter(|c| !new.has_column(&c.name)).collect();
            columns.sort_by(|a, b| a.name.cmp(&b.name));
            up.extend(columns.into_iter().map(|column| SchemaOperation::DropColumn {
                table: old.name().to_string(),
                column: column.clone(),
            }));
        }

        for table in &created {
            up.push(SchemaOperation::CreateTable {
                table: table.without_foreign_keys(),
            });
        }

        // Added columns keep their declaration order.
        for (old, new) in &kept {
            up.extend(
                new.columns()
                    .filter(|c| !old.has_column(&c.name))
                    .map(|column| SchemaOperation::AddColumn {
                        table: new.name().to_string(),
                        column: column.clone(),
                    }),
            );
        }

        for (old, new) in &kept {
            let mut altered: Vec<_> = new
                .columns()
                .filter_map(|to| {
                    old.get_column(&to.name)
                        .filter(|from| from.definition_differs(to))
                        .map(|from| (from, to))
                })
                .collect();
            altered.sort_by(|a, b| a.1.name.cmp(&b.1.name));
            up.extend(
                altered
                    .into_iter()
                    .map(|(from, to)| SchemaOperation::AlterColumn {
                        table: new.name().to_string(),
                        from: from.clone(),
                        to: to.clone(),
                    }),
            );
        }

        for (old, new) in &kept {
            let mut indexes: Vec<_> = new.indexes().collect();
            indexes.sort_by(|a, b| a.name.cmp(&b.name));
            for index in indexes {
                if old.get_index(&index.name) != Some(index) {
                    up.push(SchemaOperation::CreateIndex {
                        table: new.name().to_string(),
                        index: index.clone(),
                    });
                }
            }
        }

        // Keys before the foreign keys that may point at them.
        let mut add_constraints = Vec::new();
        for (old, new) in &kept {
            for constraint in sorted_constraints(new) {
                if old.get_constraint(&constraint.name) != Some(constraint) {
                    add_constraints.push((new.name(), constraint));
                }
            }
        }
        for table in &created {
            for constraint in sorted_constraints(table) {
                if constraint.is_foreign_key() {
                    add_constraints.push((table.name(), constraint));
                }
            }
        }
        add_constraints.sort_by_key(|(_, c)| c.is_foreign_key());
        up.extend(
            add_constraints
                .into_iter()
                .map(|(table, constraint)| SchemaOperation::AddConstraint {
                    table: table.to_string(),
                    constraint: constraint.clone(),
                }),
        );

        let diff = SchemaDiff::from_up(up);
        debug!(operations = diff.len(), summary = %diff.summary(), "Computed schema diff");
        Ok(diff)
    }

    fn apply_renames(
        &self,
        previous: &Snapshot,
        current: &Snapshot,
        up: &mut Vec<SchemaOperation>,
    ) -> MigrateResult<Snapshot> {
        let mut base = previous.clone();

        for (from, to) in &self.table_renames {
            if !current.contains_table(to) {
                return Err(rename_hint_error(
                    format!("{} -> {}", from, to),
                    format!("table {} is not in the current model", to),
                ));
            }
            let op = SchemaOperation::RenameTable {
                from: from.clone(),
                to: to.clone(),
            };
            op.apply_to(&mut base).map_err(|e| {
                rename_hint_error(format!("{} -> {}", from, to), e.to_string())
            })?;
            up.push(op);
        }

        for (table, from, to) in &self.column_renames {
            let hint = format!("{}.{} -> {}", table, from, to);
            let target = current
                .table(table)
                .ok_or_else(|| rename_hint_error(&hint, "table is not in the current model"))?;
            if !target.has_column(to) {
                return Err(rename_hint_error(
                    &hint,
                    format!("column {} is not in the current model", to),
                ));
            }
            let op = SchemaOperation::RenameColumn {
                table: table.clone(),
                from: from.clone(),
                to: to.clone(),
            };
            op.apply_to(&mut base)
                .map_err(|e| rename_hint_error(&hint, e.to_string()))?;
            up.push(op);
        }

        Ok(base)
    }
}

fn rename_hint_error(hint: impl AsRef<str>, reason: impl AsRef<str>) -> MigrationError {
    MigrationError::invalid_operation(format!(
        "rename {} cannot be applied: {}",
        hint.as_ref(),
        reason.as_ref()
    ))
}

fn sorted_tables(snapshot: &Snapshot) -> Vec<&Table> {
    let mut tables: Vec<&Table> = snapshot.tables().collect();
    tables.sort_by(|a, b| a.name().cmp(b.name()));
    tables
}

fn sorted_constraints(table: &Table) -> Vec<&Constraint> {
    let mut constraints: Vec<&Constraint> = table.constraints().collect();
    constraints.sort_by(|a, b| a.name.cmp(&b.name));
    constraints
}

/// Diff two snapshots without rename hints.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> MigrateResult<SchemaDiff> {
    Differ::new().diff(previous, current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::apply_operations;
    use pretty_assertions::assert_eq;
    use strata_schema::{Column, ColumnType, Index};

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", ColumnType::Integer))
            .column(Column::new("name", ColumnType::Text))
            .constraint(Constraint::primary_key("users_pkey", ["id"]))
    }

    fn posts() -> Table {
        Table::new("posts")
            .column(Column::new("id", ColumnType::Integer))
            .column(Column::new("author_id", ColumnType::Integer))
            .index(Index::new("idx_posts_author", ["author_id"]))
            .constraint(Constraint::primary_key("posts_pkey", ["id"]))
            .constraint(Constraint::foreign_key(
                "posts_author_fk",
                ["author_id"],
                "users",
                ["id"],
            ))
    }

    fn assert_round_trip(previous: &Snapshot, current: &Snapshot, diff: &SchemaDiff) {
        assert_eq!(&apply_operations(previous, &diff.up).unwrap(), current);
        assert_eq!(&apply_operations(current, &diff.down).unwrap(), previous);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let snapshot = Snapshot::new().with_table(users()).with_table(posts());
        let diff = diff(&snapshot, &snapshot).unwrap();
        assert!(diff.is_empty());
        assert!(diff.down.is_empty());
        assert_eq!(diff.summary(), "No changes");
    }

    #[test]
    fn test_create_tables_with_foreign_key() {
        let previous = Snapshot::new();
        let current = Snapshot::new().with_table(users()).with_table(posts());

        let diff = diff(&previous, &current).unwrap();
        let described: Vec<String> = diff.up.iter().map(|op| op.describe()).collect();
        assert_eq!(
            described,
            vec![
                "create table posts",
                "create table users",
                "add foreign key posts_author_fk on posts",
            ]
        );
        assert_round_trip(&previous, &current, &diff);
    }

    #[test]
    fn test_drop_tables_drops_foreign_keys_first() {
        let previous = Snapshot::new().with_table(users()).with_table(posts());
        let current = Snapshot::new();

        let diff = diff(&previous, &current).unwrap();
        assert!(matches!(
            diff.up[0],
            SchemaOperation::DropConstraint { .. }
        ));
        assert_round_trip(&previous, &current, &diff);
    }

    #[test]
    fn test_column_rename_is_not_inferred() {
        let previous = Snapshot::new().with_table(users());
        let current = Snapshot::new().with_table(
            Table::new("users")
                .column(Column::new("id", ColumnType::Integer))
                .column(Column::new("full_name", ColumnType::Text))
                .constraint(Constraint::primary_key("users_pkey", ["id"])),
        );

        let diff = diff(&previous, &current).unwrap();
        assert_eq!(diff.len(), 2);
        assert!(matches!(diff.up[0], SchemaOperation::DropColumn { .. }));
        assert!(matches!(diff.up[1], SchemaOperation::AddColumn { .. }));
        assert_round_trip(&previous, &current, &diff);
    }

    #[test]
    fn test_column_rename_hint() {
        let previous = Snapshot::new().with_table(users());
        let current = Snapshot::new().with_table(
            Table::new("users")
                .column(Column::new("id", ColumnType::Integer))
                .column(Column::new("full_name", ColumnType::Text))
                .constraint(Constraint::primary_key("users_pkey", ["id"])),
        );

        let diff = Differ::new()
            .rename_column("users", "name", "full_name")
            .diff(&previous, &current)
            .unwrap();
        assert_eq!(
            diff.up,
            vec![SchemaOperation::RenameColumn {
                table: "users".into(),
                from: "name".into(),
                to: "full_name".into(),
            }]
        );
        assert_round_trip(&previous, &current, &diff);
    }

    #[test]
    fn test_table_rename_hint_keeps_references() {
        let previous = Snapshot::new().with_table(users()).with_table(posts());
        let mut accounts = users();
        accounts.set_name("accounts");
        let current = Snapshot::new().with_table(accounts).with_table(
            posts().constraint(Constraint::foreign_key(
                "posts_author_fk",
                ["author_id"],
                "accounts",
                ["id"],
            )),
        );

        let diff = Differ::new()
            .rename_table("users", "accounts")
            .diff(&previous, &current)
            .unwrap();
        assert_eq!(diff.len(), 1);
        assert_round_trip(&previous, &current, &diff);
    }

    #[test]
    fn test_bad_rename_hint() {
        let previous = Snapshot::new().with_table(users());
        let result = Differ::new()
            .rename_column("users", "missing", "name")
            .diff(&previous, &previous);
        assert!(matches!(result, Err(MigrationError::InvalidOperation(_))));
    }

    #[test]
    fn test_alter_and_index_changes() {
        let previous = Snapshot::new().with_table(
            users().index(Index::new("idx_users_name", ["name"])),
        );
        let current = Snapshot::new().with_table(
            users()
                .column(Column::new("name", ColumnType::Varchar(120)).nullable())
                .column(Column::new("email", ColumnType::Text).default_value("''"))
                .index(Index::new("idx_users_name", ["name"]).unique()),
        );

        let diff = diff(&previous, &current).unwrap();
        let described: Vec<String> = diff.up.iter().map(|op| op.describe()).collect();
        assert_eq!(
            described,
            vec![
                "drop index idx_users_name on users",
                "add column users.email (text)",
                "alter column users.name (varchar(120))",
                "create index idx_users_name on users",
            ]
        );
        assert_round_trip(&previous, &current, &diff);
    }

    #[test]
    fn test_drop_column_with_constraint() {
        let previous = Snapshot::new().with_table(
            users()
                .column(Column::new("email", ColumnType::Text))
                .constraint(Constraint::unique("users_email_key", ["email"])),
        );
        let current = Snapshot::new().with_table(users());

        let diff = diff(&previous, &current).unwrap();
        assert!(matches!(diff.up[0], SchemaOperation::DropConstraint { .. }));
        assert!(matches!(diff.up[1], SchemaOperation::DropColumn { .. }));
        assert_round_trip(&previous, &current, &diff);
    }

    #[test]
    fn test_summary() {
        let diff = diff(&Snapshot::new(), &Snapshot::new().with_table(users())).unwrap();
        assert_eq!(diff.summary(), "Create tables: 1");
    }
}

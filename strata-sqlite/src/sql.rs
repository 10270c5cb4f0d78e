//! DDL generation for SQLite.
//!
//! SQLite can add, drop and rename columns in place but cannot change a
//! column definition or the constraint list of an existing table. Those
//! operations are carried out by rebuilding the table: create a copy with the
//! new definition, move the rows over, drop the original and rename the copy.

use strata_migrate::SchemaOperation;
use strata_schema::{Column, ColumnType, Constraint, ConstraintKind, Index, Snapshot, Table};

use crate::error::{SqliteError, SqliteResult};

/// Prefix of the temporary table used while rebuilding.
pub const REBUILD_PREFIX: &str = "_strata_new_";

/// Quote an identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_list(idents: &[String]) -> String {
    idents
        .iter()
        .map(|i| quote(i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// SQLite type name for a logical column type.
pub fn sql_type(column_type: &ColumnType) -> String {
    match column_type {
        ColumnType::Integer => "INTEGER".to_string(),
        ColumnType::BigInt => "BIGINT".to_string(),
        ColumnType::Float => "REAL".to_string(),
        ColumnType::Decimal => "NUMERIC".to_string(),
        ColumnType::Text | ColumnType::Json | ColumnType::Uuid => "TEXT".to_string(),
        ColumnType::Varchar(len) => format!("VARCHAR({})", len),
        ColumnType::Boolean => "BOOLEAN".to_string(),
        ColumnType::DateTime => "DATETIME".to_string(),
        ColumnType::Date => "DATE".to_string(),
        ColumnType::Time => "TIME".to_string(),
        ColumnType::Bytes => "BLOB".to_string(),
        ColumnType::Custom(name) => name.clone(),
    }
}

/// Column definition as used in CREATE TABLE and ADD COLUMN.
pub fn column_definition(column: &Column) -> String {
    let mut def = format!("{} {}", quote(&column.name), sql_type(&column.column_type));
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        def.push_str(&format!(" DEFAULT ({})", default));
    }
    def
}

/// Table constraint clause.
pub fn constraint_definition(constraint: &Constraint) -> String {
    let body = match &constraint.kind {
        ConstraintKind::PrimaryKey { columns } => format!("PRIMARY KEY ({})", quote_list(columns)),
        ConstraintKind::Unique { columns } => format!("UNIQUE ({})", quote_list(columns)),
        ConstraintKind::ForeignKey {
            columns,
            references_table,
            references_columns,
            on_delete,
        } => {
            let mut fk = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_list(columns),
                quote(references_table),
                quote_list(references_columns)
            );
            if let Some(action) = on_delete {
                fk.push_str(&format!(" ON DELETE {}", action.as_sql()));
            }
            fk
        }
        ConstraintKind::Check { expression } => format!("CHECK ({})", expression),
    };
    format!("CONSTRAINT {} {}", quote(&constraint.name), body)
}

fn create_table_as(table: &Table, name: &str) -> String {
    let mut lines: Vec<String> = table.columns().map(column_definition).collect();
    lines.extend(table.constraints().map(constraint_definition));
    format!("CREATE TABLE {} (\n    {}\n)", quote(name), lines.join(",\n    "))
}

/// CREATE TABLE followed by the table's indexes.
pub fn create_table(table: &Table) -> Vec<String> {
    let mut statements = vec![create_table_as(table, table.name())];
    statements.extend(table.indexes().map(|index| create_index(table.name(), index)));
    statements
}

/// DROP TABLE.
pub fn drop_table(name: &str) -> String {
    format!("DROP TABLE {}", quote(name))
}

/// CREATE INDEX.
pub fn create_index(table: &str, index: &Index) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote(&index.name),
        quote(table),
        quote_list(&index.columns)
    )
}

/// DROP INDEX.
pub fn drop_index(index: &Index) -> String {
    format!("DROP INDEX {}", quote(&index.name))
}

/// ALTER TABLE ... ADD COLUMN.
pub fn add_column(table: &str, column: &Column) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote(table),
        column_definition(column)
    )
}

/// ALTER TABLE ... DROP COLUMN.
pub fn drop_column(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} DROP COLUMN {}", quote(table), quote(column))
}

/// ALTER TABLE ... RENAME TO.
pub fn rename_table(from: &str, to: &str) -> String {
    format!("ALTER TABLE {} RENAME TO {}", quote(from), quote(to))
}

/// ALTER TABLE ... RENAME COLUMN.
pub fn rename_column(table: &str, from: &str, to: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote(table),
        quote(from),
        quote(to)
    )
}

/// Statements that turn `before` into `after` by copying the table.
///
/// Rows are carried over for every column present in both definitions.
pub fn rebuild_table(before: &Table, after: &Table) -> Vec<String> {
    let temp = format!("{}{}", REBUILD_PREFIX, after.name());
    let mut statements = vec![create_table_as(after, &temp)];

    let shared: Vec<String> = after
        .column_names()
        .into_iter()
        .filter(|name| before.has_column(name))
        .map(str::to_string)
        .collect();
    if !shared.is_empty() {
        let columns = quote_list(&shared);
        statements.push(format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            quote(&temp),
            columns,
            columns,
            quote(before.name())
        ));
    }

    statements.push(drop_table(before.name()));
    statements.push(rename_table(&temp, after.name()));
    statements.extend(after.indexes().map(|index| create_index(after.name(), index)));
    statements
}

/// Check whether an operation needs a table rebuild.
pub fn needs_rebuild(operation: &SchemaOperation) -> bool {
    match operation {
        SchemaOperation::AlterColumn { .. }
        | SchemaOperation::AddConstraint { .. }
        | SchemaOperation::DropConstraint { .. } => true,
        // ADD COLUMN rejects NOT NULL without a default.
        SchemaOperation::AddColumn { column, .. } => !column.nullable && column.default.is_none(),
        _ => false,
    }
}

/// Statements that execute `operation` against a database shaped like `before`.
pub fn operation_statements(
    operation: &SchemaOperation,
    before: &Snapshot,
) -> SqliteResult<Vec<String>> {
    if needs_rebuild(operation) {
        let name = operation.table_name();
        let current = before.table(name).ok_or_else(|| {
            SqliteError::unsupported(format!(
                "{}: table {} is not part of the known schema",
                operation.describe(),
                name
            ))
        })?;
        let mut after = before.clone();
        operation
            .apply_to(&mut after)
            .map_err(|e| SqliteError::unsupported(e.to_string()))?;
        let target = after.table(name).ok_or_else(|| {
            SqliteError::unsupported(format!("{}: table disappeared", operation.describe()))
        })?;
        return Ok(rebuild_table(current, target));
    }

    let statements = match operation {
        SchemaOperation::CreateTable { table } => create_table(table),
        SchemaOperation::DropTable { table } => vec![drop_table(table.name())],
        SchemaOperation::AddColumn { table, column } => vec![add_column(table, column)],
        SchemaOperation::DropColumn { table, column } => vec![drop_column(table, &column.name)],
        SchemaOperation::CreateIndex { table, index } => vec![create_index(table, index)],
        SchemaOperation::DropIndex { index, .. } => vec![drop_index(index)],
        SchemaOperation::RenameTable { from, to } => vec![rename_table(from, to)],
        SchemaOperation::RenameColumn { table, from, to } => vec![rename_column(table, from, to)],
        SchemaOperation::AlterColumn { .. }
        | SchemaOperation::AddConstraint { .. }
        | SchemaOperation::DropConstraint { .. } => {
            return Err(SqliteError::unsupported(operation.describe()));
        }
    };
    Ok(statements)
}

/// CREATE TABLE for the history table.
pub fn create_history_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    \"migration_id\" TEXT NOT NULL PRIMARY KEY,\n    \"hash\" TEXT NOT NULL,\n    \"applied_at\" TEXT NOT NULL\n)",
        quote(table)
    )
}

/// Name of the single-row lock table that goes with a history table.
pub fn lock_table_name(history_table: &str) -> String {
    format!("{}_lock", history_table)
}

/// CREATE TABLE for the lock table.
pub fn create_lock_table(history_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    \"id\" INTEGER NOT NULL PRIMARY KEY CHECK (\"id\" = 1),\n    \"owner\" TEXT NOT NULL,\n    \"locked_at\" TEXT NOT NULL\n)",
        quote(&lock_table_name(history_table))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strata_schema::ReferentialAction;

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", ColumnType::Integer))
            .column(Column::new("email", ColumnType::Varchar(255)))
            .column(Column::new("bio", ColumnType::Text).nullable())
            .constraint(Constraint::primary_key("pk_users", ["id"]))
            .index(Index::new("idx_users_email", ["email"]).unique())
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("users"), "\"users\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_create_table() {
        let statements = create_table(&users());
        assert_eq!(
            statements[0],
            "CREATE TABLE \"users\" (\n    \"id\" INTEGER NOT NULL,\n    \"email\" VARCHAR(255) NOT NULL,\n    \"bio\" TEXT,\n    CONSTRAINT \"pk_users\" PRIMARY KEY (\"id\")\n)"
        );
        assert_eq!(
            statements[1],
            "CREATE UNIQUE INDEX \"idx_users_email\" ON \"users\" (\"email\")"
        );
    }

    #[test]
    fn test_foreign_key_clause() {
        let fk = Constraint::foreign_key("fk_posts_author", ["author_id"], "users", ["id"])
            .on_delete(ReferentialAction::Cascade);
        assert_eq!(
            constraint_definition(&fk),
            "CONSTRAINT \"fk_posts_author\" FOREIGN KEY (\"author_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE"
        );
    }

    #[test]
    fn test_column_default() {
        let column = Column::new("active", ColumnType::Boolean).default_value("1");
        assert_eq!(column_definition(&column), "\"active\" BOOLEAN NOT NULL DEFAULT (1)");
    }

    #[test]
    fn test_rebuild_copies_shared_columns() {
        let before = users();
        let mut after = users();
        after
            .replace_column(Column::new("bio", ColumnType::Text))
            .unwrap();
        after.remove_column("email");
        after.remove_index("idx_users_email");

        let statements = rebuild_table(&before, &after);
        assert_eq!(statements.len(), 4);
        assert!(statements[0].starts_with("CREATE TABLE \"_strata_new_users\""));
        assert_eq!(
            statements[1],
            "INSERT INTO \"_strata_new_users\" (\"id\", \"bio\") SELECT \"id\", \"bio\" FROM \"users\""
        );
        assert_eq!(statements[2], "DROP TABLE \"users\"");
        assert_eq!(
            statements[3],
            "ALTER TABLE \"_strata_new_users\" RENAME TO \"users\""
        );
    }

    #[test]
    fn test_add_column_strategy() {
        let snapshot = Snapshot::new().with_table(users());

        let nullable = SchemaOperation::AddColumn {
            table: "users".to_string(),
            column: Column::new("nickname", ColumnType::Text).nullable(),
        };
        assert_eq!(
            operation_statements(&nullable, &snapshot).unwrap(),
            vec!["ALTER TABLE \"users\" ADD COLUMN \"nickname\" TEXT".to_string()]
        );

        let required = SchemaOperation::AddColumn {
            table: "users".to_string(),
            column: Column::new("nickname", ColumnType::Text),
        };
        let statements = operation_statements(&required, &snapshot).unwrap();
        assert!(statements[0].contains("\"nickname\" TEXT NOT NULL"));
        assert_eq!(
            statements.last().unwrap(),
            "CREATE UNIQUE INDEX \"idx_users_email\" ON \"users\" (\"email\")"
        );
    }

    #[test]
    fn test_rebuild_requires_known_table() {
        let op = SchemaOperation::DropConstraint {
            table: "ghosts".to_string(),
            constraint: Constraint::check("chk", "1"),
        };
        let err = operation_statements(&op, &Snapshot::new()).unwrap_err();
        assert!(err.to_string().contains("ghosts"));
    }

    #[test]
    fn test_history_and_lock_tables() {
        assert!(create_history_table("_strata_migrations").contains("\"migration_id\" TEXT NOT NULL PRIMARY KEY"));
        assert_eq!(lock_table_name("_strata_migrations"), "_strata_migrations_lock");
        assert!(create_lock_table("_strata_migrations").contains("CHECK (\"id\" = 1)"));
    }
}

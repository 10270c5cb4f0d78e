//! Model snapshots: the structural description of a schema at a point in time.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::column::Column;
use crate::constraint::{Constraint, ConstraintKind, Index};
use crate::error::{SchemaError, SchemaResult};

/// A table definition.
///
/// Columns keep their declaration order. Equality is structural: two tables
/// are equal when they hold the same columns, indexes and constraints,
/// whatever order those were inserted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TableDocument", into = "TableDocument")]
pub struct Table {
    name: String,
    columns: IndexMap<String, Column>,
    indexes: IndexMap<String, Index>,
    constraints: IndexMap<String, Constraint>,
}

impl Table {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            indexes: IndexMap::new(),
            constraints: IndexMap::new(),
        }
    }

    /// Builder: add or replace a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.insert(column.name.clone(), column);
        self
    }

    /// Builder: add or replace an index.
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.insert(index.name.clone(), index);
        self
    }

    /// Builder: add or replace a constraint.
    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.insert(constraint.name.clone(), constraint);
        self
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the table in place. References held by other tables are not touched.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Check whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Append a column. Fails if the name is taken.
    pub fn add_column(&mut self, column: Column) -> SchemaResult<()> {
        if self.columns.contains_key(&column.name) {
            return Err(SchemaError::duplicate(
                "column",
                format!("{}.{}", self.name, column.name),
            ));
        }
        self.columns.insert(column.name.clone(), column);
        Ok(())
    }

    /// Remove a column, keeping the order of the others.
    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        self.columns.shift_remove(name)
    }

    /// Replace the definition of an existing column, keeping its position.
    pub fn replace_column(&mut self, column: Column) -> SchemaResult<Column> {
        match self.columns.get_mut(&column.name) {
            Some(slot) => Ok(std::mem::replace(slot, column)),
            None => Err(SchemaError::unknown_column(&self.name, &column.name)),
        }
    }

    /// Rename a column in place and rewrite index and constraint references.
    pub fn rename_column(&mut self, from: &str, to: &str) -> SchemaResult<()> {
        if !self.columns.contains_key(from) {
            return Err(SchemaError::unknown_column(&self.name, from));
        }
        if self.columns.contains_key(to) {
            return Err(SchemaError::duplicate("column", format!("{}.{}", self.name, to)));
        }

        self.columns = std::mem::take(&mut self.columns)
            .into_iter()
            .map(|(key, column)| {
                if key == from {
                    (to.to_string(), column.renamed(to))
                } else {
                    (key, column)
                }
            })
            .collect();

        let rename = |cols: &mut Vec<String>| {
            for col in cols.iter_mut().filter(|c| c.as_str() == from) {
                *col = to.to_string();
            }
        };
        for index in self.indexes.values_mut() {
            rename(&mut index.columns);
        }
        for constraint in self.constraints.values_mut() {
            if let Some(cols) = constraint.columns_mut() {
                rename(cols);
            }
        }
        Ok(())
    }

    /// Indexes on this table.
    pub fn indexes(&self) -> impl Iterator<Item = &Index> {
        self.indexes.values()
    }

    /// Get an index by name.
    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes.get(name)
    }

    /// Add an index. Fails if the name is taken.
    pub fn add_index(&mut self, index: Index) -> SchemaResult<()> {
        if self.indexes.contains_key(&index.name) {
            return Err(SchemaError::duplicate(
                "index",
                format!("{}.{}", self.name, index.name),
            ));
        }
        self.indexes.insert(index.name.clone(), index);
        Ok(())
    }

    /// Remove an index.
    pub fn remove_index(&mut self, name: &str) -> Option<Index> {
        self.indexes.shift_remove(name)
    }

    /// Constraints on this table.
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.values()
    }

    /// Get a constraint by name.
    pub fn get_constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.get(name)
    }

    /// Add a constraint. Fails if the name is taken.
    pub fn add_constraint(&mut self, constraint: Constraint) -> SchemaResult<()> {
        if self.constraints.contains_key(&constraint.name) {
            return Err(SchemaError::duplicate(
                "constraint",
                format!("{}.{}", self.name, constraint.name),
            ));
        }
        self.constraints.insert(constraint.name.clone(), constraint);
        Ok(())
    }

    /// Remove a constraint.
    pub fn remove_constraint(&mut self, name: &str) -> Option<Constraint> {
        self.constraints.shift_remove(name)
    }

    /// The primary key, if any.
    pub fn primary_key(&self) -> Option<&Constraint> {
        self.constraints.values().find(|c| c.is_primary_key())
    }

    /// Foreign keys declared on this table.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.values().filter(|c| c.is_foreign_key())
    }

    /// Copy of this table without its foreign keys.
    pub fn without_foreign_keys(&self) -> Table {
        let mut table = self.clone();
        table.constraints.retain(|_, c| !c.is_foreign_key());
        table
    }

    /// Check whether any index or constraint covers the column.
    pub fn is_column_referenced(&self, column: &str) -> bool {
        self.indexes
            .values()
            .any(|i| i.columns.iter().any(|c| c == column))
            || self
                .constraints
                .values()
                .any(|c| c.columns().iter().any(|col| col == column))
    }

    fn rewrite_references_to_table(&mut self, from: &str, to: &str) {
        for constraint in self.constraints.values_mut() {
            if let ConstraintKind::ForeignKey {
                references_table, ..
            } = &mut constraint.kind
            {
                if references_table == from {
                    *references_table = to.to_string();
                }
            }
        }
    }

    fn rewrite_references_to_column(&mut self, table: &str, from: &str, to: &str) {
        for constraint in self.constraints.values_mut() {
            if let ConstraintKind::ForeignKey {
                references_table,
                references_columns,
                ..
            } = &mut constraint.kind
            {
                if references_table == table {
                    for col in references_columns.iter_mut().filter(|c| c.as_str() == from) {
                        *col = to.to_string();
                    }
                }
            }
        }
    }
}

/// A complete model snapshot: table name to table definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotDocument", into = "SnapshotDocument")]
pub struct Snapshot {
    tables: IndexMap<String, Table>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add or replace a table.
    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Check if the snapshot has no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Tables in insertion order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Table names, sorted.
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Get a mutable table by name.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Get a mutable table or fail with `UnknownTable`.
    pub fn require_table_mut(&mut self, name: &str) -> SchemaResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| SchemaError::unknown_table(name))
    }

    /// Check whether a table exists.
    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Add a table. Fails if the name is taken.
    pub fn add_table(&mut self, table: Table) -> SchemaResult<()> {
        if self.tables.contains_key(&table.name) {
            return Err(SchemaError::duplicate("table", &table.name));
        }
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    /// Remove a table.
    pub fn remove_table(&mut self, name: &str) -> Option<Table> {
        self.tables.shift_remove(name)
    }

    /// Rename a table and rewrite foreign keys that reference it.
    pub fn rename_table(&mut self, from: &str, to: &str) -> SchemaResult<()> {
        if self.tables.contains_key(to) {
            return Err(SchemaError::duplicate("table", to));
        }
        let mut table = self
            .tables
            .shift_remove(from)
            .ok_or_else(|| SchemaError::unknown_table(from))?;
        table.set_name(to);
        table.rewrite_references_to_table(from, to);
        self.tables.insert(to.to_string(), table);

        for other in self.tables.values_mut() {
            other.rewrite_references_to_table(from, to);
        }
        Ok(())
    }

    /// Rename a column and rewrite every reference to it, including foreign
    /// keys declared on other tables.
    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> SchemaResult<()> {
        self.require_table_mut(table)?.rename_column(from, to)?;
        for other in self.tables.values_mut() {
            other.rewrite_references_to_column(table, from, to);
        }
        Ok(())
    }

    /// Foreign keys (owning table, constraint) pointing at `table`.
    pub fn references_to(&self, table: &str) -> Vec<(&str, &Constraint)> {
        self.tables
            .values()
            .flat_map(|t| t.foreign_keys().map(move |fk| (t.name(), fk)))
            .filter(|(_, fk)| fk.references_table() == Some(table))
            .collect()
    }
}

/// Serialized form of a table. Indexes and constraints are sorted by name so
/// the encoding is canonical.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableDocument {
    name: String,
    #[serde(default)]
    columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    indexes: Vec<Index>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    constraints: Vec<Constraint>,
}

impl TryFrom<TableDocument> for Table {
    type Error = SchemaError;

    fn try_from(doc: TableDocument) -> Result<Self, Self::Error> {
        let mut table = Table::new(doc.name);
        for column in doc.columns {
            table.add_column(column)?;
        }
        for index in doc.indexes {
            table.add_index(index)?;
        }
        for constraint in doc.constraints {
            table.add_constraint(constraint)?;
        }
        Ok(table)
    }
}

impl From<Table> for TableDocument {
    fn from(table: Table) -> Self {
        let mut indexes: Vec<Index> = table.indexes.into_values().collect();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        let mut constraints: Vec<Constraint> = table.constraints.into_values().collect();
        constraints.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            name: table.name,
            columns: table.columns.into_values().collect(),
            indexes,
            constraints,
        }
    }
}

/// Serialized form of a snapshot, tables sorted by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotDocument {
    #[serde(default)]
    tables: Vec<Table>,
}

impl TryFrom<SnapshotDocument> for Snapshot {
    type Error = SchemaError;

    fn try_from(doc: SnapshotDocument) -> Result<Self, Self::Error> {
        let mut snapshot = Snapshot::new();
        for table in doc.tables {
            snapshot.add_table(table)?;
        }
        Ok(snapshot)
    }
}

impl From<Snapshot> for SnapshotDocument {
    fn from(snapshot: Snapshot) -> Self {
        let mut tables: Vec<Table> = snapshot.tables.into_values().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Self { tables }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;
    use pretty_assertions::assert_eq;

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", ColumnType::Integer))
            .column(Column::new("name", ColumnType::Text))
            .constraint(Constraint::primary_key("users_pkey", ["id"]))
            .index(Index::new("idx_users_name", ["name"]))
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let a = Snapshot::new()
            .with_table(users())
            .with_table(Table::new("posts").column(Column::new("id", ColumnType::Integer)));
        let b = Snapshot::new()
            .with_table(Table::new("posts").column(Column::new("id", ColumnType::Integer)))
            .with_table(users());

        assert_eq!(a, b);
    }

    #[test]
    fn test_column_order_is_preserved() {
        let table = users();
        let names: Vec<&str> = table.column_names().collect();
        assert_eq!(names, vec!["id", "name"]);
    }

    #[test]
    fn test_add_duplicate_column_fails() {
        let mut table = users();
        let err = table
            .add_column(Column::new("id", ColumnType::BigInt))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Duplicate { .. }));
    }

    #[test]
    fn test_rename_column_rewrites_references() {
        let mut snapshot = Snapshot::new().with_table(users()).with_table(
            Table::new("posts")
                .column(Column::new("author", ColumnType::Integer))
                .constraint(Constraint::foreign_key(
                    "posts_author_fk",
                    ["author"],
                    "users",
                    ["id"],
                )),
        );

        snapshot.rename_column("users", "id", "user_id").unwrap();

        let users = snapshot.table("users").unwrap();
        let names: Vec<&str> = users.column_names().collect();
        assert_eq!(names, vec!["user_id", "name"]);
        assert_eq!(users.primary_key().unwrap().columns(), ["user_id".to_string()]);

        let fk = snapshot
            .table("posts")
            .unwrap()
            .get_constraint("posts_author_fk")
            .unwrap();
        match &fk.kind {
            ConstraintKind::ForeignKey {
                references_columns, ..
            } => assert_eq!(references_columns, &vec!["user_id".to_string()]),
            _ => panic!("Expected ForeignKey"),
        }
    }

    #[test]
    fn test_rename_table_rewrites_foreign_keys() {
        let mut snapshot = Snapshot::new().with_table(users()).with_table(
            Table::new("posts")
                .column(Column::new("author", ColumnType::Integer))
                .constraint(Constraint::foreign_key("fk", ["author"], "users", ["id"])),
        );

        snapshot.rename_table("users", "accounts").unwrap();

        assert!(!snapshot.contains_table("users"));
        assert_eq!(snapshot.table("accounts").unwrap().name(), "accounts");
        assert_eq!(snapshot.references_to("accounts").len(), 1);
    }

    #[test]
    fn test_serialization_is_canonical() {
        let a = Snapshot::new()
            .with_table(Table::new("b").column(Column::new("x", ColumnType::Text)))
            .with_table(Table::new("a").column(Column::new("y", ColumnType::Text)));
        let b = Snapshot::new()
            .with_table(Table::new("a").column(Column::new("y", ColumnType::Text)))
            .with_table(Table::new("b").column(Column::new("x", ColumnType::Text)));

        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_deserialize_rejects_duplicate_tables() {
        let json = r#"{"tables":[{"name":"t","columns":[]},{"name":"t","columns":[]}]}"#;
        let result: Result<Snapshot, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_without_foreign_keys() {
        let table = Table::new("posts")
            .column(Column::new("author", ColumnType::Integer))
            .constraint(Constraint::foreign_key("fk", ["author"], "users", ["id"]))
            .constraint(Constraint::unique("uq", ["author"]));

        let stripped = table.without_foreign_keys();
        assert!(stripped.get_constraint("fk").is_none());
        assert!(stripped.get_constraint("uq").is_some());
    }
}

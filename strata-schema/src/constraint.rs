//! Index and constraint definitions.

use serde::{Deserialize, Serialize};

/// A secondary index on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name (unique within the table).
    pub name: String,
    /// Indexed columns, in key order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    /// Create a non-unique index.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Referential action for foreign keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    /// Delete/update dependent rows.
    Cascade,
    /// Refuse the change.
    Restrict,
    /// Set referencing columns to NULL.
    SetNull,
    /// Set referencing columns to their default.
    SetDefault,
    /// Deferred check.
    NoAction,
}

impl ReferentialAction {
    /// SQL keyword for this action.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Restrict => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::NoAction => "NO ACTION",
        }
    }
}

/// What a constraint enforces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Primary key over one or more columns.
    PrimaryKey { columns: Vec<String> },
    /// Unique constraint over one or more columns.
    Unique { columns: Vec<String> },
    /// Foreign key to another table.
    ForeignKey {
        columns: Vec<String>,
        references_table: String,
        references_columns: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_delete: Option<ReferentialAction>,
    },
    /// Check expression.
    Check { expression: String },
}

/// A named table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Constraint name (unique within the table).
    pub name: String,
    /// Constraint body.
    #[serde(flatten)]
    pub kind: ConstraintKind,
}

impl Constraint {
    /// Create a primary key constraint.
    pub fn primary_key<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: ConstraintKind::PrimaryKey {
                columns: columns.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Create a unique constraint.
    pub fn unique<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: ConstraintKind::Unique {
                columns: columns.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Create a foreign key constraint.
    pub fn foreign_key<I, S, J, T>(
        name: impl Into<String>,
        columns: I,
        references_table: impl Into<String>,
        references_columns: J,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            kind: ConstraintKind::ForeignKey {
                columns: columns.into_iter().map(Into::into).collect(),
                references_table: references_table.into(),
                references_columns: references_columns.into_iter().map(Into::into).collect(),
                on_delete: None,
            },
        }
    }

    /// Create a check constraint.
    pub fn check(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Check {
                expression: expression.into(),
            },
        }
    }

    /// Set the ON DELETE action. No effect on non foreign keys.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        if let ConstraintKind::ForeignKey { on_delete, .. } = &mut self.kind {
            *on_delete = Some(action);
        }
        self
    }

    /// Columns of the owning table covered by this constraint.
    pub fn columns(&self) -> &[String] {
        match &self.kind {
            ConstraintKind::PrimaryKey { columns }
            | ConstraintKind::Unique { columns }
            | ConstraintKind::ForeignKey { columns, .. } => columns,
            ConstraintKind::Check { .. } => &[],
        }
    }

    /// Mutable access to the owning table's columns.
    pub fn columns_mut(&mut self) -> Option<&mut Vec<String>> {
        match &mut self.kind {
            ConstraintKind::PrimaryKey { columns }
            | ConstraintKind::Unique { columns }
            | ConstraintKind::ForeignKey { columns, .. } => Some(columns),
            ConstraintKind::Check { .. } => None,
        }
    }

    /// Check if this is a foreign key.
    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, ConstraintKind::ForeignKey { .. })
    }

    /// Check if this is a primary key.
    pub fn is_primary_key(&self) -> bool {
        matches!(self.kind, ConstraintKind::PrimaryKey { .. })
    }

    /// Table referenced by a foreign key.
    pub fn references_table(&self) -> Option<&str> {
        match &self.kind {
            ConstraintKind::ForeignKey {
                references_table, ..
            } => Some(references_table),
            _ => None,
        }
    }

    /// Short label for messages.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ConstraintKind::PrimaryKey { .. } => "primary key",
            ConstraintKind::Unique { .. } => "unique constraint",
            ConstraintKind::ForeignKey { .. } => "foreign key",
            ConstraintKind::Check { .. } => "check constraint",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_columns() {
        let pk = Constraint::primary_key("users_pkey", ["id"]);
        assert_eq!(pk.columns(), ["id".to_string()]);
        assert!(pk.is_primary_key());

        let check = Constraint::check("age_positive", "age > 0");
        assert!(check.columns().is_empty());
    }

    #[test]
    fn test_foreign_key_on_delete() {
        let fk = Constraint::foreign_key("posts_author_fk", ["author_id"], "users", ["id"])
            .on_delete(ReferentialAction::Cascade);

        assert!(fk.is_foreign_key());
        assert_eq!(fk.references_table(), Some("users"));
        match fk.kind {
            ConstraintKind::ForeignKey { on_delete, .. } => {
                assert_eq!(on_delete, Some(ReferentialAction::Cascade))
            }
            _ => panic!("Expected ForeignKey"),
        }
    }

    #[test]
    fn test_constraint_serde_is_flat() {
        let json = serde_json::to_value(Constraint::unique("users_email_key", ["email"])).unwrap();
        assert_eq!(json["name"], "users_email_key");
        assert_eq!(json["kind"], "unique");
        assert_eq!(json["columns"][0], "email");

        let back: Constraint = serde_json::from_value(json).unwrap();
        assert_eq!(back, Constraint::unique("users_email_key", ["email"]));
    }

    #[test]
    fn test_index_builder() {
        let index = Index::new("idx_users_email", ["email"]).unique();
        assert!(index.unique);
        assert_eq!(index.columns, vec!["email".to_string()]);
    }
}

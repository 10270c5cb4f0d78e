//! Column definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical column types understood by the engine.
///
/// Connectors map these onto their dialect; `Custom` is passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Double precision floating point.
    Float,
    /// Arbitrary precision decimal.
    Decimal,
    /// Unbounded text.
    Text,
    /// Bounded text with a maximum length.
    Varchar(u32),
    /// Boolean.
    Boolean,
    /// Timestamp with time zone.
    DateTime,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// JSON document.
    Json,
    /// Binary data.
    Bytes,
    /// UUID.
    Uuid,
    /// A dialect specific type name.
    Custom(String),
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::BigInt => write!(f, "big_int"),
            Self::Float => write!(f, "float"),
            Self::Decimal => write!(f, "decimal"),
            Self::Text => write!(f, "text"),
            Self::Varchar(len) => write!(f, "varchar({})", len),
            Self::Boolean => write!(f, "boolean"),
            Self::DateTime => write!(f, "date_time"),
            Self::Date => write!(f, "date"),
            Self::Time => write!(f, "time"),
            Self::Json => write!(f, "json"),
            Self::Bytes => write!(f, "bytes"),
            Self::Uuid => write!(f, "uuid"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// A column in a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Logical type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether the column accepts NULL.
    #[serde(default)]
    pub nullable: bool,
    /// Default value as a SQL expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl Column {
    /// Create a new non-nullable column without a default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            default: None,
        }
    }

    /// Mark the column as nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the default expression.
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Same definition under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Check whether two columns differ in anything but their name.
    pub fn definition_differs(&self, other: &Column) -> bool {
        self.column_type != other.column_type
            || self.nullable != other.nullable
            || self.default != other.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_builder() {
        let column = Column::new("email", ColumnType::Varchar(255))
            .nullable()
            .default_value("''");

        assert_eq!(column.name, "email");
        assert_eq!(column.column_type, ColumnType::Varchar(255));
        assert!(column.nullable);
        assert_eq!(column.default.as_deref(), Some("''"));
    }

    #[test]
    fn test_definition_differs_ignores_name() {
        let a = Column::new("a", ColumnType::Text);
        let b = a.renamed("b");
        assert!(!a.definition_differs(&b));
        assert!(a.definition_differs(&b.clone().nullable()));
    }

    #[test]
    fn test_column_type_serde_names() {
        let json = serde_json::to_string(&ColumnType::BigInt).unwrap();
        assert_eq!(json, "\"big_int\"");

        let json = serde_json::to_string(&ColumnType::Varchar(64)).unwrap();
        assert_eq!(json, "{\"varchar\":64}");

        let parsed: ColumnType = serde_json::from_str("\"date_time\"").unwrap();
        assert_eq!(parsed, ColumnType::DateTime);
    }

    #[test]
    fn test_column_type_display() {
        assert_eq!(ColumnType::Varchar(10).to_string(), "varchar(10)");
        assert_eq!(ColumnType::Custom("citext".into()).to_string(), "citext");
    }
}

//! # strata-schema
//!
//! Model snapshots for the strata migration engine.
//!
//! A [`Snapshot`] is a structural description of a database schema: tables,
//! their columns, indexes and constraints. Snapshots are compared by value,
//! serialized canonically, and validated before they are used to scaffold a
//! migration.
//!
//! ## Example
//!
//! ```rust
//! use strata_schema::{parse_model, ModelProvider};
//!
//! let model = parse_model(r#"
//! [[tables]]
//! name = "users"
//!
//! [[tables.columns]]
//! name = "id"
//! type = "integer"
//! "#).unwrap();
//!
//! model.validate().unwrap();
//! assert!(model.current_model().unwrap().contains_table("users"));
//! ```

pub mod column;
pub mod constraint;
pub mod error;
pub mod provider;
pub mod snapshot;
pub mod validator;

pub use column::{Column, ColumnType};
pub use constraint::{Constraint, ConstraintKind, Index, ReferentialAction};
pub use error::{SchemaError, SchemaResult};
pub use provider::{FileModelProvider, ModelProvider, load_model_file, parse_model};
pub use snapshot::{Snapshot, Table};
pub use validator::Validator;

//! # Strata
//!
//! A schema migration engine for Rust.
//!
//! Strata keeps a relational schema in step with an application's model:
//!
//! - **Model snapshots**: structural, value-typed descriptions of tables,
//!   columns, indexes and constraints
//! - **Diffing**: ordered, reversible schema operations between two snapshots
//! - **Artifacts**: immutable, hash-protected migrations with sortable ids
//! - **History**: the set of applied migrations, stored in the target database
//! - **Applier**: transactional, resumable moves to `latest`, `none` or any id
//!
//! ## Quick Start
//!
//! ```rust
//! use strata::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let model = parse_model(r#"
//! [[tables]]
//! name = "users"
//!
//! [[tables.columns]]
//! name = "id"
//! type = "integer"
//! "#).unwrap();
//!
//! let repository = MemoryRepository::new();
//! Scaffolder::new(&repository, &model).scaffold("init").await.unwrap();
//!
//! let database = MemoryConnector::new();
//! let applier = Applier::new(&repository, &database, MigrationConfig::new());
//! applier.apply(&Target::Latest).await.unwrap();
//! assert!(database.schema().contains_table("users"));
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` (default): the SQLite connector, re-exported as [`sqlite`]

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Model snapshots, parsing and validation.
pub mod schema {
    pub use strata_schema::*;
}

/// The migration engine: differ, artifacts, history and applier.
pub mod migrate {
    pub use strata_migrate::*;
}

/// SQLite connector.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use strata_sqlite::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        Applier, ArtifactRepository, Connector, FileRepository, MemoryConnector,
        MemoryRepository, MigrationConfig, MigrationError, Scaffolder, SchemaOperation, Target,
    };
    pub use crate::schema::{
        Column, ColumnType, Constraint, FileModelProvider, Index, ModelProvider, Snapshot, Table,
        parse_model,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::{SqliteConfig, SqliteConnector};
}

// Re-export key types at the crate root
pub use migrate::{Applier, MigrationError, Scaffolder, Target};
pub use schema::{SchemaError, Snapshot};

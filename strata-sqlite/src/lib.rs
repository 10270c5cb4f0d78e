//! SQLite connector for the strata migration engine.
//!
//! Uses `tokio-rusqlite` to run schema operations and history bookkeeping on
//! a dedicated connection thread. Every migration runs inside one SQLite
//! transaction; DDL in SQLite is transactional, so a failure rolls back the
//! schema change together with its history row.
//!
//! # Example
//!
//! ```rust
//! use strata_migrate::{Applier, MemoryRepository, MigrationConfig, Scaffolder, Target};
//! use strata_schema::{Column, ColumnType, Snapshot, Table};
//! use strata_sqlite::SqliteConnector;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = Snapshot::new().with_table(
//!     Table::new("users").column(Column::new("id", ColumnType::Integer)),
//! );
//! let repository = MemoryRepository::new();
//! Scaffolder::new(&repository, &model).scaffold("init").await?;
//!
//! let connector = SqliteConnector::from_url("sqlite::memory:").await?;
//! Applier::new(&repository, &connector, MigrationConfig::new())
//!     .apply(&Target::Latest)
//!     .await?;
//! assert!(connector.table_names().await?.contains(&"users".to_string()));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod sql;

pub use config::{DatabasePath, JournalMode, SqliteConfig, SynchronousMode};
pub use connector::SqliteConnector;
pub use error::{SqliteError, SqliteResult};

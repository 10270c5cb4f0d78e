//! # strata-migrate
//!
//! The strata migration engine.
//!
//! This crate provides functionality for:
//! - Diffing two model snapshots into ordered schema operations
//! - Immutable, hash-protected migration artifacts with sortable ids
//! - Artifact storage on the filesystem or in memory
//! - Migration history kept inside the target database
//! - Transactional, resumable application and reversal of migrations
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────────────┐
//! │ Model        │────▶│ Differ         │────▶│ Migration Artifact  │
//! │ Provider     │     └────────────────┘     └─────────────────────┘
//! └──────────────┘        (Scaffolder)                   │
//!                                                        ▼
//!                                              ┌─────────────────────┐
//!                                              │ Artifact Repository │
//!                                              └─────────────────────┘
//!                                                        │
//!                                                        ▼
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────────────┐
//! │ History Tbl  │◀────│ Applier        │────▶│ Connector           │
//! └──────────────┘     └────────────────┘     └─────────────────────┘
//! ```
//!
//! The scaffolder never touches a database; the applier never diffs models,
//! it only replays stored operation lists.
//!
//! ## Example
//!
//! ```rust
//! use strata_migrate::{
//!     Applier, MemoryConnector, MemoryRepository, MigrationConfig, Scaffolder, Target,
//! };
//! use strata_schema::{Column, ColumnType, Snapshot, Table};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let model = Snapshot::new().with_table(
//!     Table::new("users")
//!         .column(Column::new("id", ColumnType::Integer))
//!         .column(Column::new("name", ColumnType::Text)),
//! );
//!
//! let repository = MemoryRepository::new();
//! Scaffolder::new(&repository, &model).scaffold("init").await.unwrap();
//!
//! let database = MemoryConnector::new();
//! let applier = Applier::new(&repository, &database, MigrationConfig::new());
//! applier.apply(&Target::Latest).await.unwrap();
//! assert!(database.schema().contains_table("users"));
//!
//! applier.apply(&Target::None).await.unwrap();
//! assert!(database.schema().is_empty());
//! # }
//! ```
//!
//! ## Artifacts on disk
//!
//! ```text
//! migrations/
//! ├── 20240115120000000_init/
//! │   └── migration.json
//! └── 20240116090000000_add_posts/
//!     └── migration.json
//! ```

pub mod apply;
pub mod artifact;
pub mod config;
pub mod connector;
pub mod diff;
pub mod error;
pub mod history;
pub mod memory;
pub mod operation;
pub mod repository;
pub mod scaffold;
pub mod status;

pub use apply::{AppliedMigrations, Applier, CancellationFlag, Direction, MigrationPlan, Target};
pub use artifact::{MigrationArtifact, MigrationId};
pub use config::MigrationConfig;
pub use connector::{Connector, ConnectorError, ConnectorResult, ExecutionContext, Transaction};
pub use diff::{Differ, SchemaDiff, diff};
pub use error::{MigrateResult, MigrationError};
pub use history::{DEFAULT_HISTORY_TABLE, HistoryRecord, HistoryStore};
pub use memory::MemoryConnector;
pub use operation::{SchemaOperation, apply_operations, invert_all};
pub use repository::{ArtifactRepository, FileRepository, MemoryRepository};
pub use scaffold::{Clock, FixedClock, Scaffolder, SystemClock};
pub use status::{Drift, MigrationEntry, MigrationStatus};

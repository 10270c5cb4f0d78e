//! The database connector boundary.
//!
//! The engine never builds SQL itself. A [`Connector`] turns each
//! [`SchemaOperation`] into whatever its dialect needs, and provides the
//! primitives the history store and the applier are built on: transactions,
//! the history table and an exclusive migration lock.

use strata_schema::Snapshot;
use thiserror::Error;
use tracing::{debug, warn};

use crate::history::HistoryRecord;
use crate::operation::SchemaOperation;

/// Result type for connector calls.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// An error reported by a database connector.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConnectorError {
    /// Human readable description.
    pub message: String,
    /// Underlying driver error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConnectorError {
    /// Create an error without an underlying cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping a driver error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Schema state handed to the connector alongside an operation.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    /// Modelled schema right before the operation runs.
    pub before: &'a Snapshot,
}

impl<'a> ExecutionContext<'a> {
    /// Create a context for the given preceding state.
    pub fn new(before: &'a Snapshot) -> Self {
        Self { before }
    }
}

/// A live database the engine can migrate.
///
/// Calls between `begin` and `commit`/`rollback` belong to one transaction,
/// including history writes.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Start a transaction.
    async fn begin(&self) -> ConnectorResult<()>;

    /// Execute one schema operation.
    async fn execute(
        &self,
        operation: &SchemaOperation,
        context: &ExecutionContext<'_>,
    ) -> ConnectorResult<()>;

    /// Commit the current transaction.
    async fn commit(&self) -> ConnectorResult<()>;

    /// Roll back the current transaction.
    async fn rollback(&self) -> ConnectorResult<()>;

    /// Check whether the history table exists.
    async fn history_table_exists(&self, table: &str) -> ConnectorResult<bool>;

    /// Create the history table.
    async fn create_history_table(&self, table: &str) -> ConnectorResult<()>;

    /// Read every history record.
    async fn read_history(&self, table: &str) -> ConnectorResult<Vec<HistoryRecord>>;

    /// Insert a history record.
    async fn insert_history(&self, table: &str, record: &HistoryRecord) -> ConnectorResult<()>;

    /// Delete the history record of a migration.
    async fn delete_history(&self, table: &str, migration_id: &str) -> ConnectorResult<()>;

    /// Try to take the migration lock. Returns `false` if it is already held.
    async fn try_lock(&self, table: &str, owner: &str) -> ConnectorResult<bool>;

    /// Release the migration lock.
    async fn unlock(&self, table: &str) -> ConnectorResult<()>;

    /// Clear the migration lock whoever holds it.
    async fn force_unlock(&self, table: &str) -> ConnectorResult<()>;
}

/// An open transaction on a connector.
///
/// History writes take a `&mut Transaction`, so they cannot happen outside
/// of the transaction carrying the schema change they describe.
pub struct Transaction<'c, C: Connector + ?Sized> {
    connector: &'c C,
    open: bool,
}

impl<'c, C: Connector + ?Sized> Transaction<'c, C> {
    /// Begin a transaction.
    pub async fn begin(connector: &'c C) -> ConnectorResult<Self> {
        connector.begin().await?;
        debug!("Transaction started");
        Ok(Self {
            connector,
            open: true,
        })
    }

    /// Execute an operation inside the transaction.
    pub async fn execute(
        &mut self,
        operation: &SchemaOperation,
        context: &ExecutionContext<'_>,
    ) -> ConnectorResult<()> {
        self.connector.execute(operation, context).await
    }

    pub(crate) fn connector(&self) -> &'c C {
        self.connector
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> ConnectorResult<()> {
        self.open = false;
        self.connector.commit().await?;
        debug!("Transaction committed");
        Ok(())
    }

    /// Roll the transaction back.
    pub async fn rollback(mut self) -> ConnectorResult<()> {
        self.open = false;
        self.connector.rollback().await?;
        debug!("Transaction rolled back");
        Ok(())
    }

    /// Check whether the transaction is still open.
    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl<C: Connector + ?Sized> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        if self.open {
            warn!("Transaction dropped without commit or rollback");
        }
    }
}

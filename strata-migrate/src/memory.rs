//! An in-memory connector.
//!
//! The "database" is a [`Snapshot`] plus history tables and a lock table.
//! Transactions copy the state on `begin` and swap it in on `commit`. Clones
//! share the same database, which makes it possible to simulate two
//! processes racing for the migration lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use strata_schema::Snapshot;
use tracing::trace;

use crate::connector::{Connector, ConnectorError, ConnectorResult, ExecutionContext};
use crate::history::HistoryRecord;
use crate::operation::SchemaOperation;

type FailurePredicate = Arc<dyn Fn(&SchemaOperation) -> bool + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct DatabaseState {
    schema: Snapshot,
    history: BTreeMap<String, Vec<HistoryRecord>>,
}

#[derive(Debug, Default)]
struct Storage {
    committed: DatabaseState,
    pending: Option<DatabaseState>,
}

impl Storage {
    fn current(&self) -> &DatabaseState {
        self.pending.as_ref().unwrap_or(&self.committed)
    }

    fn current_mut(&mut self) -> &mut DatabaseState {
        self.pending.as_mut().unwrap_or(&mut self.committed)
    }
}

#[derive(Default)]
struct Inner {
    storage: Mutex<Storage>,
    locks: Mutex<BTreeMap<String, String>>,
    fail_on: Mutex<Option<FailurePredicate>>,
    delay: Mutex<Option<Duration>>,
    executed: AtomicUsize,
}

/// A connector backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("tables", &self.schema().len())
            .field("executed", &self.executed_count())
            .finish()
    }
}

impl MemoryConnector {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a database that already holds `schema`.
    pub fn with_schema(schema: Snapshot) -> Self {
        let connector = Self::new();
        connector.inner.storage.lock().committed.schema = schema;
        connector
    }

    /// Current schema, as seen from inside an open transaction if any.
    pub fn schema(&self) -> Snapshot {
        self.inner.storage.lock().current().schema.clone()
    }

    /// Make every operation matching `predicate` fail.
    pub fn fail_on(&self, predicate: impl Fn(&SchemaOperation) -> bool + Send + Sync + 'static) {
        *self.inner.fail_on.lock() = Some(Arc::new(predicate));
    }

    /// Stop injecting failures.
    pub fn clear_failure(&self) {
        *self.inner.fail_on.lock() = None;
    }

    /// Sleep this long before executing each operation.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.inner.delay.lock() = delay;
    }

    /// Number of operations executed successfully so far, including rolled back ones.
    pub fn executed_count(&self) -> usize {
        self.inner.executed.load(Ordering::SeqCst)
    }

    /// Check whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.inner.storage.lock().pending.is_some()
    }

    /// Current holder of the lock on `table`.
    pub fn lock_holder(&self, table: &str) -> Option<String> {
        self.inner.locks.lock().get(table).cloned()
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn begin(&self) -> ConnectorResult<()> {
        let mut storage = self.inner.storage.lock();
        if storage.pending.is_some() {
            return Err(ConnectorError::new("a transaction is already in progress"));
        }
        storage.pending = Some(storage.committed.clone());
        Ok(())
    }

    async fn execute(
        &self,
        operation: &SchemaOperation,
        _context: &ExecutionContext<'_>,
    ) -> ConnectorResult<()> {
        let delay = *self.inner.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let predicate = self.inner.fail_on.lock().clone();
        if let Some(predicate) = predicate {
            if predicate(operation) {
                return Err(ConnectorError::new(format!(
                    "injected failure on {}",
                    operation.describe()
                )));
            }
        }

        let mut storage = self.inner.storage.lock();
        operation
            .apply_to(&mut storage.current_mut().schema)
            .map_err(|e| ConnectorError::with_source(operation.describe(), e))?;
        self.inner.executed.fetch_add(1, Ordering::SeqCst);
        trace!(operation = %operation.describe(), "Executed in memory");
        Ok(())
    }

    async fn commit(&self) -> ConnectorResult<()> {
        let mut storage = self.inner.storage.lock();
        match storage.pending.take() {
            Some(state) => {
                storage.committed = state;
                Ok(())
            }
            None => Err(ConnectorError::new("no transaction in progress")),
        }
    }

    async fn rollback(&self) -> ConnectorResult<()> {
        match self.inner.storage.lock().pending.take() {
            Some(_) => Ok(()),
            None => Err(ConnectorError::new("no transaction in progress")),
        }
    }

    async fn history_table_exists(&self, table: &str) -> ConnectorResult<bool> {
        Ok(self.inner.storage.lock().current().history.contains_key(table))
    }

    async fn create_history_table(&self, table: &str) -> ConnectorResult<()> {
        self.inner
            .storage
            .lock()
            .current_mut()
            .history
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    async fn read_history(&self, table: &str) -> ConnectorResult<Vec<HistoryRecord>> {
        self.inner
            .storage
            .lock()
            .current()
            .history
            .get(table)
            .cloned()
            .ok_or_else(|| ConnectorError::new(format!("no such table: {}", table)))
    }

    async fn insert_history(&self, table: &str, record: &HistoryRecord) -> ConnectorResult<()> {
        let mut storage = self.inner.storage.lock();
        let records = storage
            .current_mut()
            .history
            .get_mut(table)
            .ok_or_else(|| ConnectorError::new(format!("no such table: {}", table)))?;
        if records.iter().any(|r| r.migration_id == record.migration_id) {
            return Err(ConnectorError::new(format!(
                "UNIQUE constraint failed: {}.migration_id",
                table
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn delete_history(&self, table: &str, migration_id: &str) -> ConnectorResult<()> {
        let mut storage = self.inner.storage.lock();
        let records = storage
            .current_mut()
            .history
            .get_mut(table)
            .ok_or_else(|| ConnectorError::new(format!("no such table: {}", table)))?;
        records.retain(|r| r.migration_id != migration_id);
        Ok(())
    }

    async fn try_lock(&self, table: &str, owner: &str) -> ConnectorResult<bool> {
        let mut locks = self.inner.locks.lock();
        if locks.contains_key(table) {
            return Ok(false);
        }
        locks.insert(table.to_string(), owner.to_string());
        Ok(true)
    }

    async fn unlock(&self, table: &str) -> ConnectorResult<()> {
        self.inner.locks.lock().remove(table);
        Ok(())
    }

    async fn force_unlock(&self, table: &str) -> ConnectorResult<()> {
        self.inner.locks.lock().remove(table);
        Ok(())
    }
}

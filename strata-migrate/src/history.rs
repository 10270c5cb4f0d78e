//! Migration history tracking inside the target database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifact::{MigrationArtifact, MigrationId};
use crate::connector::{Connector, Transaction};
use crate::error::{MigrateResult, MigrationError};

/// Default name of the history table.
pub const DEFAULT_HISTORY_TABLE: &str = "_strata_migrations";

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Migration ID.
    pub migration_id: String,
    /// Hash of the artifact when it was applied.
    pub hash: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Record for an artifact applied now.
    pub fn for_artifact(artifact: &MigrationArtifact) -> Self {
        Self {
            migration_id: artifact.id.to_string(),
            hash: artifact.hash.clone(),
            applied_at: Utc::now(),
        }
    }
}

/// Reads and writes the history table through a connector.
pub struct HistoryStore<'c, C: Connector + ?Sized> {
    connector: &'c C,
    table: String,
}

impl<'c, C: Connector + ?Sized> HistoryStore<'c, C> {
    /// Create a store over `table`.
    pub fn new(connector: &'c C, table: impl Into<String>) -> Self {
        Self {
            connector,
            table: table.into(),
        }
    }

    /// History table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the history table if it does not exist yet.
    pub async fn ensure_table(&self) -> MigrateResult<()> {
        if !self.connector.history_table_exists(&self.table).await? {
            self.connector.create_history_table(&self.table).await?;
            info!(table = %self.table, "Created migration history table");
        }
        Ok(())
    }

    /// All records, ordered by migration ID.
    pub async fn list(&self) -> MigrateResult<Vec<HistoryRecord>> {
        self.ensure_table().await?;
        let mut records = self.connector.read_history(&self.table).await?;
        records.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));
        debug!(table = %self.table, count = records.len(), "Read migration history");
        Ok(records)
    }

    /// All records, or none if the table was never created. Never writes.
    pub async fn list_if_exists(&self) -> MigrateResult<Vec<HistoryRecord>> {
        if !self.connector.history_table_exists(&self.table).await? {
            return Ok(Vec::new());
        }
        let mut records = self.connector.read_history(&self.table).await?;
        records.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));
        Ok(records)
    }

    /// The most recently applied migration.
    pub async fn last(&self) -> MigrateResult<Option<HistoryRecord>> {
        Ok(self.list().await?.pop())
    }

    /// Record an applied artifact as part of `tx`.
    pub async fn record(
        &self,
        tx: &mut Transaction<'_, C>,
        artifact: &MigrationArtifact,
    ) -> MigrateResult<HistoryRecord> {
        let connector = tx.connector();
        let mut records = connector.read_history(&self.table).await?;
        records.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));
        if let Some(last) = records.last() {
            if last.migration_id.as_str() >= artifact.id.as_str() {
                return Err(MigrationError::database(format!(
                    "cannot record {}: history already ends at {}",
                    artifact.id, last.migration_id
                )));
            }
        }

        let record = HistoryRecord::for_artifact(artifact);
        connector.insert_history(&self.table, &record).await?;
        debug!(migration = %artifact.id, "Recorded migration");
        Ok(record)
    }

    /// Remove the record of a reverted migration as part of `tx`.
    pub async fn unrecord(&self, tx: &mut Transaction<'_, C>, id: &MigrationId) -> MigrateResult<()> {
        let connector = tx.connector();
        let mut records = connector.read_history(&self.table).await?;
        records.sort_by(|a, b| a.migration_id.cmp(&b.migration_id));
        match records.last() {
            Some(last) if last.migration_id == id.as_str() => {}
            Some(last) => {
                return Err(MigrationError::database(format!(
                    "cannot unrecord {}: the last applied migration is {}",
                    id, last.migration_id
                )));
            }
            None => {
                return Err(MigrationError::database(format!(
                    "cannot unrecord {}: history is empty",
                    id
                )));
            }
        }

        connector.delete_history(&self.table, id.as_str()).await?;
        debug!(migration = %id, "Unrecorded migration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::memory::MemoryConnector;
    use strata_schema::{Column, ColumnType, Snapshot, Table};

    fn artifact(id: &str) -> MigrationArtifact {
        let snapshot = Snapshot::new()
            .with_table(Table::new("t").column(Column::new("id", ColumnType::Integer)));
        let diff = diff(&Snapshot::new(), &snapshot).unwrap();
        MigrationArtifact::new(MigrationId::parse(id).unwrap(), Utc::now(), diff, snapshot)
            .unwrap()
    }

    #[tokio::test]
    async fn test_table_created_lazily() {
        let connector = MemoryConnector::new();
        let store = HistoryStore::new(&connector, DEFAULT_HISTORY_TABLE);

        assert!(!connector.history_table_exists(DEFAULT_HISTORY_TABLE).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
        assert!(connector.history_table_exists(DEFAULT_HISTORY_TABLE).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_and_unrecord() {
        let connector = MemoryConnector::new();
        let store = HistoryStore::new(&connector, DEFAULT_HISTORY_TABLE);
        store.ensure_table().await.unwrap();

        let first = artifact("20240101000000000_first");
        let second = artifact("20240102000000000_second");

        let mut tx = Transaction::begin(&connector).await.unwrap();
        store.record(&mut tx, &first).await.unwrap();
        store.record(&mut tx, &second).await.unwrap();
        tx.commit().await.unwrap();

        let last = store.last().await.unwrap().unwrap();
        assert_eq!(last.migration_id, second.id.as_str());
        assert_eq!(last.hash, second.hash);

        let mut tx = Transaction::begin(&connector).await.unwrap();
        assert!(store.unrecord(&mut tx, &first.id).await.is_err());
        store.unrecord(&mut tx, &second.id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_refuses_out_of_order() {
        let connector = MemoryConnector::new();
        let store = HistoryStore::new(&connector, DEFAULT_HISTORY_TABLE);
        store.ensure_table().await.unwrap();

        let mut tx = Transaction::begin(&connector).await.unwrap();
        store
            .record(&mut tx, &artifact("20240102000000000_second"))
            .await
            .unwrap();
        let err = store
            .record(&mut tx, &artifact("20240101000000000_first"))
            .await
            .unwrap_err();
        tx.rollback().await.unwrap();

        assert!(err.to_string().contains("history already ends"));
        assert!(store.list().await.unwrap().is_empty());
    }
}

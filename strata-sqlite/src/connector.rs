//! SQLite implementation of the migration connector.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{ErrorCode, OptionalExtension, params};
use strata_migrate::{
    Connector, ConnectorError, ConnectorResult, ExecutionContext, HistoryRecord, SchemaOperation,
};
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::{DatabasePath, SqliteConfig};
use crate::error::{SqliteError, SqliteResult};
use crate::sql;

/// How long taking the migration lock waits on another connection's write
/// transaction before reporting the lock as held.
const LOCK_BUSY_TIMEOUT: Duration = Duration::from_millis(50);

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// A migration connector backed by a single SQLite connection.
///
/// Schema changes and history writes issued between `begin` and
/// `commit` share one SQLite transaction, so a failed migration leaves
/// neither tables nor history behind.
pub struct SqliteConnector {
    conn: Connection,
    config: SqliteConfig,
}

impl SqliteConnector {
    /// Open a connection with the given configuration.
    pub async fn connect(config: SqliteConfig) -> SqliteResult<Self> {
        let conn = match &config.path {
            DatabasePath::Memory => Connection::open_in_memory().await?,
            DatabasePath::File(path) => Connection::open(path.clone()).await.map_err(|e| {
                SqliteError::connection(format!("cannot open {}: {}", path.display(), e))
            })?,
        };

        let init_sql = config.init_sql();
        conn.call(move |conn| {
            conn.execute_batch(&init_sql)?;
            Ok(())
        })
        .await?;

        info!(path = %config.path.display(), "Connected to SQLite database");
        Ok(Self { conn, config })
    }

    /// Open a connection from a database URL.
    pub async fn from_url(url: &str) -> SqliteResult<Self> {
        Self::connect(SqliteConfig::from_url(url)?).await
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> SqliteResult<Self> {
        Self::connect(SqliteConfig::memory()).await
    }

    /// Connection configuration.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Run raw SQL, for seeding and inspection.
    pub async fn execute_batch(&self, sql: impl Into<String>) -> SqliteResult<()> {
        self.run(vec![sql.into()]).await
    }

    /// Names of user tables, sorted.
    pub async fn table_names(&self) -> SqliteResult<Vec<String>> {
        self.strings(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            None,
        )
        .await
    }

    /// Column names of a table, in declaration order.
    pub async fn column_names(&self, table: &str) -> SqliteResult<Vec<String>> {
        self.strings(
            "SELECT name FROM pragma_table_info(?1) ORDER BY cid",
            Some(table.to_string()),
        )
        .await
    }

    /// Names of the explicitly created indexes of a table, sorted.
    pub async fn index_names(&self, table: &str) -> SqliteResult<Vec<String>> {
        self.strings(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
            Some(table.to_string()),
        )
        .await
    }

    /// Every user table with its columns.
    pub async fn introspect_tables(&self) -> SqliteResult<BTreeMap<String, Vec<String>>> {
        let mut tables = BTreeMap::new();
        for table in self.table_names().await? {
            let columns = self.column_names(&table).await?;
            tables.insert(table, columns);
        }
        Ok(tables)
    }

    /// Number of rows in a table.
    pub async fn row_count(&self, table: &str) -> SqliteResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", sql::quote(table));
        let count = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
            .await?;
        Ok(count)
    }

    /// Owner of the migration lock, if it is taken.
    pub async fn lock_holder(&self, history_table: &str) -> SqliteResult<Option<String>> {
        let lock_table = sql::lock_table_name(history_table);
        let create = sql::create_lock_table(history_table);
        let select = format!(
            "SELECT owner FROM {} WHERE id = 1",
            sql::quote(&lock_table)
        );
        let owner = self
            .conn
            .call(move |conn| {
                conn.execute_batch(&create)?;
                Ok(conn.query_row(&select, [], |row| row.get(0)).optional()?)
            })
            .await?;
        Ok(owner)
    }

    async fn run(&self, statements: Vec<String>) -> SqliteResult<()> {
        self.conn
            .call(move |conn| {
                for statement in &statements {
                    conn.execute_batch(statement)?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn strings(&self, sql: &'static str, param: Option<String>) -> SqliteResult<Vec<String>> {
        let values = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(sql)?;
                let rows = match &param {
                    Some(p) => stmt
                        .query_map([p], |row| row.get(0))?
                        .collect::<Result<Vec<String>, _>>()?,
                    None => stmt
                        .query_map([], |row| row.get(0))?
                        .collect::<Result<Vec<String>, _>>()?,
                };
                Ok(rows)
            })
            .await?;
        Ok(values)
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn begin(&self) -> ConnectorResult<()> {
        self.run(vec!["BEGIN IMMEDIATE".to_string()]).await?;
        Ok(())
    }

    async fn execute(
        &self,
        operation: &SchemaOperation,
        context: &ExecutionContext<'_>,
    ) -> ConnectorResult<()> {
        let statements = sql::operation_statements(operation, context.before)?;
        debug!(
            operation = %operation.describe(),
            statements = statements.len(),
            rebuild = sql::needs_rebuild(operation),
            "Executing schema operation"
        );
        self.run(statements).await.map_err(|e| {
            ConnectorError::with_source(format!("{} failed", operation.describe()), e)
        })
    }

    async fn commit(&self) -> ConnectorResult<()> {
        self.run(vec!["COMMIT".to_string()]).await?;
        Ok(())
    }

    async fn rollback(&self) -> ConnectorResult<()> {
        self.run(vec!["ROLLBACK".to_string()]).await?;
        Ok(())
    }

    async fn history_table_exists(&self, table: &str) -> ConnectorResult<bool> {
        let name = table.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [&name],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(exists)
    }

    async fn create_history_table(&self, table: &str) -> ConnectorResult<()> {
        self.run(vec![sql::create_history_table(table)]).await?;
        Ok(())
    }

    async fn read_history(&self, table: &str) -> ConnectorResult<Vec<HistoryRecord>> {
        let sql = format!(
            "SELECT migration_id, hash, applied_at FROM {} ORDER BY migration_id",
            sql::quote(table)
        );
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(SqliteError::from)?;

        let mut records = Vec::with_capacity(rows.len());
        for (migration_id, hash, applied_at) in rows {
            let applied_at = DateTime::parse_from_rfc3339(&applied_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    SqliteError::deserialization(format!(
                        "invalid applied_at '{}' for {}: {}",
                        applied_at, migration_id, e
                    ))
                })?;
            records.push(HistoryRecord {
                migration_id,
                hash,
                applied_at,
            });
        }
        Ok(records)
    }

    async fn insert_history(&self, table: &str, record: &HistoryRecord) -> ConnectorResult<()> {
        let sql = format!(
            "INSERT INTO {} (migration_id, hash, applied_at) VALUES (?1, ?2, ?3)",
            sql::quote(table)
        );
        let record = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    &sql,
                    params![record.migration_id, record.hash, record.applied_at.to_rfc3339()],
                )?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }

    async fn delete_history(&self, table: &str, migration_id: &str) -> ConnectorResult<()> {
        let sql = format!("DELETE FROM {} WHERE migration_id = ?1", sql::quote(table));
        let id = migration_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| Ok(conn.execute(&sql, [&id])?))
            .await
            .map_err(SqliteError::from)?;
        if deleted != 1 {
            return Err(ConnectorError::new(format!(
                "no history record for migration '{}'",
                migration_id
            )));
        }
        Ok(())
    }

    async fn try_lock(&self, table: &str, owner: &str) -> ConnectorResult<bool> {
        let create = sql::create_lock_table(table);
        let insert = format!(
            "INSERT OR IGNORE INTO {} (id, owner, locked_at) VALUES (1, ?1, ?2)",
            sql::quote(&sql::lock_table_name(table))
        );
        let owner = owner.to_string();
        let now = Utc::now().to_rfc3339();
        let restore = Duration::from_millis(self.config.busy_timeout_ms.map_or(0, u64::from));
        let attempt = self
            .conn
            .call(move |conn| {
                conn.busy_timeout(LOCK_BUSY_TIMEOUT)?;
                let attempt = conn
                    .execute_batch(&create)
                    .and_then(|()| conn.execute(&insert, params![owner, now]));
                conn.busy_timeout(restore)?;
                match attempt {
                    Ok(inserted) => Ok(Some(inserted == 1)),
                    Err(e) if is_busy(&e) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(SqliteError::from)?;

        let acquired = match attempt {
            Some(acquired) => acquired,
            None => {
                // Another connection is inside a write transaction.
                debug!(table, "Database busy while taking the migration lock");
                false
            }
        };
        debug!(table, acquired, "Migration lock attempt");
        Ok(acquired)
    }

    async fn unlock(&self, table: &str) -> ConnectorResult<()> {
        let create = sql::create_lock_table(table);
        let delete = format!(
            "DELETE FROM {} WHERE id = 1",
            sql::quote(&sql::lock_table_name(table))
        );
        self.run(vec![create, delete]).await?;
        Ok(())
    }

    async fn force_unlock(&self, table: &str) -> ConnectorResult<()> {
        if let Some(owner) = self.lock_holder(table).await? {
            warn!(table, owner = %owner, "Forcibly releasing migration lock");
        }
        self.unlock(table).await
    }
}

impl std::fmt::Debug for SqliteConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnector")
            .field("path", &self.config.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strata_schema::{Column, ColumnType, Constraint, Index, Snapshot, Table};

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", ColumnType::Integer))
            .column(Column::new("name", ColumnType::Text))
            .constraint(Constraint::primary_key("pk_users", ["id"]))
            .index(Index::new("idx_users_name", ["name"]))
    }

    async fn run(connector: &SqliteConnector, before: &Snapshot, op: SchemaOperation) {
        connector
            .execute(&op, &ExecutionContext::new(before))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_and_drop_table() {
        let connector = SqliteConnector::open_in_memory().await.unwrap();
        let empty = Snapshot::new();

        run(&connector, &empty, SchemaOperation::CreateTable { table: users() }).await;
        assert_eq!(connector.table_names().await.unwrap(), vec!["users"]);
        assert_eq!(connector.column_names("users").await.unwrap(), vec!["id", "name"]);
        assert_eq!(connector.index_names("users").await.unwrap(), vec!["idx_users_name"]);

        let with_users = Snapshot::new().with_table(users());
        run(&connector, &with_users, SchemaOperation::DropTable { table: users() }).await;
        assert!(connector.table_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_introspect_tables() {
        let connector = SqliteConnector::open_in_memory().await.unwrap();
        run(&connector, &Snapshot::new(), SchemaOperation::CreateTable { table: users() }).await;

        let tables = connector.introspect_tables().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables["users"], vec!["id", "name"]);
    }

    #[tokio::test]
    async fn test_alter_column_keeps_rows_and_indexes() {
        let connector = SqliteConnector::open_in_memory().await.unwrap();
        let before = Snapshot::new().with_table(users());
        run(&connector, &Snapshot::new(), SchemaOperation::CreateTable { table: users() }).await;
        connector
            .execute_batch("INSERT INTO users (id, name) VALUES (1, 'ada'), (2, 'grace')")
            .await
            .unwrap();

        run(
            &connector,
            &before,
            SchemaOperation::AlterColumn {
                table: "users".to_string(),
                from: Column::new("name", ColumnType::Text),
                to: Column::new("name", ColumnType::Varchar(64)).nullable(),
            },
        )
        .await;

        assert_eq!(connector.row_count("users").await.unwrap(), 2);
        assert_eq!(connector.table_names().await.unwrap(), vec!["users"]);
        assert_eq!(connector.index_names("users").await.unwrap(), vec!["idx_users_name"]);
    }

    #[tokio::test]
    async fn test_required_column_on_populated_table_fails() {
        let connector = SqliteConnector::open_in_memory().await.unwrap();
        let before = Snapshot::new().with_table(users());
        run(&connector, &Snapshot::new(), SchemaOperation::CreateTable { table: users() }).await;
        connector
            .execute_batch("INSERT INTO users (id, name) VALUES (1, 'ada')")
            .await
            .unwrap();

        connector.begin().await.unwrap();
        let err = connector
            .execute(
                &SchemaOperation::AddColumn {
                    table: "users".to_string(),
                    column: Column::new("email", ColumnType::Text),
                },
                &ExecutionContext::new(&before),
            )
            .await
            .unwrap_err();
        connector.rollback().await.unwrap();

        assert!(err.message.contains("add column users.email"));
        assert_eq!(connector.column_names("users").await.unwrap(), vec!["id", "name"]);
        assert_eq!(connector.row_count("users").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_renames() {
        let connector = SqliteConnector::open_in_memory().await.unwrap();
        let mut state = Snapshot::new();
        let ops = [
            SchemaOperation::CreateTable { table: users() },
            SchemaOperation::RenameColumn {
                table: "users".to_string(),
                from: "name".to_string(),
                to: "full_name".to_string(),
            },
            SchemaOperation::RenameTable {
                from: "users".to_string(),
                to: "people".to_string(),
            },
        ];
        for op in ops {
            run(&connector, &state, op.clone()).await;
            op.apply_to(&mut state).unwrap();
        }

        assert_eq!(connector.table_names().await.unwrap(), vec!["people"]);
        assert_eq!(connector.column_names("people").await.unwrap(), vec!["id", "full_name"]);
    }

    #[tokio::test]
    async fn test_rollback_discards_schema_and_history() {
        let connector = SqliteConnector::open_in_memory().await.unwrap();
        connector.create_history_table("_history").await.unwrap();

        connector.begin().await.unwrap();
        run(&connector, &Snapshot::new(), SchemaOperation::CreateTable { table: users() }).await;
        connector
            .insert_history(
                "_history",
                &HistoryRecord {
                    migration_id: "20240101000000000_init".to_string(),
                    hash: "abc".to_string(),
                    applied_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        connector.rollback().await.unwrap();

        assert_eq!(connector.table_names().await.unwrap(), vec!["_history"]);
        assert!(connector.read_history("_history").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let connector = SqliteConnector::open_in_memory().await.unwrap();
        assert!(!connector.history_table_exists("_history").await.unwrap());
        connector.create_history_table("_history").await.unwrap();
        assert!(connector.history_table_exists("_history").await.unwrap());

        let record = HistoryRecord {
            migration_id: "20240101000000000_init".to_string(),
            hash: "abc".to_string(),
            applied_at: DateTime::parse_from_rfc3339("2024-01-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        connector.insert_history("_history", &record).await.unwrap();
        assert!(connector.insert_history("_history", &record).await.is_err());

        assert_eq!(connector.read_history("_history").await.unwrap(), vec![record.clone()]);

        connector
            .delete_history("_history", &record.migration_id)
            .await
            .unwrap();
        assert!(
            connector
                .delete_history("_history", &record.migration_id)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_lock() {
        let connector = SqliteConnector::open_in_memory().await.unwrap();

        assert!(connector.try_lock("_history", "a").await.unwrap());
        assert!(!connector.try_lock("_history", "b").await.unwrap());
        assert_eq!(connector.lock_holder("_history").await.unwrap().as_deref(), Some("a"));

        connector.force_unlock("_history").await.unwrap();
        assert!(connector.lock_holder("_history").await.unwrap().is_none());
        assert!(connector.try_lock("_history", "b").await.unwrap());
        connector.unlock("_history").await.unwrap();
        assert!(connector.lock_holder("_history").await.unwrap().is_none());
    }
}

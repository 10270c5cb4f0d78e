//! Applying and reverting migrations against a live database.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use strata_schema::Snapshot;
use tracing::{debug, error, info, warn};

use crate::artifact::{MigrationArtifact, MigrationId};
use crate::config::MigrationConfig;
use crate::connector::{Connector, ExecutionContext, Transaction};
use crate::error::{MigrateResult, MigrationError};
use crate::history::{HistoryRecord, HistoryStore};
use crate::repository::ArtifactRepository;
use crate::status::{Drift, MigrationStatus};

/// Where `apply` should bring the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The newest migration in the repository.
    Latest,
    /// Before the first migration: revert everything.
    None,
    /// A migration given by full id or by name.
    Id(String),
}

impl Target {
    /// Parse a command-line target. `0` means [`Target::None`].
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "0" => Self::None,
            other => Self::Id(other.to_string()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::None => write!(f, "0"),
            Self::Id(id) => write!(f, "{}", id),
        }
    }
}

/// Direction of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Applying forward operations.
    Up,
    /// Applying reverse operations.
    Down,
    /// Nothing to do.
    Unchanged,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// What `apply` would do.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Direction of the run.
    pub direction: Direction,
    /// Resolved target; `None` means before the first migration.
    pub target: Option<String>,
    /// Artifacts to apply or revert, in execution order.
    pub steps: Vec<MigrationArtifact>,
    /// Schema the database is modelled to be in before the first step.
    start: Snapshot,
}

impl MigrationPlan {
    /// Check if there's anything to do.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Ids of the planned steps.
    pub fn ids(&self) -> Vec<&MigrationId> {
        self.steps.iter().map(|a| &a.id).collect()
    }
}

/// Result of an `apply` call.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigrations {
    /// Direction of the run.
    pub direction: Direction,
    /// Migrations applied or reverted, in execution order.
    pub migrations: Vec<MigrationId>,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl AppliedMigrations {
    /// Check if anything changed.
    pub fn has_changes(&self) -> bool {
        !self.migrations.is_empty()
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        match self.direction {
            Direction::Unchanged => "Database is already up to date".to_string(),
            Direction::Up => format!(
                "Applied {} migration(s) in {}ms",
                self.migrations.len(),
                self.duration_ms
            ),
            Direction::Down => format!(
                "Reverted {} migration(s) in {}ms",
                self.migrations.len(),
                self.duration_ms
            ),
        }
    }
}

/// Cooperative cancellation, checked between migrations.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Brings a database to a target migration.
///
/// The applier only replays stored operation lists; it never diffs models.
/// Each migration runs in its own transaction together with its history
/// record, so history always matches the committed schema.
pub struct Applier<'a, R: ArtifactRepository + ?Sized, C: Connector + ?Sized> {
    repository: &'a R,
    connector: &'a C,
    config: MigrationConfig,
    cancellation: CancellationFlag,
    owner: String,
}

impl<'a, R: ArtifactRepository + ?Sized, C: Connector + ?Sized> Applier<'a, R, C> {
    /// Create an applier.
    pub fn new(repository: &'a R, connector: &'a C, config: MigrationConfig) -> Self {
        Self {
            repository,
            connector,
            config,
            cancellation: CancellationFlag::new(),
            owner: format!(
                "pid {} at {}",
                std::process::id(),
                chrono::Utc::now().to_rfc3339()
            ),
        }
    }

    /// Use a shared cancellation flag.
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    /// Set the lock owner description.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    fn history(&self) -> HistoryStore<'a, C> {
        HistoryStore::new(self.connector, self.config.history_table.clone())
    }

    /// Merge the repository with the history store. Never writes.
    pub async fn status(&self) -> MigrateResult<MigrationStatus> {
        let records = self.history().list_if_exists().await?;
        let mut hashes = BTreeMap::new();
        for id in self.repository.list_ids().await? {
            let artifact = self.repository.get(&id).await?;
            hashes.insert(id.to_string(), artifact.hash);
        }
        Ok(MigrationStatus::from_parts(&hashes, &records))
    }

    /// Compute what `apply(target)` would do. Never writes.
    pub async fn plan(&self, target: &Target) -> MigrateResult<MigrationPlan> {
        let records = self.history().list_if_exists().await?;
        self.plan_from(target, &records).await
    }

    /// Bring the database to `target`.
    pub async fn apply(&self, target: &Target) -> MigrateResult<AppliedMigrations> {
        let lock = self.config.history_table.as_str();
        if !self.connector.try_lock(lock, &self.owner).await? {
            warn!(lock = %lock, "Migration lock is held by another process");
            return Err(MigrationError::concurrent(lock));
        }
        debug!(lock = %lock, owner = %self.owner, "Acquired migration lock");

        let result = self.apply_locked(target).await;

        match self.connector.unlock(lock).await {
            Ok(()) => debug!(lock = %lock, "Released migration lock"),
            Err(e) if result.is_ok() => return Err(e.into()),
            Err(e) => error!(lock = %lock, error = %e, "Failed to release migration lock"),
        }
        result
    }

    /// Clear a lock left behind by a crashed process.
    pub async fn force_unlock(&self) -> MigrateResult<()> {
        self.connector
            .force_unlock(&self.config.history_table)
            .await?;
        warn!(lock = %self.config.history_table, "Migration lock cleared");
        Ok(())
    }

    async fn apply_locked(&self, target: &Target) -> MigrateResult<AppliedMigrations> {
        let start = Instant::now();
        let history = self.history();
        let records = history.list().await?;
        let plan = self.plan_from(target, &records).await?;

        if plan.is_empty() {
            info!(target = %target, "Database is already at the target migration");
            return Ok(AppliedMigrations {
                direction: Direction::Unchanged,
                migrations: Vec::new(),
                duration_ms: elapsed_ms(start),
            });
        }

        info!(
            direction = %plan.direction,
            count = plan.steps.len(),
            target = plan.target.as_deref().unwrap_or("0"),
            "Migrating database"
        );

        let mut done = Vec::with_capacity(plan.steps.len());
        let mut before = plan.start.clone();

        for artifact in &plan.steps {
            if self.cancellation.is_cancelled() {
                warn!(applied = done.len(), "Migration cancelled");
                return Err(MigrationError::Cancelled {
                    applied: done.len(),
                });
            }

            self.run_step(&history, artifact, plan.direction, &before)
                .await?;

            before = match plan.direction {
                Direction::Down => self.snapshot_before(&plan, artifact),
                _ => artifact.snapshot.clone(),
            };
            done.push(artifact.id.clone());
        }

        let result = AppliedMigrations {
            direction: plan.direction,
            migrations: done,
            duration_ms: elapsed_ms(start),
        };
        info!(summary = %result.summary(), "Migration finished");
        Ok(result)
    }

    /// Modelled schema after reverting `artifact`: the snapshot of the step
    /// reverted next, or the plan's end state.
    fn snapshot_before(&self, plan: &MigrationPlan, artifact: &MigrationArtifact) -> Snapshot {
        plan.steps
            .iter()
            .skip_while(|a| a.id != artifact.id)
            .nth(1)
            .map(|next| next.snapshot.clone())
            .unwrap_or_default()
    }

    async fn plan_from(
        &self,
        target: &Target,
        records: &[HistoryRecord],
    ) -> MigrateResult<MigrationPlan> {
        let repo_ids = self.repository.list_ids().await?;
        let applied: Vec<&str> = records.iter().map(|r| r.migration_id.as_str()).collect();
        let last_applied = applied.last().copied();

        let target_id = match target {
            Target::Latest => repo_ids.last().map(|id| id.to_string()),
            Target::None => None,
            Target::Id(requested) => Some(resolve_target(requested, &repo_ids, &applied)?),
        };
        debug!(
            target = target_id.as_deref().unwrap_or("0"),
            last_applied = last_applied.unwrap_or("0"),
            "Resolved migration target"
        );

        // `None` sorts before every id.
        let direction = match target_id.as_deref().cmp(&last_applied) {
            std::cmp::Ordering::Greater => Direction::Up,
            std::cmp::Ordering::Less => Direction::Down,
            std::cmp::Ordering::Equal => Direction::Unchanged,
        };

        match direction {
            Direction::Unchanged => Ok(MigrationPlan {
                direction,
                target: target_id,
                steps: Vec::new(),
                start: Snapshot::new(),
            }),
            Direction::Up => {
                let upper = target_id.as_deref().unwrap_or_default();
                self.plan_up(&repo_ids, &applied, last_applied, upper)
                    .await
                    .map(|(steps, start)| MigrationPlan {
                        direction,
                        target: target_id.clone(),
                        steps,
                        start,
                    })
            }
            Direction::Down => {
                if let (Some(target), Some(last)) = (target_id.as_deref(), last_applied) {
                    if !applied.contains(&target) {
                        return Err(MigrationError::HistoryDrift {
                            issues: vec![Drift::OutOfOrder {
                                migration_id: target.to_string(),
                                last_applied: last.to_string(),
                            }],
                        });
                    }
                }
                let steps = self
                    .plan_down(records, target_id.as_deref())
                    .await?;
                let start = steps
                    .first()
                    .map(|a| a.snapshot.clone())
                    .unwrap_or_default();
                Ok(MigrationPlan {
                    direction,
                    target: target_id,
                    steps,
                    start,
                })
            }
        }
    }

    async fn plan_up(
        &self,
        repo_ids: &[MigrationId],
        applied: &[&str],
        last_applied: Option<&str>,
        upper: &str,
    ) -> MigrateResult<(Vec<MigrationArtifact>, Snapshot)> {
        let out_of_order: Vec<Drift> = match last_applied {
            Some(last) => repo_ids
                .iter()
                .filter(|id| id.as_str() < last && !applied.contains(&id.as_str()))
                .map(|id| Drift::OutOfOrder {
                    migration_id: id.to_string(),
                    last_applied: last.to_string(),
                })
                .collect(),
            None => Vec::new(),
        };
        if !out_of_order.is_empty() {
            return Err(MigrationError::HistoryDrift {
                issues: out_of_order,
            });
        }

        let start = match last_applied {
            Some(last) => {
                let id = MigrationId::parse(last)?;
                if !self.repository.contains(&id).await? {
                    return Err(MigrationError::HistoryDrift {
                        issues: vec![Drift::MissingArtifact {
                            migration_id: last.to_string(),
                        }],
                    });
                }
                self.repository.get(&id).await?.snapshot
            }
            None => Snapshot::new(),
        };

        let mut steps = Vec::new();
        for id in repo_ids {
            let after_last = last_applied.is_none_or(|last| id.as_str() > last);
            if after_last && id.as_str() <= upper {
                steps.push(self.repository.get(id).await?);
            }
        }
        Ok((steps, start))
    }

    async fn plan_down(
        &self,
        records: &[HistoryRecord],
        target: Option<&str>,
    ) -> MigrateResult<Vec<MigrationArtifact>> {
        let mut steps = Vec::new();
        let mut drift = Vec::new();

        for record in records.iter().rev() {
            if target.is_some_and(|t| record.migration_id.as_str() <= t) {
                break;
            }
            let id = MigrationId::parse(&record.migration_id)?;
            if !self.repository.contains(&id).await? {
                return Err(MigrationError::not_found(record.migration_id.as_str()));
            }
            let artifact = self.repository.get(&id).await?;
            if artifact.hash != record.hash {
                drift.push(Drift::HashMismatch {
                    migration_id: record.migration_id.clone(),
                    recorded: record.hash.clone(),
                    actual: artifact.hash.clone(),
                });
            }
            steps.push(artifact);
        }

        if !drift.is_empty() {
            return Err(MigrationError::HistoryDrift { issues: drift });
        }
        Ok(steps)
    }

    /// Run one artifact in its own transaction.
    ///
    /// The deadline covers the operations and the history write. The commit
    /// runs outside it, so a timeout always ends in a rollback.
    async fn run_step(
        &self,
        history: &HistoryStore<'a, C>,
        artifact: &MigrationArtifact,
        direction: Direction,
        before: &Snapshot,
    ) -> MigrateResult<()> {
        info!(migration = %artifact.id, direction = %direction, "Running migration");
        let mut tx = Transaction::begin(self.connector).await?;

        let work = self.run_operations(&mut tx, history, artifact, direction, before);
        let outcome = match self.config.transaction_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, work).await {
                Ok(result) => result,
                Err(_) => {
                    let timeout_ms = duration_ms(timeout);
                    error!(migration = %artifact.id, timeout_ms, "Migration timed out, rolling back");
                    Err(MigrationError::Timeout {
                        migration_id: artifact.id.to_string(),
                        timeout_ms,
                    })
                }
            },
            None => work.await,
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = tx.commit().await {
                    if let Err(rollback) = self.connector.rollback().await {
                        warn!(migration = %artifact.id, error = %rollback, "Rollback after failed commit failed");
                    }
                    return Err(e.into());
                }
                info!(migration = %artifact.id, direction = %direction, "Migration committed");
                Ok(())
            }
            Err(e @ MigrationError::Timeout { .. }) => {
                // Timeout is only reported once the rollback went through.
                tx.rollback().await?;
                Err(e)
            }
            Err(e) => {
                error!(migration = %artifact.id, error = %e, "Migration failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    warn!(migration = %artifact.id, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn run_operations(
        &self,
        tx: &mut Transaction<'a, C>,
        history: &HistoryStore<'a, C>,
        artifact: &MigrationArtifact,
        direction: Direction,
        before: &Snapshot,
    ) -> MigrateResult<()> {
        let operations = match direction {
            Direction::Down => &artifact.down,
            _ => &artifact.up,
        };

        let mut state = before.clone();
        for (index, operation) in operations.iter().enumerate() {
            debug!(migration = %artifact.id, index, operation = %operation.describe(), "Executing operation");
            tx.execute(operation, &ExecutionContext::new(&state))
                .await
                .map_err(|source| MigrationError::OperationExecution {
                    migration_id: artifact.id.to_string(),
                    index,
                    operation: Box::new(operation.clone()),
                    source,
                })?;
            operation.apply_to(&mut state).map_err(|e| {
                MigrationError::invalid_artifact(artifact.id.as_str(), e.to_string())
            })?;
        }

        match direction {
            Direction::Down => history.unrecord(tx, &artifact.id).await,
            _ => history.record(tx, artifact).await.map(|_| ()),
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    duration_ms(start.elapsed())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Resolve a requested id or name against known ids.
fn resolve_target(
    requested: &str,
    repo_ids: &[MigrationId],
    applied: &[&str],
) -> MigrateResult<String> {
    let mut known: Vec<&str> = repo_ids
        .iter()
        .map(MigrationId::as_str)
        .chain(applied.iter().copied())
        .collect();
    known.sort_unstable();
    known.dedup();

    if known.contains(&requested) {
        return Ok(requested.to_string());
    }

    let candidates: Vec<&str> = known
        .into_iter()
        .filter(|id| {
            MigrationId::parse(id)
                .map(|parsed| parsed.name() == requested)
                .unwrap_or(false)
        })
        .collect();

    match candidates.as_slice() {
        [] => Err(MigrationError::not_found(requested)),
        [single] => Ok(single.to_string()),
        many => Err(MigrationError::AmbiguousTarget {
            name: requested.to_string(),
            candidates: many.iter().map(|s| s.to_string()).collect(),
        }),
    }
}

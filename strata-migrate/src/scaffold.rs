//! Scaffolding: turning a model change into a new migration artifact.

use chrono::{DateTime, Utc};
use strata_schema::{ModelProvider, Snapshot};
use tracing::{debug, info};

use crate::artifact::{MigrationArtifact, MigrationId};
use crate::diff::Differ;
use crate::error::{MigrateResult, MigrationError};
use crate::operation::apply_operations;
use crate::repository::ArtifactRepository;

/// Source of the current time for migration ids.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Generates migration artifacts from model changes.
///
/// The scaffolder only touches the artifact repository and the model
/// provider; it never needs a database connection.
pub struct Scaffolder<'a, R: ArtifactRepository + ?Sized, P: ModelProvider + ?Sized> {
    repository: &'a R,
    provider: &'a P,
    clock: Box<dyn Clock + 'a>,
    differ: Differ,
}

impl<'a, R: ArtifactRepository + ?Sized, P: ModelProvider + ?Sized> Scaffolder<'a, R, P> {
    /// Create a scaffolder using the system clock.
    pub fn new(repository: &'a R, provider: &'a P) -> Self {
        Self {
            repository,
            provider,
            clock: Box::new(SystemClock),
            differ: Differ::new(),
        }
    }

    /// Use another clock.
    pub fn with_clock(mut self, clock: impl Clock + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Declare a table rename.
    pub fn rename_table(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.differ = self.differ.rename_table(from, to);
        self
    }

    /// Declare a column rename.
    pub fn rename_column(
        mut self,
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.differ = self.differ.rename_column(table, from, to);
        self
    }

    /// Build the next artifact without storing it.
    pub async fn prepare(&self, name: &str) -> MigrateResult<MigrationArtifact> {
        let latest = self.repository.latest().await?;
        let previous = latest
            .as_ref()
            .map(|a| a.snapshot.clone())
            .unwrap_or_else(Snapshot::new);

        let current = self.provider.current_model()?;
        current.validate()?;

        let diff = self.differ.diff(&previous, &current)?;
        if diff.is_empty() {
            return Err(MigrationError::EmptyDiff);
        }
        debug!(summary = %diff.summary(), "Model changes detected");

        let produced = apply_operations(&previous, &diff.up)?;
        if produced != current {
            return Err(MigrationError::invalid_artifact(
                name,
                "forward operations do not reproduce the current model",
            ));
        }
        let restored = apply_operations(&current, &diff.down)?;
        if restored != previous {
            return Err(MigrationError::invalid_artifact(
                name,
                "reverse operations do not restore the previous model",
            ));
        }

        let now = self.clock.now();
        let id = MigrationId::next(name, now, latest.as_ref().map(|a| &a.id))?;
        MigrationArtifact::new(id, now, diff, current)
    }

    /// Build the next artifact and store it in the repository.
    pub async fn scaffold(&self, name: &str) -> MigrateResult<MigrationArtifact> {
        let artifact = self.prepare(name).await?;
        self.repository.put(&artifact).await?;
        info!(
            migration = %artifact.id,
            operations = artifact.up.len(),
            "Scaffolded migration"
        );
        Ok(artifact)
    }
}

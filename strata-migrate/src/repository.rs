//! Durable storage of migration artifacts.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::artifact::{MigrationArtifact, MigrationId};
use crate::error::{MigrateResult, MigrationError};

/// File name of an artifact inside its migration directory.
pub const ARTIFACT_FILE: &str = "migration.json";

/// Storage for migration artifacts, keyed by migration ID.
#[async_trait::async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Prepare the backing store.
    async fn init(&self) -> MigrateResult<()>;

    /// Store a new artifact. Existing artifacts are never overwritten.
    async fn put(&self, artifact: &MigrationArtifact) -> MigrateResult<()>;

    /// Load an artifact.
    async fn get(&self, id: &MigrationId) -> MigrateResult<MigrationArtifact>;

    /// All artifact ids in ascending order.
    async fn list_ids(&self) -> MigrateResult<Vec<MigrationId>>;

    /// Check if an artifact exists.
    async fn contains(&self, id: &MigrationId) -> MigrateResult<bool> {
        Ok(self.list_ids().await?.contains(id))
    }

    /// The artifact with the highest id, if any.
    async fn latest(&self) -> MigrateResult<Option<MigrationArtifact>> {
        match self.list_ids().await?.last() {
            Some(id) => Ok(Some(self.get(id).await?)),
            None => Ok(None),
        }
    }
}

/// Artifacts stored as `<dir>/<id>/migration.json`.
#[derive(Debug, Clone)]
pub struct FileRepository {
    dir: PathBuf,
}

impl FileRepository {
    /// Create a repository rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact file for `id`.
    pub fn artifact_path(&self, id: &MigrationId) -> PathBuf {
        self.dir.join(id.as_str()).join(ARTIFACT_FILE)
    }
}

#[async_trait::async_trait]
impl ArtifactRepository for FileRepository {
    async fn init(&self) -> MigrateResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn put(&self, artifact: &MigrationArtifact) -> MigrateResult<()> {
        self.init().await?;

        let migration_dir = self.dir.join(artifact.id.as_str());
        match tokio::fs::create_dir(&migration_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MigrationError::name_collision(artifact.id.as_str()));
            }
            Err(e) => return Err(e.into()),
        }

        store_or_discard(&migration_dir, artifact).await?;
        info!(migration = %artifact.id, path = %migration_dir.display(), "Wrote migration artifact");
        Ok(())
    }

    async fn get(&self, id: &MigrationId) -> MigrateResult<MigrationArtifact> {
        let path = self.artifact_path(id);
        let source = match tokio::fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(MigrationError::not_found(id.as_str()));
            }
            Err(e) => return Err(e.into()),
        };

        let artifact = MigrationArtifact::from_json(&source)?;
        if &artifact.id != id {
            return Err(MigrationError::invalid_artifact(
                id.as_str(),
                format!("file contains migration {}", artifact.id),
            ));
        }
        Ok(artifact)
    }

    async fn list_ids(&self) -> MigrateResult<Vec<MigrationId>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(id) = MigrationId::parse(&name) else {
                debug!(entry = %name, "Skipping non-migration directory");
                continue;
            };
            if tokio::fs::try_exists(entry.path().join(ARTIFACT_FILE)).await? {
                ids.push(id);
            } else {
                warn!(migration = %id, "Migration directory has no artifact file");
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn contains(&self, id: &MigrationId) -> MigrateResult<bool> {
        Ok(tokio::fs::try_exists(self.artifact_path(id)).await?)
    }
}

/// In-memory artifact storage.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    artifacts: Mutex<BTreeMap<MigrationId, MigrationArtifact>>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    /// Check if the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.artifacts.lock().is_empty()
    }

    /// Remove an artifact. Only useful to simulate a lost file.
    pub fn remove(&self, id: &MigrationId) -> Option<MigrationArtifact> {
        self.artifacts.lock().remove(id)
    }
}

#[async_trait::async_trait]
impl ArtifactRepository for MemoryRepository {
    async fn init(&self) -> MigrateResult<()> {
        Ok(())
    }

    async fn put(&self, artifact: &MigrationArtifact) -> MigrateResult<()> {
        let mut artifacts = self.artifacts.lock();
        if artifacts.contains_key(&artifact.id) {
            return Err(MigrationError::name_collision(artifact.id.as_str()));
        }
        artifacts.insert(artifact.id.clone(), artifact.clone());
        Ok(())
    }

    async fn get(&self, id: &MigrationId) -> MigrateResult<MigrationArtifact> {
        self.artifacts
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| MigrationError::not_found(id.as_str()))
    }

    async fn list_ids(&self) -> MigrateResult<Vec<MigrationId>> {
        Ok(self.artifacts.lock().keys().cloned().collect())
    }

    async fn contains(&self, id: &MigrationId) -> MigrateResult<bool> {
        Ok(self.artifacts.lock().contains_key(id))
    }
}

/// Write the artifact file into its fresh directory. On failure the
/// directory is removed so the id can be reused.
async fn store_or_discard(migration_dir: &Path, artifact: &MigrationArtifact) -> MigrateResult<()> {
    let result = store(migration_dir, artifact).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_dir_all(migration_dir).await {
            warn!(path = %migration_dir.display(), error = %e, "Failed to remove partial migration directory");
        }
    }
    result
}

async fn store(migration_dir: &Path, artifact: &MigrationArtifact) -> MigrateResult<()> {
    let json = artifact.to_json()?;
    let tmp_path = migration_dir.join(format!("{}.tmp", ARTIFACT_FILE));
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, migration_dir.join(ARTIFACT_FILE)).await?;
    Ok(())
}

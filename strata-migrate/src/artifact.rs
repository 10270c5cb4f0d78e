//! Migration identifiers and migration artifacts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strata_schema::Snapshot;

use crate::diff::SchemaDiff;
use crate::error::{MigrateResult, MigrationError};
use crate::operation::SchemaOperation;

const TIMESTAMP_LEN: usize = 14;
const COUNTER_LEN: usize = 3;
const PREFIX_LEN: usize = TIMESTAMP_LEN + COUNTER_LEN;
const MAX_COUNTER: u16 = 999;

/// Current on-disk artifact format.
pub const FORMAT_VERSION: u32 = 1;

/// A sortable migration identifier: `{YYYYMMDDHHMMSS}{NNN}_{name}`.
///
/// The 14-digit UTC timestamp and the 3-digit counter make ids sort in
/// creation order; the counter separates ids created within the same second.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId(String);

impl MigrationId {
    /// Generate the next id for `name`.
    ///
    /// If `latest` carries a timestamp at or after `now`, its timestamp is
    /// reused with the counter bumped so the new id still sorts last.
    pub fn next(
        name: &str,
        now: DateTime<Utc>,
        latest: Option<&MigrationId>,
    ) -> MigrateResult<Self> {
        let name = sanitize_name(name)?;
        let timestamp = now.format("%Y%m%d%H%M%S").to_string();

        let (timestamp, counter) = match latest {
            Some(latest) if latest.timestamp() >= timestamp.as_str() => {
                let counter = latest.counter() + 1;
                if counter > MAX_COUNTER {
                    return Err(MigrationError::name_collision(format!(
                        "{}{:03}_{}",
                        latest.timestamp(),
                        counter,
                        name
                    )));
                }
                (latest.timestamp().to_string(), counter)
            }
            _ => (timestamp, 0),
        };

        Ok(Self(format!("{}{:03}_{}", timestamp, counter, name)))
    }

    /// Parse and validate an id.
    pub fn parse(s: &str) -> MigrateResult<Self> {
        let invalid = || MigrationError::invalid_artifact(s, "not a valid migration id");

        if s.len() <= PREFIX_LEN + 1 || !s.is_char_boundary(PREFIX_LEN) {
            return Err(invalid());
        }
        let (prefix, rest) = s.split_at(PREFIX_LEN);
        if !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let name = rest.strip_prefix('_').ok_or_else(invalid)?;
        match sanitize_name(name) {
            Ok(clean) if clean == name => Ok(Self(s.to_string())),
            _ => Err(invalid()),
        }
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 14-digit timestamp part.
    pub fn timestamp(&self) -> &str {
        &self.0[..TIMESTAMP_LEN]
    }

    /// The same-second counter.
    pub fn counter(&self) -> u16 {
        self.0[TIMESTAMP_LEN..PREFIX_LEN].parse().unwrap_or(0)
    }

    /// The human name part.
    pub fn name(&self) -> &str {
        &self.0[PREFIX_LEN + 1..]
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MigrationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MigrationId {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.0
    }
}

/// Reduce a human name to ASCII alphanumerics and single underscores.
pub fn sanitize_name(name: &str) -> MigrateResult<String> {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return Err(MigrationError::InvalidName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

/// An immutable migration: forward and reverse operations plus the model
/// they produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationArtifact {
    /// Migration ID.
    pub id: MigrationId,
    /// When the migration was scaffolded.
    pub created_at: DateTime<Utc>,
    /// Forward operations.
    pub up: Vec<SchemaOperation>,
    /// Reverse operations.
    pub down: Vec<SchemaOperation>,
    /// Model after `up` is applied.
    pub snapshot: Snapshot,
    /// SHA-256 of the content, hex encoded.
    pub hash: String,
}

#[derive(Serialize)]
struct HashInput<'a> {
    id: &'a str,
    up: &'a [SchemaOperation],
    down: &'a [SchemaOperation],
    snapshot: &'a Snapshot,
}

#[derive(Serialize, Deserialize)]
struct ArtifactDocument {
    format_version: u32,
    id: MigrationId,
    created_at: DateTime<Utc>,
    hash: String,
    up: Vec<SchemaOperation>,
    down: Vec<SchemaOperation>,
    snapshot: Snapshot,
}

impl MigrationArtifact {
    /// Build an artifact from a diff and the resulting snapshot.
    pub fn new(
        id: MigrationId,
        created_at: DateTime<Utc>,
        diff: SchemaDiff,
        snapshot: Snapshot,
    ) -> MigrateResult<Self> {
        let hash = compute_hash(&id, &diff.up, &diff.down, &snapshot)?;
        Ok(Self {
            id,
            created_at,
            up: diff.up,
            down: diff.down,
            snapshot,
            hash,
        })
    }

    /// Recompute the hash and compare it with the stored one.
    pub fn verify_hash(&self) -> MigrateResult<()> {
        let actual = compute_hash(&self.id, &self.up, &self.down, &self.snapshot)?;
        if actual != self.hash {
            return Err(MigrationError::invalid_artifact(
                self.id.as_str(),
                format!("hash mismatch: stored {}, computed {}", self.hash, actual),
            ));
        }
        Ok(())
    }

    /// Encode for storage.
    pub fn to_json(&self) -> MigrateResult<String> {
        let doc = ArtifactDocument {
            format_version: FORMAT_VERSION,
            id: self.id.clone(),
            created_at: self.created_at,
            hash: self.hash.clone(),
            up: self.up.clone(),
            down: self.down.clone(),
            snapshot: self.snapshot.clone(),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Decode from storage, checking the format version and the hash.
    pub fn from_json(source: &str) -> MigrateResult<Self> {
        let value: serde_json::Value = serde_json::from_str(source)?;
        let version = value
            .get("format_version")
            .and_then(serde_json::Value::as_u64);
        let label = value
            .get("id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        if version != Some(u64::from(FORMAT_VERSION)) {
            return Err(MigrationError::invalid_artifact(
                label,
                format!("unsupported format version {:?}", version),
            ));
        }

        let doc: ArtifactDocument = serde_json::from_value(value)
            .map_err(|e| MigrationError::invalid_artifact(&label, e.to_string()))?;
        let artifact = Self {
            id: doc.id,
            created_at: doc.created_at,
            up: doc.up,
            down: doc.down,
            snapshot: doc.snapshot,
            hash: doc.hash,
        };
        artifact.verify_hash()?;
        Ok(artifact)
    }
}

fn compute_hash(
    id: &MigrationId,
    up: &[SchemaOperation],
    down: &[SchemaOperation],
    snapshot: &Snapshot,
) -> MigrateResult<String> {
    let canonical = serde_json::to_vec(&HashInput {
        id: id.as_str(),
        up,
        down,
        snapshot,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

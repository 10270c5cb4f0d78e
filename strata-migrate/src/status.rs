//! Listing migrations and detecting drift between repository and history.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{MigrateResult, MigrationError};
use crate::history::HistoryRecord;

/// An inconsistency between the artifact repository and the history store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Drift {
    /// Applied according to history, but no artifact exists.
    MissingArtifact { migration_id: String },
    /// The artifact changed after it was applied.
    HashMismatch {
        migration_id: String,
        recorded: String,
        actual: String,
    },
    /// A pending artifact sorts before the last applied migration.
    OutOfOrder {
        migration_id: String,
        last_applied: String,
    },
}

impl Drift {
    /// Migration this issue is about.
    pub fn migration_id(&self) -> &str {
        match self {
            Self::MissingArtifact { migration_id }
            | Self::HashMismatch { migration_id, .. }
            | Self::OutOfOrder { migration_id, .. } => migration_id,
        }
    }
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingArtifact { migration_id } => {
                write!(f, "{} is applied but has no artifact", migration_id)
            }
            Self::HashMismatch {
                migration_id,
                recorded,
                actual,
            } => write!(
                f,
                "{} was modified after it was applied (recorded {}, found {})",
                migration_id,
                short(recorded),
                short(actual)
            ),
            Self::OutOfOrder {
                migration_id,
                last_applied,
            } => write!(
                f,
                "{} is pending but older than the last applied migration {}",
                migration_id, last_applied
            ),
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// One line of the migration list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationEntry {
    /// Migration ID.
    pub id: String,
    /// Whether the history store records it as applied.
    pub applied: bool,
    /// When it was applied.
    pub applied_at: Option<DateTime<Utc>>,
    /// Whether the repository holds its artifact.
    pub in_repository: bool,
}

/// Union of repository and history, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// All known migrations.
    pub entries: Vec<MigrationEntry>,
    /// Detected inconsistencies.
    pub drift: Vec<Drift>,
}

impl MigrationStatus {
    /// Merge repository contents with history records.
    ///
    /// `artifacts` maps each repository id to its current content hash.
    pub fn from_parts(artifacts: &BTreeMap<String, String>, records: &[HistoryRecord]) -> Self {
        let applied: BTreeMap<&str, &HistoryRecord> = records
            .iter()
            .map(|r| (r.migration_id.as_str(), r))
            .collect();
        let last_applied = applied.keys().next_back().copied();

        let mut ids: Vec<&str> = artifacts
            .keys()
            .map(String::as_str)
            .chain(applied.keys().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let mut entries = Vec::with_capacity(ids.len());
        let mut drift = Vec::new();

        for id in ids {
            let record = applied.get(id);
            let hash = artifacts.get(id);

            match (record, hash) {
                (Some(_), None) => drift.push(Drift::MissingArtifact {
                    migration_id: id.to_string(),
                }),
                (Some(record), Some(hash)) if &record.hash != hash => {
                    drift.push(Drift::HashMismatch {
                        migration_id: id.to_string(),
                        recorded: record.hash.clone(),
                        actual: hash.clone(),
                    })
                }
                (None, Some(_)) => {
                    if let Some(last) = last_applied {
                        if id < last {
                            drift.push(Drift::OutOfOrder {
                                migration_id: id.to_string(),
                                last_applied: last.to_string(),
                            });
                        }
                    }
                }
                _ => {}
            }

            entries.push(MigrationEntry {
                id: id.to_string(),
                applied: record.is_some(),
                applied_at: record.map(|r| r.applied_at),
                in_repository: hash.is_some(),
            });
        }

        Self { entries, drift }
    }

    /// Entries not yet applied.
    pub fn pending(&self) -> impl Iterator<Item = &MigrationEntry> {
        self.entries.iter().filter(|e| !e.applied)
    }

    /// Entries already applied.
    pub fn applied(&self) -> impl Iterator<Item = &MigrationEntry> {
        self.entries.iter().filter(|e| e.applied)
    }

    /// Check whether repository and history agree.
    pub fn is_consistent(&self) -> bool {
        self.drift.is_empty()
    }

    /// Turn detected drift into an error.
    pub fn ensure_consistent(&self) -> MigrateResult<()> {
        if self.drift.is_empty() {
            Ok(())
        } else {
            Err(MigrationError::HistoryDrift {
                issues: self.drift.clone(),
            })
        }
    }
}

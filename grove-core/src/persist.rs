//! Local snapshot of progression state.
//!
//! A last-resort rehydration source for the next session start when the
//! remote store is unreachable. Never a source of truth: a successful
//! remote fetch always wins over the snapshot.

use crate::progression::ProgressionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use uuid::Uuid;

/// Errors from snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// A point-in-time copy of the user's progression state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub state: ProgressionState,
}

impl ProgressionSnapshot {
    pub fn new(user_id: Uuid, state: ProgressionState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            user_id,
            state,
        }
    }
}

/// Write a snapshot to disk.
pub async fn save_snapshot(
    path: impl AsRef<Path>,
    user_id: Uuid,
    state: &ProgressionState,
) -> Result<(), SnapshotError> {
    let snapshot = ProgressionSnapshot::new(user_id, state.clone());
    let content = serde_json::to_string_pretty(&snapshot)?;
    fs::write(path, content).await?;
    Ok(())
}

/// Read a snapshot back, rejecting incompatible versions.
pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<ProgressionSnapshot, SnapshotError> {
    let content = fs::read_to_string(path).await?;
    let snapshot: ProgressionSnapshot = serde_json::from_str(&content)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::VersionMismatch {
            expected: SNAPSHOT_VERSION,
            found: snapshot.version,
        });
    }
    Ok(snapshot)
}

//! Durable build state for kiln.
//!
//! This crate is the single-writer, crash-safe record of build progress: the
//! on-disk `StateDocument` with its atomic `StateStore`, content hashing in
//! `fingerprint`, the owner-identified lock file protocol in `lock`, and the
//! `Manager` that binds store and lock into a transactional session.

pub mod document;
pub mod fingerprint;
pub mod lock;
pub mod manager;
pub mod store;

pub use document::{
    ArtifactRecord, BuildRecord, BuildStatus, InstanceRecord, RunInfo, StateDocument, StepRecord,
    StepStatus, TemplateRecord, STATE_VERSION,
};
pub use lock::{force_unlock, LockGuard, LockRecord};
pub use manager::{default_state_path, Manager};
pub use store::StateStore;

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so a rename into it survives power loss.
///
/// POSIX leaves rename durability to the filesystem unless the containing
/// directory is synced; ext4 `data=ordered` usually gets away without it,
/// other filesystems do not.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt state file: {0}")]
    CorruptState(String),
    #[error("state is locked by {} (operation: {}, id: {}, created: {})",
        owner.as_deref().unwrap_or("unknown"),
        operation.as_deref().unwrap_or("unknown"),
        id.as_deref().unwrap_or("unknown"),
        created_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "unknown".to_owned()))]
    AlreadyLocked {
        owner: Option<String>,
        operation: Option<String>,
        id: Option<String>,
        created_at: Option<chrono::DateTime<chrono::Utc>>,
    },
    #[error("lock was taken over by {owner} (id: {id})")]
    LockStolen { owner: String, id: String },
    #[error("no state loaded; open the manager first")]
    NoSession,
    #[error("build not found in state: {0}")]
    NoSuchBuild(String),
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

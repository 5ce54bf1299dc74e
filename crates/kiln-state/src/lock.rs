//! Single-writer exclusion via an owner-identified lock file.
//!
//! For state path `P` the lock lives at `P.lock`. Acquisition is one
//! exclusive-create attempt; there is no waiting, no expiry, and no liveness
//! detection. An abandoned lock is recovered only by [`force_unlock`].

use crate::StateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// The JSON body written into the lock file, identifying the holder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockRecord {
    pub id: String,
    pub operation: String,
    pub who: String,
    pub created: DateTime<Utc>,
    /// The state path this lock guards.
    pub path: String,
}

/// Proof of exclusive ownership of one state path.
///
/// Holding a `&LockGuard` is how [`crate::StateStore::save`] knows the caller
/// went through acquisition; nothing else in the crate can mint one.
#[derive(Debug)]
pub struct LockGuard {
    lock_path: PathBuf,
    record: LockRecord,
}

pub(crate) fn lock_path_for(state_path: &Path) -> PathBuf {
    let mut os = state_path.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}

fn local_identity() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_owned());
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned());
    format!("{user}@{host}")
}

/// Build the `AlreadyLocked` error from whatever the existing lock body
/// yields. An unparseable or unreadable body still blocks acquisition; the
/// identity fields are simply absent.
fn holder_error(lock_path: &Path) -> StateError {
    let parsed = fs::read_to_string(lock_path)
        .ok()
        .and_then(|body| serde_json::from_str::<LockRecord>(&body).ok());
    match parsed {
        Some(rec) => StateError::AlreadyLocked {
            owner: Some(rec.who),
            operation: Some(rec.operation),
            id: Some(rec.id),
            created_at: Some(rec.created),
        },
        None => StateError::AlreadyLocked {
            owner: None,
            operation: None,
            id: None,
            created_at: None,
        },
    }
}

impl LockGuard {
    /// Single non-blocking acquisition attempt for `state_path`.
    pub fn acquire(state_path: &Path, operation: &str) -> Result<Self, StateError> {
        let lock_path = lock_path_for(state_path);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let record = LockRecord {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.to_owned(),
            who: local_identity(),
            created: Utc::now(),
            path: state_path.display().to_string(),
        };

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(holder_error(&lock_path));
            }
            Err(e) => return Err(e.into()),
        };

        let body = serde_json::to_string_pretty(&record)?;
        if let Err(e) = file
            .write_all(body.as_bytes())
            .and_then(|()| file.sync_all())
        {
            drop(file);
            let _ = fs::remove_file(&lock_path);
            return Err(e.into());
        }

        Ok(LockGuard { lock_path, record })
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Release the lock, verifying it is still ours first.
    ///
    /// A missing lock file is not an error. A body whose id differs from
    /// ours (including a body we can no longer parse) means someone replaced
    /// the lock out from under us: `LockStolen`, and the file is left alone.
    pub fn release(self) -> Result<(), StateError> {
        self.release_inner()
    }

    pub(crate) fn release_inner(&self) -> Result<(), StateError> {
        let body = match fs::read_to_string(&self.lock_path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<LockRecord>(&body) {
            Ok(rec) if rec.id == self.record.id => {}
            Ok(rec) => {
                return Err(StateError::LockStolen {
                    owner: rec.who,
                    id: rec.id,
                })
            }
            Err(_) => {
                return Err(StateError::LockStolen {
                    owner: "unknown".to_owned(),
                    id: "unknown".to_owned(),
                })
            }
        }

        match fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Unconditionally remove the lock file for `state_path`.
///
/// The only supported recovery from a lock left behind by a dead process.
pub fn force_unlock(state_path: &Path) -> Result<(), StateError> {
    match fs::remove_file(lock_path_for(state_path)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

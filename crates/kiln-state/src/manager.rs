//! Transactional session over one state path: lock + store, opened together,
//! released together.

use crate::document::{RunInfo, StateDocument, TemplateRecord};
use crate::lock::LockGuard;
use crate::store::StateStore;
use crate::StateError;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default state file location relative to the template's directory.
pub fn default_state_path(template_dir: &Path) -> PathBuf {
    template_dir.join(".kiln").join("builder-state.json")
}

/// Binds a [`StateStore`] and a [`LockGuard`] into a session.
///
/// The session is the only way to reach a mutable document, and its guard is
/// the only way to reach [`StateStore::save`], so every durable write happens
/// under the lock. One manager per state path per process; a manager is not
/// thread-safe and callers sharing one across threads must serialize access.
pub struct Manager {
    store: StateStore,
    lock: Option<LockGuard>,
    doc: Option<StateDocument>,
    dirty: bool,
}

impl Manager {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Manager {
            store: StateStore::new(state_path),
            lock: None,
            doc: None,
            dirty: false,
        }
    }

    pub fn state_path(&self) -> &Path {
        self.store.path()
    }

    pub fn is_open(&self) -> bool {
        self.doc.is_some()
    }

    /// Acquire the lock and load the document, with operation label "build".
    pub fn open(&mut self) -> Result<(), StateError> {
        self.open_as("build")
    }

    /// Acquire the lock and load the document under a caller-chosen
    /// operation label. If no state file exists, a fresh document is
    /// synthesized (new lineage, serial 1). If the load fails after the lock
    /// was taken, the lock is released before the error propagates.
    pub fn open_as(&mut self, operation: &str) -> Result<(), StateError> {
        let guard = LockGuard::acquire(self.store.path(), operation)?;

        let doc = match self.store.load() {
            Ok(Some(doc)) => doc,
            Ok(None) => StateDocument::new(""),
            Err(e) => {
                if let Err(release_err) = guard.release() {
                    warn!("failed to release lock after load error: {release_err}");
                }
                return Err(e);
            }
        };

        self.lock = Some(guard);
        self.doc = Some(doc);
        self.dirty = false;
        Ok(())
    }

    pub fn document(&self) -> Result<&StateDocument, StateError> {
        self.doc.as_ref().ok_or(StateError::NoSession)
    }

    /// Mutable access to the document; marks the session dirty so a later
    /// [`Manager::close`] flushes it.
    pub fn document_mut(&mut self) -> Result<&mut StateDocument, StateError> {
        self.dirty = true;
        self.doc.as_mut().ok_or(StateError::NoSession)
    }

    /// Durably write the current document. Must only be called while the
    /// session is open (the lock is held for exactly that window).
    pub fn save(&mut self) -> Result<(), StateError> {
        let doc = self.doc.as_mut().ok_or(StateError::NoSession)?;
        let lock = self.lock.as_ref().ok_or(StateError::NoSession)?;
        self.store.save(doc, lock)?;
        self.dirty = false;
        Ok(())
    }

    /// Save only if the document has unsaved mutations. The cheap form of
    /// a checkpoint: callers can flush at every durability boundary without
    /// burning a serial when nothing changed.
    pub fn flush(&mut self) -> Result<(), StateError> {
        if self.doc.is_some() && self.dirty {
            self.save()?;
        }
        Ok(())
    }

    /// True if any of the given inputs differ from the loaded template
    /// record. Absence of a key differs from any present value, including
    /// the empty string; comparison is by content, not cardinality alone.
    pub fn inputs_changed(
        &self,
        template_hash: &str,
        variables: &BTreeMap<String, String>,
        files: &BTreeMap<String, String>,
    ) -> bool {
        let Some(doc) = self.doc.as_ref() else {
            return true;
        };
        doc.template.hash != template_hash
            || doc.template.variables != *variables
            || doc.template.files != *files
    }

    /// Overwrite the template record with the current inputs. Never saves;
    /// the caller decides when the change becomes durable.
    pub fn update_template_inputs(
        &mut self,
        template_path: &str,
        template_hash: &str,
        variables: BTreeMap<String, String>,
        files: BTreeMap<String, String>,
    ) -> Result<(), StateError> {
        let doc = self.document_mut()?;
        doc.template = TemplateRecord {
            path: template_path.to_owned(),
            hash: template_hash.to_owned(),
            variables,
            files,
        };
        Ok(())
    }

    /// Start a `last_run` entry for this session.
    pub fn record_run_start(&mut self) -> Result<(), StateError> {
        let doc = self.document_mut()?;
        doc.last_run = Some(RunInfo {
            started_at: Utc::now(),
            completed_at: None,
        });
        Ok(())
    }

    /// Stamp the current `last_run` entry as completed.
    pub fn record_run_completed(&mut self) -> Result<(), StateError> {
        let doc = self.document_mut()?;
        if let Some(run) = doc.last_run.as_mut() {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Flush pending changes, then release the lock.
    pub fn close(mut self) -> Result<(), StateError> {
        self.flush()?;
        self.release()
    }

    /// Release the lock without saving; in-memory changes are discarded.
    pub fn unlock(mut self) -> Result<(), StateError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), StateError> {
        self.doc = None;
        match self.lock.take() {
            Some(guard) => guard.release(),
            None => Ok(()),
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if let Some(guard) = self.lock.take() {
            if let Err(e) = guard.release() {
                warn!("failed to release state lock on drop: {e}");
            }
        }
    }
}

//! On-disk representation of the state document.
//!
//! The store owns exactly one contract: a reader opening the state path at
//! any instant sees either the complete previous document or the complete
//! next one. Writes go to a sibling temp file, are synced, and are renamed
//! into place; the rename is the linearization point.

use crate::document::{StateDocument, STATE_VERSION};
use crate::lock::LockGuard;
use crate::{fsync_dir, StateError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, `None` if no file exists at the path.
    ///
    /// Anything else that prevents producing a valid document (unreadable
    /// bytes, truncated or empty JSON, a schema version we do not know) is
    /// `CorruptState`. Refusing to load beats silently rebuilding over a
    /// file some other version of the tool wrote.
    pub fn load(&self) -> Result<Option<StateDocument>, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let doc: StateDocument = serde_json::from_str(&content)
            .map_err(|e| StateError::CorruptState(e.to_string()))?;

        if doc.version != STATE_VERSION {
            return Err(StateError::CorruptState(format!(
                "unsupported state version {} (expected {})",
                doc.version, STATE_VERSION
            )));
        }

        Ok(Some(doc))
    }

    /// Durably write the document, bumping `serial` by exactly one.
    ///
    /// The `&LockGuard` parameter is compile-time proof that the caller holds
    /// the lock on this state path; concurrent bare saves are how state files
    /// get corrupted. On any failure the temp file is discarded, the file at
    /// the path is untouched, and the in-memory `serial` is rolled back.
    pub fn save(&self, doc: &mut StateDocument, _lock: &LockGuard) -> Result<(), StateError> {
        doc.serial += 1;
        if let Err(e) = self.write_document(doc) {
            doc.serial -= 1;
            return Err(e);
        }
        Ok(())
    }

    fn write_document(&self, doc: &StateDocument) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        self.sweep_orphaned_temps(&dir);

        let content = serde_json::to_string_pretty(doc)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&self.temp_prefix())
            .tempfile_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StateError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }

    fn temp_prefix(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_owned());
        format!(".{name}.tmp.")
    }

    /// Remove temp files a crashed save left behind. Best effort: a sweep
    /// failure never blocks the save that triggered it.
    fn sweep_orphaned_temps(&self, dir: &Path) {
        let prefix = self.temp_prefix();
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) {
                debug!("removing orphaned temp file {:?}", entry.path());
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{BuildRecord, BuildStatus};

    fn locked_store(dir: &Path) -> (StateStore, LockGuard) {
        let path = dir.join("builder-state.json");
        let guard = LockGuard::acquire(&path, "test").unwrap();
        (StateStore::new(path), guard)
    }

    fn empty_build(name: &str) -> BuildRecord {
        BuildRecord {
            name: name.to_owned(),
            build_type: "null".to_owned(),
            status: BuildStatus::Pending,
            instance: None,
            provisioners: Vec::new(),
            post_processors: Vec::new(),
            artifacts: Vec::new(),
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_roundtrips_with_serial_bump() {
        let dir = tempfile::tempdir().unwrap();
        let (store, guard) = locked_store(dir.path());

        let mut doc = StateDocument::new("/t");
        doc.set_build("b", empty_build("b"));
        store.save(&mut doc, &guard).unwrap();
        assert_eq!(doc.serial, 2);

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, doc);
        guard.release().unwrap();
    }

    #[test]
    fn serial_increments_by_one_per_save() {
        let dir = tempfile::tempdir().unwrap();
        let (store, guard) = locked_store(dir.path());

        let mut doc = StateDocument::new("/t");
        for expected in 2..=10u64 {
            store.save(&mut doc, &guard).unwrap();
            assert_eq!(doc.serial, expected);
            assert_eq!(store.load().unwrap().unwrap().serial, expected);
        }
        guard.release().unwrap();
    }

    #[test]
    fn lineage_preserved_across_saves() {
        let dir = tempfile::tempdir().unwrap();
        let (store, guard) = locked_store(dir.path());

        let mut doc = StateDocument::new("/t");
        let lineage = doc.lineage.clone();
        store.save(&mut doc, &guard).unwrap();
        doc.set_build("b", empty_build("b"));
        store.save(&mut doc, &guard).unwrap();

        assert_eq!(store.load().unwrap().unwrap().lineage, lineage);
        guard.release().unwrap();
    }

    #[test]
    fn empty_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "").unwrap();
        let err = StateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::CorruptState(_)), "{err:?}");
    }

    #[test]
    fn truncated_json_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let (store, guard) = locked_store(dir.path());
        let mut doc = StateDocument::new("/t");
        store.save(&mut doc, &guard).unwrap();
        guard.release().unwrap();

        let full = fs::read_to_string(store.path()).unwrap();
        fs::write(store.path(), &full[..full.len() / 2]).unwrap();
        assert!(matches!(
            store.load().unwrap_err(),
            StateError::CorruptState(_)
        ));
    }

    #[test]
    fn null_bytes_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"\0\0\0\0").unwrap();
        assert!(matches!(
            StateStore::new(&path).load().unwrap_err(),
            StateError::CorruptState(_)
        ));
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let (store, guard) = locked_store(dir.path());
        let mut doc = StateDocument::new("/t");
        store.save(&mut doc, &guard).unwrap();
        guard.release().unwrap();

        let mut raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        raw["version"] = serde_json::json!(99);
        fs::write(store.path(), serde_json::to_string_pretty(&raw).unwrap()).unwrap();

        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("version 99"), "{err}");
    }

    #[test]
    fn save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".kiln").join("builder-state.json");
        let guard = LockGuard::acquire(&path, "test").unwrap();
        let store = StateStore::new(&path);
        let mut doc = StateDocument::new("/t");
        store.save(&mut doc, &guard).unwrap();
        assert!(path.exists());
        guard.release().unwrap();
    }

    #[test]
    fn failed_save_leaves_file_and_serial_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (store, guard) = locked_store(dir.path());
        let mut doc = StateDocument::new("/t");
        store.save(&mut doc, &guard).unwrap();
        let on_disk = fs::read_to_string(store.path()).unwrap();
        let serial = doc.serial;

        // Replace the state path with a directory so the rename must fail.
        let blocked = StateStore::new(dir.path().to_path_buf());
        assert!(blocked.save(&mut doc, &guard).is_err());
        assert_eq!(doc.serial, serial, "serial must not advance on failure");
        assert_eq!(fs::read_to_string(store.path()).unwrap(), on_disk);
        guard.release().unwrap();
    }

    #[test]
    fn orphaned_temp_files_are_swept_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let (store, guard) = locked_store(dir.path());
        let orphan = dir.path().join(".builder-state.json.tmp.deadbeef");
        fs::write(&orphan, "{}").unwrap();

        let mut doc = StateDocument::new("/t");
        store.save(&mut doc, &guard).unwrap();
        assert!(!orphan.exists());
        guard.release().unwrap();
    }

    #[test]
    fn saved_file_is_two_space_indented_json() {
        let dir = tempfile::tempdir().unwrap();
        let (store, guard) = locked_store(dir.path());
        let mut doc = StateDocument::new("/t");
        store.save(&mut doc, &guard).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.starts_with("{\n  \"version\""));
        assert!(content.ends_with("}\n"));
        guard.release().unwrap();
    }
}

//! File-backed session record persistence.
//!
//! One JSON file per session id under `<project>/.claude/kamui-sessions/`.
//!
//! # Atomic Writes
//!
//! `save` writes to a temp file in the same directory, syncs it, then renames
//! it over `<id>.json`. A reader sees either the previous record or the new
//! one, never a partial file. If the rename fails the temp file is removed.
//!
//! # Concurrency
//!
//! `save` on its own is last-writer-wins. Callers that load, modify and save
//! wrap the cycle in a [`SessionLock`](super::lock::SessionLock).
//!
//! # Corruption
//!
//! A record that fails to parse is reported as `SessionCorrupted` and left on
//! disk untouched.

use std::io::Write;
use std::path::PathBuf;

use fs_err as fs;
use tempfile::{Builder, NamedTempFile};

use crate::error::{KamuiError, Result};
use crate::storage::{StorageConfig, RECORD_EXTENSION};
use crate::types::{validate_session_id, SessionRecord};

#[derive(Debug, Clone)]
pub struct MetadataStore {
    storage: StorageConfig,
}

impl MetadataStore {
    pub fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.storage.sessions_dir()
    }

    /// Creates the sessions directory (owner-only) if needed.
    pub fn initialize(&self) -> Result<()> {
        let dir = self.storage.sessions_dir();
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(&dir)
            .map_err(|e| KamuiError::storage("failed to create sessions directory", &dir, e))
    }

    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        validate_session_id(&record.session_id)?;
        self.initialize()?;

        let dir = self.storage.sessions_dir();
        let final_path = self.storage.session_file(&record.session_id);

        let content =
            serde_json::to_vec_pretty(record).map_err(|e| KamuiError::StorageCorrupted {
                context: format!("failed to serialize session '{}'", record.session_id),
                source: e,
            })?;

        // NamedTempFile is created with 0600 on unix, which the rename preserves.
        let mut temp_file = Builder::new()
            .prefix(&format!(".{}.", record.session_id))
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| KamuiError::storage("failed to create temp file", &dir, e))?;
        if let Err(e) = write_synced(&mut temp_file, &content) {
            return Err(KamuiError::storage(
                "failed to write session file",
                temp_file.path(),
                e,
            ));
        }

        temp_file.persist(&final_path).map_err(|e| {
            // Dropping the returned handle deletes the temp file.
            let tempfile::PersistError { error, file } = e;
            drop(file);
            KamuiError::storage("failed to save session file", &final_path, error)
        })?;

        tracing::debug!(
            session = %record.session_id,
            path = %final_path.display(),
            "Session record saved"
        );
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<SessionRecord> {
        validate_session_id(session_id)?;
        let path = self.storage.session_file(session_id);

        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KamuiError::SessionNotFound {
                    id: session_id.to_string(),
                    path,
                })
            }
            Err(e) => return Err(KamuiError::storage("failed to read session file", &path, e)),
        };

        serde_json::from_slice(&content).map_err(|e| KamuiError::SessionCorrupted {
            id: session_id.to_string(),
            path,
            source: e,
        })
    }

    pub fn exists(&self, session_id: &str) -> bool {
        validate_session_id(session_id).is_ok() && self.storage.session_file(session_id).is_file()
    }

    /// Returns all stored session ids, sorted. Empty if the directory doesn't exist yet.
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.storage.sessions_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(KamuiError::storage(
                    "failed to read sessions directory",
                    &dir,
                    e,
                ))
            }
        };

        let mut ids: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == RECORD_EXTENSION) {
                    path.file_stem().map(|s| s.to_string_lossy().to_string())
                } else {
                    None
                }
            })
            .filter(|id| validate_session_id(id).is_ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn delete(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;
        let path = self.storage.session_file(session_id);

        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(session = %session_id, "Session record deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(KamuiError::SessionNotFound {
                id: session_id.to_string(),
                path,
            }),
            Err(e) => Err(KamuiError::storage("failed to delete session file", &path, e)),
        }
    }
}

fn write_synced(file: &mut NamedTempFile, content: &[u8]) -> std::io::Result<()> {
    file.write_all(content)?;
    file.flush()?;
    file.as_file().sync_all()
}

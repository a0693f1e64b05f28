//! Read-only enumeration of Claude Code transcripts for a working directory.
//!
//! ```text
//! ~/.claude/projects/
//!   -Users-you-project-a/
//!     abc12345-1234-1234-1234-123456789abc.jsonl
//!     def45678-5678-5678-5678-567890123def.jsonl
//! ```
//!
//! The working directory is canonicalized before encoding, so a symlinked path
//! and its target see the same transcripts. Listing order is whatever the
//! filesystem returns; treat results as a set.

use std::path::PathBuf;
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::{KamuiError, Result};
use crate::path_utils::canonical_working_dir;
use crate::storage::{StorageConfig, TRANSCRIPT_EXTENSION};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// External session id (file stem).
    pub id: String,
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct TranscriptScanner {
    storage: StorageConfig,
}

impl TranscriptScanner {
    pub fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }

    /// Directory Claude Code uses for transcripts started in `working_dir`.
    pub fn transcript_dir(&self, working_dir: &str) -> PathBuf {
        self.storage
            .transcript_dir(&canonical_working_dir(working_dir))
    }

    pub fn transcript_path(&self, working_dir: &str, external_id: &str) -> PathBuf {
        self.storage
            .transcript_file(&canonical_working_dir(working_dir), external_id)
    }

    pub fn transcript_exists(&self, working_dir: &str, external_id: &str) -> bool {
        !external_id.is_empty() && self.transcript_path(working_dir, external_id).is_file()
    }

    /// Lists transcripts for `working_dir`. A missing directory is an empty list.
    pub fn list_transcripts(&self, working_dir: &str) -> Result<Vec<TranscriptEntry>> {
        let dir = self.transcript_dir(working_dir);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                    return Err(KamuiError::io(
                        format!("scanning transcripts in {}", dir.display()),
                        source,
                    ));
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable transcript entry");
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file()
                || !path.extension().is_some_and(|e| e == TRANSCRIPT_EXTENSION)
            {
                continue;
            }
            let Some(id) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };

            entries.push(TranscriptEntry {
                id,
                path: path.to_path_buf(),
                modified: entry.metadata().ok().and_then(|m| m.modified().ok()),
            });
        }

        Ok(entries)
    }

}

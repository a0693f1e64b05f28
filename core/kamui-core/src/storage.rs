//! Storage configuration and path management for Kamui.
//!
//! `StorageConfig` owns every path decision: where session records live, where
//! lock directories go, and where Claude Code keeps its transcripts.
//!
//! ## Layout
//!
//! ```text
//! <project>/.claude/kamui-sessions/
//! ├── Tasks.json              # one SessionRecord per file
//! └── locks/Tasks.lock/       # advisory lock held during load-modify-save
//!
//! ~/.claude/projects/-Users-pete-Code-app/
//! └── 5f0c...e2.jsonl         # Claude-owned transcripts (read, edited once)
//!
//! ~/.kamui/
//! ├── config.json
//! └── logs/
//! ```
//!
//! Tests use `StorageConfig::with_roots(project, claude_root)` with temp
//! directories.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{KamuiError, Result};

pub const SESSIONS_DIR_NAME: &str = "kamui-sessions";
pub const TRANSCRIPT_EXTENSION: &str = "jsonl";
pub const RECORD_EXTENSION: &str = "json";

/// Kamui's own global directory (~/.kamui): config file and logs.
pub fn kamui_home_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".kamui"))
}

/// Central configuration for all Kamui storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Project this store is scoped to.
    project_root: PathBuf,
    /// Root directory for Claude Code data (default: ~/.claude, or $KAMUI_CLAUDE_ROOT)
    claude_root: PathBuf,
}

impl StorageConfig {
    /// Resolves the production layout for a project.
    pub fn for_project(project_root: &Path) -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            KamuiError::io(
                "resolving home directory",
                std::io::Error::new(std::io::ErrorKind::NotFound, "home directory not found"),
            )
        })?;
        let claude_root = env::var_os("KAMUI_CLAUDE_ROOT")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".claude"));

        Ok(Self {
            project_root: project_root.to_path_buf(),
            claude_root,
        })
    }

    /// Creates a StorageConfig with explicit roots.
    /// Used for testing with temp directories.
    pub fn with_roots(project_root: PathBuf, claude_root: PathBuf) -> Self {
        Self {
            project_root,
            claude_root,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn claude_root(&self) -> &Path {
        &self.claude_root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Session Records
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to the per-project sessions directory.
    pub fn sessions_dir(&self) -> PathBuf {
        self.project_root.join(".claude").join(SESSIONS_DIR_NAME)
    }

    /// Path to a session's record file.
    pub fn session_file(&self, session_id: &str) -> PathBuf {
        self.sessions_dir()
            .join(format!("{}.{}", session_id, RECORD_EXTENSION))
    }

    /// Path to the directory holding advisory lock directories.
    pub fn locks_dir(&self) -> PathBuf {
        self.sessions_dir().join("locks")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Claude Code Paths
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to Claude Code's projects directory (JSONL transcripts).
    pub fn claude_projects_dir(&self) -> PathBuf {
        self.claude_root.join("projects")
    }

    /// Directory holding transcripts for an already-canonical working directory.
    /// Example: ~/.claude/projects/-Users-pete-Code-my-project/
    pub fn transcript_dir(&self, canonical_working_dir: &str) -> PathBuf {
        self.claude_projects_dir()
            .join(Self::encode_path(canonical_working_dir))
    }

    pub fn transcript_file(&self, canonical_working_dir: &str, external_id: &str) -> PathBuf {
        self.transcript_dir(canonical_working_dir)
            .join(format!("{}.{}", external_id, TRANSCRIPT_EXTENSION))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Path Encoding
    // ─────────────────────────────────────────────────────────────────────────────

    /// Encodes a filesystem path the way Claude Code names its project directories.
    /// Replaces `/` with `-`.
    /// Example: `/Users/pete/Code/my-project` -> `-Users-pete-Code-my-project`
    pub fn encode_path(path: &str) -> String {
        path.replace('/', "-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StorageConfig {
        StorageConfig::with_roots(PathBuf::from("/work/app"), PathBuf::from("/tmp/claude"))
    }

    #[test]
    fn test_session_file_path() {
        assert_eq!(
            config().session_file("Tasks"),
            PathBuf::from("/work/app/.claude/kamui-sessions/Tasks.json")
        );
    }

    #[test]
    fn test_locks_dir_is_inside_sessions_dir() {
        assert_eq!(
            config().locks_dir(),
            PathBuf::from("/work/app/.claude/kamui-sessions/locks")
        );
    }

    #[test]
    fn test_transcript_file_path() {
        assert_eq!(
            config().transcript_file("/work/app", "abc"),
            PathBuf::from("/tmp/claude/projects/-work-app/abc.jsonl")
        );
    }

    #[test]
    fn test_encode_path_replaces_slashes() {
        assert_eq!(
            StorageConfig::encode_path("/Users/pete/Code/my-project"),
            "-Users-pete-Code-my-project"
        );
        assert_eq!(StorageConfig::encode_path("/"), "-");
    }
}

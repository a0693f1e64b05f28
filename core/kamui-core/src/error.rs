//! Error types for kamui-core operations.
//!
//! Every variant carries enough context (session id, path) to diagnose a failure
//! from the message alone. `code()` is stable and safe to match on in scripts.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;

use crate::types::LifecycleState;

/// Why a discovery cycle could not bind a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryFailure {
    /// The external process exited without leaving a new transcript behind.
    NoNewTranscript,
    /// Polling reached its deadline without observing a new transcript.
    Timeout,
    /// The caller cancelled polling before a transcript appeared.
    Cancelled,
}

impl fmt::Display for DiscoveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryFailure::NoNewTranscript => write!(f, "no new transcript created"),
            DiscoveryFailure::Timeout => write!(f, "timeout"),
            DiscoveryFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// All errors that can occur in kamui-core operations.
#[derive(Debug, thiserror::Error)]
pub enum KamuiError {
    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage access failed: {context}: {path}: {source}")]
    StoragePermission {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage serialization failed: {context}: {source}")]
    StorageCorrupted {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Session '{id}' not found at {path}")]
    SessionNotFound { id: String, path: PathBuf },

    #[error("Session '{id}' is corrupted at {path}: {source}")]
    SessionCorrupted {
        id: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Session '{id}' is locked by another process ({path})")]
    SessionLocked { id: String, path: PathBuf },

    #[error("Invalid session name '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidSessionId(String),

    #[error("Session '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Discovery / External Process Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Transcript discovery failed in {working_dir}: {reason}")]
    DiscoveryFailed {
        working_dir: PathBuf,
        reason: DiscoveryFailure,
    },

    #[error("Claude executable unavailable ({binary}): {reason}")]
    ExternalProcessUnavailable { binary: String, reason: String },

    #[error("Command failed: {command}: {status}")]
    ExternalProcessFailed { command: String, status: ExitStatus },

    #[error("Transcript not found: {0}")]
    TranscriptNotFound(PathBuf),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration / Project Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Project path does not exist: {0}")]
    ProjectNotFound(PathBuf),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl KamuiError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        KamuiError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn storage(
        context: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        KamuiError::StoragePermission {
            context: context.into(),
            path: path.into(),
            source,
        }
    }

    pub fn discovery(working_dir: impl Into<PathBuf>, reason: DiscoveryFailure) -> Self {
        KamuiError::DiscoveryFailed {
            working_dir: working_dir.into(),
            reason,
        }
    }

    /// Stable identifier for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            KamuiError::StoragePermission { .. } => "STORAGE_PERMISSION",
            KamuiError::StorageCorrupted { .. } => "STORAGE_CORRUPTED",
            KamuiError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            KamuiError::SessionCorrupted { .. } => "SESSION_CORRUPTED",
            KamuiError::SessionLocked { .. } => "SESSION_LOCKED",
            KamuiError::InvalidSessionId(_) => "INVALID_INPUT",
            KamuiError::InvalidTransition { .. } => "SESSION_INVALID",
            KamuiError::DiscoveryFailed {
                reason: DiscoveryFailure::Timeout,
                ..
            } => "CLAUDE_TIMEOUT",
            KamuiError::DiscoveryFailed { .. } => "DISCOVERY_FAILED",
            KamuiError::ExternalProcessUnavailable { .. } => "CLAUDE_NOT_FOUND",
            KamuiError::ExternalProcessFailed { .. } => "CLAUDE_COMMAND_FAILED",
            KamuiError::TranscriptNotFound(_) => "CLAUDE_SESSION_NOT_FOUND",
            KamuiError::ConfigMalformed { .. } => "CONFIG_INVALID",
            KamuiError::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            KamuiError::Io { .. } => "IO",
        }
    }

    /// True when retrying the same operation later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            KamuiError::SessionLocked { .. }
                | KamuiError::DiscoveryFailed {
                    reason: DiscoveryFailure::Timeout,
                    ..
                }
        )
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            KamuiError::StoragePermission { .. } => {
                "Check file permissions for the .claude/kamui-sessions directory"
            }
            KamuiError::SessionCorrupted { .. } => {
                "Session data may be corrupted; delete it and create a new session"
            }
            KamuiError::SessionLocked { .. } => {
                "Wait for the other kam process to finish or remove the stale lock directory"
            }
            KamuiError::ExternalProcessUnavailable { .. } => {
                "Install Claude Code CLI or set KAMUI_CLAUDE_PATH"
            }
            KamuiError::DiscoveryFailed { .. } => {
                "Run the command again; check that claude can start in this directory"
            }
            KamuiError::ConfigMalformed { .. } => "Check configuration file syntax and values",
            KamuiError::InvalidSessionId(_) => "Pick a session name without spaces or slashes",
            _ => "Check the error message for specific details",
        }
    }
}

/// Convenience type alias for Results using KamuiError.
pub type Result<T> = std::result::Result<T, KamuiError>;

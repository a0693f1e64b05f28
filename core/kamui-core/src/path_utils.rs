//! Path normalization for consistent transcript lookup.
//!
//! Claude Code names its project directories after the directory it was started
//! in, after symlink resolution. Two surface paths that point at the same
//! directory must therefore map to the same transcript directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{KamuiError, Result};

/// Canonicalizes `path` for transcript lookup.
///
/// 1. Resolves symlinks when the path exists; otherwise keeps the input as-is.
/// 2. Strips trailing slashes (except for root "/").
///
/// Never fails.
pub fn canonical_working_dir(path: &str) -> String {
    let resolved = resolve_symlinks(path);
    strip_trailing_slashes(&resolved)
}

/// Resolves a project root to an absolute, symlink-free directory path.
pub fn resolve_project_root(path: &Path) -> Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(resolved) if resolved.is_dir() => Ok(resolved),
        _ => Err(KamuiError::ProjectNotFound(path.to_path_buf())),
    }
}

fn resolve_symlinks(path: &str) -> String {
    match fs::canonicalize(Path::new(path)) {
        Ok(resolved) => resolved.to_string_lossy().to_string(),
        Err(_) => path.to_string(),
    }
}

fn strip_trailing_slashes(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

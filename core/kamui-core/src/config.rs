//! Configuration loading.
//!
//! Reads `~/.kamui/config.json`. A missing file yields defaults; a file that
//! exists but does not parse is an error rather than being silently replaced.
//! `KAMUI_CLAUDE_PATH` overrides `claude.binary`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::{KamuiError, Result};
use crate::storage::kamui_home_dir;

pub const DEFAULT_SENTINEL: &str = "KAMUI_INIT_MESSAGE";

/// How to choose when several transcripts appear between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TieBreak {
    /// Most recently modified transcript; equal mtimes fall back to the greatest id.
    #[default]
    NewestModified,
    /// First new entry in directory-listing order.
    ScanOrder,
}

/// How an unbound session gets its transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum DiscoveryMode {
    /// Run claude once with a throwaway message before the interactive launch.
    #[default]
    Blocking,
    /// Launch interactively and let a background watcher bind the transcript.
    Monitor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaudeConfig {
    /// Explicit path to the claude executable. `None` means search `PATH`.
    pub binary: Option<PathBuf>,
    /// Extra arguments passed to every interactive launch.
    pub default_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryConfig {
    pub settle_ms: u64,
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
    pub tie_break: TieBreak,
    pub sentinel: String,
    pub mode: DiscoveryMode,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            settle_ms: 1000,
            poll_interval_ms: 500,
            timeout_secs: 60,
            tie_break: TieBreak::default(),
            sentinel: DEFAULT_SENTINEL.to_string(),
            mode: DiscoveryMode::default(),
        }
    }
}

impl DiscoveryConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Hard ceiling on how long the watcher may outlive the interactive session.
    pub ceiling_secs: u64,
    /// Delay between spawning the watcher and launching claude, so the
    /// watcher's baseline predates claude's first write.
    pub startup_grace_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ceiling_secs: 30,
            startup_grace_ms: 250,
        }
    }
}

impl MonitorConfig {
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LockConfig {
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct KamuiConfig {
    pub claude: ClaudeConfig,
    pub discovery: DiscoveryConfig,
    pub monitor: MonitorConfig,
    pub lock: LockConfig,
}

/// Returns the default configuration path (~/.kamui/config.json).
pub fn default_config_path() -> Option<PathBuf> {
    kamui_home_dir().map(|h| h.join("config.json"))
}

/// Loads configuration from `path`, falling back to defaults when it doesn't exist.
pub fn load_config(path: &Path) -> Result<KamuiConfig> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => KamuiConfig::default(),
        Ok(content) => {
            serde_json::from_str(&content).map_err(|e| KamuiError::ConfigMalformed {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            KamuiConfig::default()
        }
        Err(e) => return Err(KamuiError::io("reading config file", e)),
    };

    config.apply_env_overrides();
    Ok(config)
}

impl KamuiConfig {
    fn apply_env_overrides(&mut self) {
        if let Some(binary) = env::var_os("KAMUI_CLAUDE_PATH").filter(|v| !v.is_empty()) {
            self.claude.binary = Some(PathBuf::from(binary));
        }
    }
}

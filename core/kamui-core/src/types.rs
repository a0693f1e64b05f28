//! Core types for kamui session records.
//!
//! Records are stored one per file as camelCase JSON. `version` is carried
//! through untouched; there is no migration step.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KamuiError, Result};

pub const RECORD_VERSION: &str = "1.0.0";

static SESSION_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("valid regex"));

/// Rejects ids that are not safe to use verbatim as a file name component.
pub fn validate_session_id(id: &str) -> Result<()> {
    if SESSION_ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(KamuiError::InvalidSessionId(id.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Active,
    Paused,
    Completed,
    Archived,
    Error,
}

impl LifecycleState {
    /// Returns true if the state machine allows `self -> to`.
    pub fn can_transition_to(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, to) {
            (_, Archived) | (_, Error) => true,
            (Active, Completed) | (Paused, Completed) => true,
            (Active, Paused) | (Paused, Active) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Active => "active",
            LifecycleState::Paused => "paused",
            LifecycleState::Completed => "completed",
            LifecycleState::Archived => "archived",
            LifecycleState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: LifecycleState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_data: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Number of create/resume calls that touched this record.
    #[serde(default)]
    pub session_count: u32,
    /// Number of times a transcript was (re)bound.
    #[serde(default)]
    pub discovery_count: u32,
}

/// One local session, persisted as `<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub version: String,
    pub session_id: String,
    pub created: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub project_path: String,
    #[serde(default)]
    pub project_name: String,
    pub working_directory: String,
    #[serde(default)]
    pub external_session_id: String,
    #[serde(default)]
    pub bound_at: Option<DateTime<Utc>>,
    pub lifecycle_state: LifecycleState,
    pub state_history: Vec<StateChange>,
    #[serde(default)]
    pub metadata: SessionMeta,
    #[serde(default)]
    pub statistics: SessionStats,
}

impl SessionRecord {
    /// Creates a fresh Active record with a single "created" history entry.
    pub fn new(session_id: &str, project_path: &str) -> Self {
        Self::new_at(session_id, project_path, Utc::now())
    }

    pub fn new_at(session_id: &str, project_path: &str, now: DateTime<Utc>) -> Self {
        let project_name = Path::new(project_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| project_path.to_string());

        SessionRecord {
            version: RECORD_VERSION.to_string(),
            session_id: session_id.to_string(),
            created: now,
            last_accessed: now,
            last_modified: now,
            project_path: project_path.to_string(),
            metadata: SessionMeta {
                description: format!("Development session for {}", project_name),
                tags: vec!["development".to_string()],
                custom_data: HashMap::new(),
            },
            project_name,
            working_directory: project_path.to_string(),
            external_session_id: String::new(),
            bound_at: None,
            lifecycle_state: LifecycleState::Active,
            state_history: vec![StateChange {
                state: LifecycleState::Active,
                timestamp: now,
                reason: "created".to_string(),
            }],
            statistics: SessionStats::default(),
        }
    }

    pub fn is_bound(&self) -> bool {
        !self.external_session_id.is_empty()
    }

    /// Applies a lifecycle transition, appending exactly one history entry.
    pub fn transition(&mut self, to: LifecycleState, reason: &str) -> Result<()> {
        if !self.lifecycle_state.can_transition_to(to) {
            return Err(KamuiError::InvalidTransition {
                id: self.session_id.clone(),
                from: self.lifecycle_state,
                to,
            });
        }

        let now = self.touch();
        self.lifecycle_state = to;
        self.state_history.push(StateChange {
            state: to,
            timestamp: now,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Records a transcript binding.
    pub fn bind(&mut self, external_session_id: &str) {
        let now = self.touch();
        self.external_session_id = external_session_id.to_string();
        self.bound_at = Some(now);
        self.statistics.discovery_count += 1;
    }

    /// Refreshes `last_accessed` and `last_modified`, keeping the latter monotonic.
    /// Returns the timestamp that was applied.
    pub fn touch(&mut self) -> DateTime<Utc> {
        let now = Utc::now().max(self.last_modified);
        self.last_accessed = now;
        self.last_modified = now;
        now
    }
}

//! Session lifecycle: creation, binding, resume and state transitions.
//!
//! ```text
//!            create_or_resume
//! (new) ───────────────────────▶ Active ◀──── resumed ──── Paused
//!                                  │  └────── paused ───────▶ │
//!                                  ▼                          ▼
//!                              Completed  ◀──── manually_completed
//!
//!   any ──▶ Archived        any ──▶ Error(reason)
//! ```
//!
//! Every load-modify-save cycle runs under the session's [`SessionLock`].
//! The lock is never held while claude runs, so a long interactive session
//! doesn't block `kam list` or a watcher binding its transcript.

use std::process::ExitStatus;
use std::time::Duration;

use chrono::Utc;

use crate::claude::ClaudeClient;
use crate::config::{DiscoveryMode, KamuiConfig};
use crate::error::{KamuiError, Result};
use crate::session::lock::SessionLock;
use crate::session::store::MetadataStore;
use crate::storage::StorageConfig;
use crate::transcript::{SessionDiscovery, TranscriptScanner};
use crate::types::{validate_session_id, LifecycleState, SessionRecord};

/// Result of [`SessionLifecycle::prepare`].
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub record: SessionRecord,
    /// True when the record has no binding, or its transcript is gone.
    pub needs_binding: bool,
}

/// Result of [`SessionLifecycle::create_or_resume`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeOutcome {
    pub record: SessionRecord,
    /// True when this call discovered and bound a new transcript.
    pub fresh: bool,
}

pub struct SessionLifecycle<C: ClaudeClient> {
    store: MetadataStore,
    discovery: SessionDiscovery,
    client: C,
    lock_timeout: Duration,
}

impl<C: ClaudeClient> SessionLifecycle<C> {
    pub fn new(storage: StorageConfig, config: &KamuiConfig, client: C) -> Self {
        Self {
            discovery: SessionDiscovery::new(
                TranscriptScanner::new(storage.clone()),
                config.discovery.clone(),
            ),
            store: MetadataStore::new(storage),
            client,
            lock_timeout: config.lock.timeout(),
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn discovery(&self) -> &SessionDiscovery {
        &self.discovery
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn project_path(&self) -> String {
        self.store
            .storage()
            .project_root()
            .to_string_lossy()
            .to_string()
    }

    /// Loads the record, creating and persisting it if absent, and checks
    /// whether its transcript binding is still valid.
    pub fn prepare(&self, session_id: &str) -> Result<Prepared> {
        validate_session_id(session_id)?;

        let record = match self.store.load(session_id) {
            Ok(record) => record,
            Err(KamuiError::SessionNotFound { .. }) => {
                let record = self.modify(session_id, true, |_| Ok(()))?;
                tracing::info!(
                    session = %session_id,
                    project = %record.project_path,
                    "Session created"
                );
                record
            }
            Err(e) => return Err(e),
        };

        let needs_binding = !self.binding_is_live(&record);
        Ok(Prepared {
            record,
            needs_binding,
        })
    }

    fn binding_is_live(&self, record: &SessionRecord) -> bool {
        if !record.is_bound() {
            return false;
        }
        match self
            .client
            .session_exists(&record.external_session_id, &record.working_directory)
        {
            Ok(true) => true,
            Ok(false) => {
                tracing::info!(
                    session = %record.session_id,
                    transcript = %record.external_session_id,
                    "Bound transcript no longer exists"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    session = %record.session_id,
                    error = %e,
                    "Transcript existence check failed; treating binding as gone"
                );
                false
            }
        }
    }

    /// Makes the session ready to launch: creates it if needed, (re)binds a
    /// transcript when the binding is missing or stale, and refreshes access
    /// times.
    pub fn create_or_resume(&self, session_id: &str) -> Result<ResumeOutcome> {
        let prepared = self.prepare(session_id)?;
        let stale_binding = prepared.record.external_session_id.clone();

        let discovered = match (prepared.needs_binding, self.discovery.config().mode) {
            (true, DiscoveryMode::Blocking) => Some(
                self.discovery
                    .discover_blocking(&self.client, &prepared.record.working_directory)?,
            ),
            _ => None,
        };

        let record = self.modify(session_id, true, |record| {
            match &discovered {
                Some(external_id) => record.bind(external_id),
                // Monitor mode: drop the dead binding so launch starts fresh
                // and the watcher can bind the new transcript.
                None if prepared.needs_binding
                    && record.is_bound()
                    && record.external_session_id == stale_binding =>
                {
                    record.external_session_id.clear();
                    record.bound_at = None;
                }
                None => {}
            }
            if record.lifecycle_state == LifecycleState::Paused {
                record.transition(LifecycleState::Active, "resumed")?;
            }
            record.touch();
            record.statistics.session_count += 1;
            Ok(())
        })?;

        if let Some(external_id) = &discovered {
            tracing::info!(session = %session_id, transcript = %external_id, "Session bound");
        }
        Ok(ResumeOutcome {
            record,
            fresh: discovered.is_some(),
        })
    }

    /// Records `external_id` as the session's transcript.
    pub fn bind_external(&self, session_id: &str, external_id: &str) -> Result<SessionRecord> {
        let record = self.modify(session_id, false, |record| {
            record.bind(external_id);
            Ok(())
        })?;
        tracing::info!(session = %session_id, transcript = %external_id, "Session bound");
        Ok(record)
    }

    /// Runs claude in the foreground for the session, then refreshes `lastAccessed`.
    pub fn launch(&self, session_id: &str) -> Result<ExitStatus> {
        let record = self.store.load(session_id)?;
        let resume = record
            .is_bound()
            .then_some(record.external_session_id.as_str());

        let status =
            self.client
                .launch_foreground(&record.working_directory, session_id, resume)?;

        // Reload: a watcher may have bound the transcript while claude ran.
        self.modify(session_id, false, |record| {
            record.last_accessed = Utc::now().max(record.last_accessed);
            Ok(())
        })?;
        Ok(status)
    }

    pub fn get(&self, session_id: &str) -> Result<SessionRecord> {
        self.store.load(session_id)
    }

    /// Loads every stored record, sorted by id. Corrupted records are skipped
    /// with a warning.
    pub fn list(&self) -> Result<Vec<SessionRecord>> {
        let mut records = Vec::new();
        for id in self.store.list()? {
            match self.store.load(&id) {
                Ok(record) => records.push(record),
                Err(e @ KamuiError::SessionCorrupted { .. }) => {
                    tracing::warn!(session = %id, error = %e, "Skipping corrupted session record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    pub fn complete(&self, session_id: &str) -> Result<SessionRecord> {
        self.transition(session_id, LifecycleState::Completed, "manually_completed")
    }

    pub fn pause(&self, session_id: &str) -> Result<SessionRecord> {
        self.transition(session_id, LifecycleState::Paused, "paused")
    }

    pub fn archive(&self, session_id: &str) -> Result<SessionRecord> {
        self.transition(session_id, LifecycleState::Archived, "archived")
    }

    pub fn mark_error(&self, session_id: &str, reason: &str) -> Result<SessionRecord> {
        self.transition(session_id, LifecycleState::Error, reason)
    }

    pub fn delete(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;
        let _lock = self.lock(session_id)?;
        self.store.delete(session_id)?;
        tracing::info!(session = %session_id, "Session deleted");
        Ok(())
    }

    fn transition(
        &self,
        session_id: &str,
        to: LifecycleState,
        reason: &str,
    ) -> Result<SessionRecord> {
        let record = self.modify(session_id, false, |record| record.transition(to, reason))?;
        tracing::info!(session = %session_id, state = %to, reason, "Session state changed");
        Ok(record)
    }

    fn lock(&self, session_id: &str) -> Result<SessionLock> {
        self.store.initialize()?;
        SessionLock::acquire(&self.store.storage().locks_dir(), session_id, self.lock_timeout)
    }

    /// Locked load-modify-save. With `create_missing`, an absent record starts
    /// from a fresh one instead of failing with `SessionNotFound`.
    fn modify<F>(&self, session_id: &str, create_missing: bool, f: F) -> Result<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord) -> Result<()>,
    {
        validate_session_id(session_id)?;
        let _lock = self.lock(session_id)?;

        let mut record = match self.store.load(session_id) {
            Ok(record) => record,
            Err(KamuiError::SessionNotFound { .. }) if create_missing => {
                SessionRecord::new(session_id, &self.project_path())
            }
            Err(e) => return Err(e),
        };

        f(&mut record)?;
        self.store.save(&record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_utils::canonical_working_dir;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockClient {
        transcript_dir: PathBuf,
        next_ids: RefCell<VecDeque<String>>,
        throwaway_calls: Cell<u32>,
        launches: RefCell<Vec<Option<String>>>,
        probe_fails: Cell<bool>,
        throwaway_status: Cell<ExitStatus>,
        transcript_mode: Cell<Option<u32>>,
    }

    impl MockClient {
        fn write_transcript(&self, id: &str, content: &str) {
            std::fs::create_dir_all(&self.transcript_dir).unwrap();
            let path = self.transcript_dir.join(format!("{}.jsonl", id));
            std::fs::write(&path, content).unwrap();
            #[cfg(unix)]
            if let Some(mode) = self.transcript_mode.get() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
            }
        }
    }

    impl ClaudeClient for MockClient {
        fn session_exists(&self, external_id: &str, _working_dir: &str) -> Result<bool> {
            if self.probe_fails.get() {
                return Err(KamuiError::io("probe", std::io::Error::other("boom")));
            }
            Ok(!external_id.is_empty()
                && self
                    .transcript_dir
                    .join(format!("{}.jsonl", external_id))
                    .is_file())
        }

        fn launch_foreground(
            &self,
            _working_dir: &str,
            _local_session_id: &str,
            resume: Option<&str>,
        ) -> Result<ExitStatus> {
            self.launches.borrow_mut().push(resume.map(str::to_string));
            Ok(ExitStatus::default())
        }

        fn launch_with_throwaway_message(
            &self,
            _working_dir: &str,
            sentinel: &str,
        ) -> Result<ExitStatus> {
            self.throwaway_calls.set(self.throwaway_calls.get() + 1);
            if let Some(id) = self.next_ids.borrow_mut().pop_front() {
                let line = format!("{{\"type\":\"user\",\"content\":\"{}\"}}\n", sentinel);
                self.write_transcript(&id, &line);
            }
            Ok(self.throwaway_status.get())
        }
    }

    struct Fixture {
        _temp: TempDir,
        lifecycle: SessionLifecycle<MockClient>,
    }

    fn fixture_with(mutate: impl FnOnce(&mut KamuiConfig), ids: &[&str]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("app");
        std::fs::create_dir_all(&project).unwrap();
        let storage = StorageConfig::with_roots(project.clone(), temp.path().join("claude"));

        let mut config = KamuiConfig::default();
        config.discovery.settle_ms = 0;
        config.lock.timeout_ms = 200;
        mutate(&mut config);

        let client = MockClient {
            transcript_dir: storage
                .transcript_dir(&canonical_working_dir(&project.to_string_lossy())),
            next_ids: RefCell::new(ids.iter().map(|s| s.to_string()).collect()),
            ..MockClient::default()
        };
        Fixture {
            lifecycle: SessionLifecycle::new(storage, &config, client),
            _temp: temp,
        }
    }

    fn fixture(ids: &[&str]) -> Fixture {
        fixture_with(|_| {}, ids)
    }

    #[test]
    fn test_new_session_is_created_and_bound() {
        let f = fixture(&["t1"]);
        let outcome = f.lifecycle.create_or_resume("Tasks").unwrap();

        assert!(outcome.fresh);
        let record = f.lifecycle.get("Tasks").unwrap();
        assert_eq!(record, outcome.record);
        assert_eq!(record.external_session_id, "t1");
        assert!(record.bound_at.is_some());
        assert_eq!(record.lifecycle_state, LifecycleState::Active);
        assert_eq!(record.state_history.len(), 1);
        assert_eq!(record.statistics.session_count, 1);
        assert_eq!(record.statistics.discovery_count, 1);
        assert!(record.last_modified >= record.created);
    }

    #[test]
    fn test_live_binding_is_reused() {
        let f = fixture(&["t1", "t2"]);
        f.lifecycle.create_or_resume("Tasks").unwrap();
        let second = f.lifecycle.create_or_resume("Tasks").unwrap();

        assert!(!second.fresh);
        assert_eq!(second.record.external_session_id, "t1");
        assert_eq!(second.record.statistics.session_count, 2);
        assert_eq!(f.lifecycle.client().throwaway_calls.get(), 1);
    }

    #[test]
    fn test_stale_binding_is_rediscovered() {
        let f = fixture(&["t2"]);
        f.lifecycle.prepare("Tasks").unwrap();
        f.lifecycle.bind_external("Tasks", "X").unwrap();

        let outcome = f.lifecycle.create_or_resume("Tasks").unwrap();
        assert!(outcome.fresh);
        assert_eq!(outcome.record.external_session_id, "t2");
        assert_eq!(outcome.record.statistics.discovery_count, 2);
    }

    #[test]
    fn test_failed_probe_counts_as_gone() {
        let f = fixture(&["t2"]);
        f.lifecycle.client().write_transcript("t1", "{}\n");
        f.lifecycle.prepare("Tasks").unwrap();
        f.lifecycle.bind_external("Tasks", "t1").unwrap();

        f.lifecycle.client().probe_fails.set(true);
        assert!(f.lifecycle.prepare("Tasks").unwrap().needs_binding);
    }

    #[test]
    fn test_discovery_failure_leaves_unbound_record() {
        let f = fixture(&[]);
        let err = f.lifecycle.create_or_resume("Tasks").unwrap_err();

        assert!(matches!(err, KamuiError::DiscoveryFailed { .. }));
        let record = f.lifecycle.get("Tasks").unwrap();
        assert!(!record.is_bound());
        assert_eq!(record.statistics.session_count, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_throwaway_run_leaves_unbound_record() {
        use std::os::unix::process::ExitStatusExt;

        let f = fixture(&["t1"]);
        f.lifecycle
            .client()
            .throwaway_status
            .set(ExitStatus::from_raw(1 << 8));

        let err = f.lifecycle.create_or_resume("Tasks").unwrap_err();
        assert!(matches!(err, KamuiError::ExternalProcessFailed { .. }));
        assert!(!f.lifecycle.get("Tasks").unwrap().is_bound());
    }

    #[cfg(unix)]
    #[test]
    fn test_uncleanable_transcript_is_still_bound() {
        let f = fixture(&["t1"]);
        f.lifecycle.client().transcript_mode.set(Some(0o000));

        let outcome = f.lifecycle.create_or_resume("Tasks").unwrap();
        assert!(outcome.fresh);
        assert_eq!(f.lifecycle.get("Tasks").unwrap().external_session_id, "t1");
    }

    #[test]
    fn test_paused_session_is_resumed() {
        let f = fixture(&["t1"]);
        f.lifecycle.create_or_resume("Tasks").unwrap();
        f.lifecycle.pause("Tasks").unwrap();

        let outcome = f.lifecycle.create_or_resume("Tasks").unwrap();
        let reasons: Vec<&str> = outcome
            .record
            .state_history
            .iter()
            .map(|c| c.reason.as_str())
            .collect();
        assert_eq!(outcome.record.lifecycle_state, LifecycleState::Active);
        assert_eq!(reasons, vec!["created", "paused", "resumed"]);
    }

    #[test]
    fn test_monitor_mode_skips_blocking_discovery() {
        let f = fixture_with(|c| c.discovery.mode = DiscoveryMode::Monitor, &["t1"]);
        let outcome = f.lifecycle.create_or_resume("Tasks").unwrap();

        assert!(!outcome.fresh);
        assert!(!outcome.record.is_bound());
        assert_eq!(f.lifecycle.client().throwaway_calls.get(), 0);
    }

    #[test]
    fn test_monitor_mode_clears_stale_binding() {
        let f = fixture_with(|c| c.discovery.mode = DiscoveryMode::Monitor, &[]);
        f.lifecycle.prepare("Tasks").unwrap();
        f.lifecycle.bind_external("Tasks", "X").unwrap();

        let outcome = f.lifecycle.create_or_resume("Tasks").unwrap();
        assert!(!outcome.record.is_bound());
        assert!(outcome.record.bound_at.is_none());
    }

    #[test]
    fn test_launch_resumes_bound_transcript() {
        let f = fixture(&["t1"]);
        f.lifecycle.create_or_resume("Tasks").unwrap();
        let before = f.lifecycle.get("Tasks").unwrap().last_accessed;

        assert!(f.lifecycle.launch("Tasks").unwrap().success());
        assert_eq!(
            *f.lifecycle.client().launches.borrow(),
            vec![Some("t1".to_string())]
        );
        assert!(f.lifecycle.get("Tasks").unwrap().last_accessed >= before);
    }

    #[test]
    fn test_launch_unbound_starts_fresh() {
        let f = fixture_with(|c| c.discovery.mode = DiscoveryMode::Monitor, &[]);
        f.lifecycle.create_or_resume("Tasks").unwrap();
        f.lifecycle.launch("Tasks").unwrap();
        assert_eq!(*f.lifecycle.client().launches.borrow(), vec![None]);
    }

    #[test]
    fn test_launch_missing_session_is_not_found() {
        let f = fixture(&[]);
        assert!(matches!(
            f.lifecycle.launch("Tasks"),
            Err(KamuiError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn test_transitions_follow_state_machine() {
        let f = fixture(&[]);
        f.lifecycle.prepare("Tasks").unwrap();

        f.lifecycle.complete("Tasks").unwrap();
        let err = f.lifecycle.pause("Tasks").unwrap_err();
        assert!(matches!(
            err,
            KamuiError::InvalidTransition {
                from: LifecycleState::Completed,
                to: LifecycleState::Paused,
                ..
            }
        ));

        let archived = f.lifecycle.archive("Tasks").unwrap();
        assert_eq!(archived.lifecycle_state, LifecycleState::Archived);
        assert_eq!(archived.state_history.len(), 3);
    }

    #[test]
    fn test_mark_error_keeps_reason() {
        let f = fixture(&[]);
        f.lifecycle.prepare("Tasks").unwrap();
        let record = f.lifecycle.mark_error("Tasks", "claude crashed").unwrap();
        assert_eq!(record.lifecycle_state, LifecycleState::Error);
        assert_eq!(record.state_history.last().unwrap().reason, "claude crashed");
    }

    #[test]
    fn test_transition_on_missing_session_is_not_found() {
        let f = fixture(&[]);
        assert!(matches!(
            f.lifecycle.complete("Tasks"),
            Err(KamuiError::SessionNotFound { .. })
        ));
        assert!(!f.lifecycle.store().exists("Tasks"));
    }

    #[test]
    fn test_bind_external_missing_session_is_not_found() {
        let f = fixture(&[]);
        assert!(matches!(
            f.lifecycle.bind_external("Tasks", "t1"),
            Err(KamuiError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn test_delete() {
        let f = fixture(&[]);
        f.lifecycle.prepare("Tasks").unwrap();
        f.lifecycle.delete("Tasks").unwrap();
        assert!(!f.lifecycle.store().exists("Tasks"));
        assert!(matches!(
            f.lifecycle.delete("Tasks"),
            Err(KamuiError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn test_list_skips_corrupted_records() {
        let f = fixture(&[]);
        f.lifecycle.prepare("b").unwrap();
        f.lifecycle.prepare("a").unwrap();
        std::fs::write(f.lifecycle.store().storage().session_file("c"), "garbage").unwrap();

        let ids: Vec<String> = f
            .lifecycle
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.session_id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_held_lock_surfaces_session_locked() {
        let f = fixture(&[]);
        f.lifecycle.prepare("Tasks").unwrap();
        let _held = SessionLock::acquire(
            &f.lifecycle.store().storage().locks_dir(),
            "Tasks",
            Duration::from_millis(50),
        )
        .unwrap();

        assert!(matches!(
            f.lifecycle.complete("Tasks"),
            Err(KamuiError::SessionLocked { .. })
        ));
    }

    #[test]
    fn test_invalid_id_is_rejected() {
        let f = fixture(&[]);
        assert!(matches!(
            f.lifecycle.create_or_resume("../etc"),
            Err(KamuiError::InvalidSessionId(_))
        ));
    }
}

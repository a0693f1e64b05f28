//! Discovers which transcript Claude Code created for a session.
//!
//! Claude Code picks its own session ids and tells nobody. The only reliable
//! signal is a new `.jsonl` file appearing in the working directory's
//! transcript folder, so both modes here compare directory snapshots.
//!
//! - **Blocking**: snapshot, run claude once with a throwaway prompt, wait for
//!   the write to settle, snapshot again, strip the prompt from the winner.
//! - **Polling**: given a baseline taken earlier, rescan on an interval until
//!   a new transcript shows up, the deadline passes, or the caller cancels.
//!
//! Neither mode touches session records; binding is the lifecycle's job.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::claude::ClaudeClient;
use crate::config::{DiscoveryConfig, TieBreak};
use crate::error::{DiscoveryFailure, KamuiError, Result};
use crate::transcript::sanitizer::remove_sentinel;
use crate::transcript::scanner::{TranscriptEntry, TranscriptScanner};

/// Transcript ids present at some instant.
pub type Snapshot = HashSet<String>;

/// Cooperative cancellation for [`SessionDiscovery::poll_for_new`].
///
/// Clones share state. Cancelling wakes any waiter immediately.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(|p| p.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Sleeps up to `timeout`. Returns true if cancelled before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|p| p.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|p| p.into_inner());
        *guard
    }
}

#[derive(Debug, Clone)]
pub struct SessionDiscovery {
    scanner: TranscriptScanner,
    config: DiscoveryConfig,
}

impl SessionDiscovery {
    pub fn new(scanner: TranscriptScanner, config: DiscoveryConfig) -> Self {
        Self { scanner, config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn scanner(&self) -> &TranscriptScanner {
        &self.scanner
    }

    pub fn snapshot(&self, working_dir: &str) -> Result<Snapshot> {
        Ok(self
            .scanner
            .list_transcripts(working_dir)?
            .into_iter()
            .map(|e| e.id)
            .collect())
    }

    /// Forces claude to create a transcript and returns its id.
    pub fn discover_blocking(
        &self,
        client: &dyn ClaudeClient,
        working_dir: &str,
    ) -> Result<String> {
        let before = self.snapshot(working_dir)?;
        tracing::debug!(
            working_dir = %working_dir,
            existing = before.len(),
            "Starting blocking discovery"
        );

        let status = client.launch_with_throwaway_message(working_dir, &self.config.sentinel)?;
        if !status.success() {
            return Err(KamuiError::ExternalProcessFailed {
                command: format!("claude --print {}", self.config.sentinel),
                status,
            });
        }

        thread::sleep(self.config.settle());

        let after = self.scanner.list_transcripts(working_dir)?;
        let Some(chosen) = self.pick(new_entries(&before, after), working_dir) else {
            return Err(KamuiError::discovery(
                working_dir,
                DiscoveryFailure::NoNewTranscript,
            ));
        };

        self.strip_sentinel(&chosen.path);

        tracing::info!(
            working_dir = %working_dir,
            transcript = %chosen.id,
            "Discovered transcript"
        );
        Ok(chosen.id)
    }

    /// Sanitization never fails discovery; problems are only logged.
    fn strip_sentinel(&self, path: &Path) {
        match remove_sentinel(path, &self.config.sentinel) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                path = %path.display(),
                "Sentinel message not found in new transcript"
            ),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove sentinel message from transcript"
            ),
        }
    }

    /// Waits for a transcript not in `before` to appear.
    ///
    /// Scan errors are logged and retried until the deadline.
    pub fn poll_for_new(
        &self,
        before: &Snapshot,
        working_dir: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        let deadline = Instant::now() + self.config.timeout();

        loop {
            if cancel.is_cancelled() {
                return Err(KamuiError::discovery(working_dir, DiscoveryFailure::Cancelled));
            }

            match self.scanner.list_transcripts(working_dir) {
                Ok(after) => {
                    if let Some(chosen) = self.pick(new_entries(before, after), working_dir) {
                        tracing::info!(
                            working_dir = %working_dir,
                            transcript = %chosen.id,
                            "New transcript observed"
                        );
                        return Ok(chosen.id);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        working_dir = %working_dir,
                        error = %e,
                        "Transcript scan failed, retrying"
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(KamuiError::discovery(working_dir, DiscoveryFailure::Timeout));
            }
            let wait = self.config.poll_interval().min(deadline - now);
            if cancel.wait_timeout(wait) {
                return Err(KamuiError::discovery(working_dir, DiscoveryFailure::Cancelled));
            }
        }
    }

    fn pick(&self, candidates: Vec<TranscriptEntry>, working_dir: &str) -> Option<TranscriptEntry> {
        if candidates.len() > 1 {
            tracing::warn!(
                working_dir = %working_dir,
                candidates = candidates.len(),
                tie_break = ?self.config.tie_break,
                "Several new transcripts appeared; choosing one"
            );
        }
        choose(candidates, self.config.tie_break)
    }
}

/// Entries of `after` whose id is absent from `before`, in `after`'s order.
pub fn new_entries(before: &Snapshot, after: Vec<TranscriptEntry>) -> Vec<TranscriptEntry> {
    after
        .into_iter()
        .filter(|e| !before.contains(&e.id))
        .collect()
}

/// Applies `tie_break` to a set of candidates.
pub fn choose(candidates: Vec<TranscriptEntry>, tie_break: TieBreak) -> Option<TranscriptEntry> {
    match tie_break {
        TieBreak::ScanOrder => candidates.into_iter().next(),
        TieBreak::NewestModified => candidates
            .into_iter()
            .max_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.id.cmp(&b.id))),
    }
}

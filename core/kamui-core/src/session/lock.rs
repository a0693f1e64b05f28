//! Advisory per-session lock around load-modify-save cycles.
//!
//! `MetadataStore::save` is atomic but last-writer-wins. Two `kam` invocations
//! that both load a record, change different fields and save would lose one
//! change. The lifecycle takes this lock for the duration of each cycle.
//!
//! # Lock Directory Structure
//!
//! Location: `<project>/.claude/kamui-sessions/locks/{session_id}.lock/`
//!
//! ```text
//! {session_id}.lock/
//! ├── pid          # Plain text: holder process ID
//! └── meta.json    # { pid, session_id, created, proc_started }
//! ```
//!
//! `create_dir` is atomic, so exactly one process wins a race for a free lock.
//!
//! # Stale Locks
//!
//! A holder that crashed leaves its directory behind. A lock is stale when its
//! PID is dead, or when the PID is alive but its process start time differs
//! from `proc_started` (the PID was recycled). Stale locks are taken over.
//! A lock whose metadata can't be read is treated as stale once it is older
//! than [`UNREADABLE_LOCK_GRACE`], so a holder still writing its metadata
//! isn't evicted.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::{KamuiError, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);
const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(2);

static EVICTIONS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockMeta {
    pub pid: u32,
    pub session_id: String,
    /// Lock creation time (Unix millis).
    pub created: u64,
    /// Holder process start time (Unix seconds) for PID identity verification.
    #[serde(default)]
    pub proc_started: Option<u64>,
}

/// Held lock. The directory is removed when the guard is dropped.
#[derive(Debug)]
pub struct SessionLock {
    lock_dir: PathBuf,
    session_id: String,
    pid: u32,
}

impl SessionLock {
    /// Acquires the lock for `session_id`, retrying until `timeout` elapses.
    pub fn acquire(locks_dir: &Path, session_id: &str, timeout: Duration) -> Result<SessionLock> {
        let lock_dir = lock_dir_path(locks_dir, session_id);
        let pid = std::process::id();
        let deadline = Instant::now() + timeout;

        fs::create_dir_all(locks_dir)
            .map_err(|e| KamuiError::storage("failed to create locks directory", locks_dir, e))?;

        loop {
            match fs::create_dir(&lock_dir) {
                Ok(()) => {
                    if let Err(e) = write_lock_metadata(&lock_dir, pid, session_id) {
                        let _ = fs::remove_dir_all(&lock_dir);
                        return Err(KamuiError::storage(
                            "failed to write lock metadata",
                            &lock_dir,
                            e,
                        ));
                    }
                    tracing::debug!(session = %session_id, pid, "Session lock acquired");
                    return Ok(SessionLock {
                        lock_dir,
                        session_id: session_id.to_string(),
                        pid,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&lock_dir) {
                        tracing::warn!(
                            session = %session_id,
                            path = %lock_dir.display(),
                            "Taking over stale session lock"
                        );
                        evict_stale(&lock_dir, pid);
                        continue;
                    }
                }
                Err(e) => {
                    return Err(KamuiError::storage(
                        "failed to create lock directory",
                        &lock_dir,
                        e,
                    ))
                }
            }

            if Instant::now() >= deadline {
                return Err(KamuiError::SessionLocked {
                    id: session_id.to_string(),
                    path: lock_dir,
                });
            }
            thread::sleep(RETRY_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_dir
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        // Only remove the directory if it is still ours; a stale takeover may
        // have replaced it.
        match read_lock_pid(&self.lock_dir) {
            Some(pid) if pid == self.pid => {
                if let Err(e) = fs::remove_dir_all(&self.lock_dir) {
                    tracing::warn!(
                        session = %self.session_id,
                        error = %e,
                        "Failed to release session lock"
                    );
                }
            }
            _ => {}
        }
    }
}

/// Get the lock directory path for a session (without checking if it exists).
pub fn lock_dir_path(locks_dir: &Path, session_id: &str) -> PathBuf {
    locks_dir.join(format!("{}.lock", session_id))
}

/// Reads the holder metadata of a lock directory, if present and well-formed.
pub fn read_lock_meta(lock_dir: &Path) -> Option<LockMeta> {
    let content = fs::read_to_string(lock_dir.join("meta.json")).ok()?;
    serde_json::from_str(&content).ok()
}

fn read_lock_pid(lock_dir: &Path) -> Option<u32> {
    let pid_str = fs::read_to_string(lock_dir.join("pid")).ok()?;
    pid_str.trim().parse().ok()
}

fn is_stale(lock_dir: &Path) -> bool {
    match read_lock_meta(lock_dir) {
        Some(meta) => !is_pid_alive_verified(meta.pid, meta.proc_started),
        None => lock_age(lock_dir).is_some_and(|age| age > UNREADABLE_LOCK_GRACE),
    }
}

/// Renames the lock aside and re-checks it there, so a competing acquirer's
/// fresh lock that replaced the stale one is put back instead of deleted.
fn evict_stale(lock_dir: &Path, pid: u32) {
    let seq = EVICTIONS.fetch_add(1, Ordering::Relaxed);
    let aside = lock_dir.with_extension(format!("lock.stale-{}-{}", pid, seq));
    if fs::rename(lock_dir, &aside).is_err() {
        // Someone else already moved or released it.
        return;
    }

    if !is_stale(&aside) {
        if fs::rename(&aside, lock_dir).is_ok() {
            return;
        }
        tracing::warn!(
            path = %lock_dir.display(),
            "Live lock displaced during stale takeover"
        );
    }
    if let Err(e) = fs::remove_dir_all(&aside) {
        tracing::debug!(path = %aside.display(), error = %e, "Failed to remove stale lock");
    }
}

fn lock_age(lock_dir: &Path) -> Option<Duration> {
    let modified = fs::metadata(lock_dir).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

fn write_lock_metadata(lock_dir: &Path, pid: u32, session_id: &str) -> std::io::Result<()> {
    fs::write(lock_dir.join("pid"), pid.to_string())?;

    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let meta = LockMeta {
        pid,
        session_id: session_id.to_string(),
        created,
        proc_started: get_process_start_time(pid),
    };
    let content = serde_json::to_string_pretty(&meta).map_err(std::io::Error::other)?;
    fs::write(lock_dir.join("meta.json"), content)
}

pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Get the start time of a process (Unix timestamp).
/// Returns None if the process doesn't exist or can't be queried.
pub fn get_process_start_time(pid: u32) -> Option<u64> {
    use sysinfo::{Pid, ProcessRefreshKind, System};

    let mut sys = System::new();
    let sysinfo_pid = Pid::from(pid as usize);
    sys.refresh_process_specifics(sysinfo_pid, ProcessRefreshKind::new());
    sys.process(sysinfo_pid).map(|process| process.start_time())
}

/// Verify that a PID is alive and, when known, still has the recorded start time
/// (±2 seconds).
fn is_pid_alive_verified(pid: u32, expected_start: Option<u64>) -> bool {
    if !is_pid_alive(pid) {
        return false;
    }
    let Some(expected) = expected_start else {
        return true;
    };
    match get_process_start_time(pid) {
        Some(actual) => actual.abs_diff(expected) <= 2,
        None => true,
    }
}

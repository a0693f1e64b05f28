//! [`ClaudeClient`] backed by the real `claude` executable.
//!
//! The binary is resolved once, at construction: an explicit path from
//! configuration (or `KAMUI_CLAUDE_PATH`), otherwise a `PATH` search with a few
//! well-known install locations as fallback.
//!
//! # Background watcher
//!
//! When an unbound session is launched interactively, the transcript claude is
//! about to create is unknown. If a [`WatcherCommand`] is configured, the
//! foreground launch first spawns it as an independent process:
//!
//! ```text
//! <program> <args...> monitor --session-id <id> --working-dir <dir>
//!                             --project <root> --timeout-secs <n>
//! ```
//!
//! The watcher snapshots the transcript directory, waits for a new file and
//! binds it. The parent waits `startup_grace` before starting claude so the
//! snapshot predates claude's first write, and once claude exits gives the
//! watcher at most `ceiling` to finish before killing it.

use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::claude::ClaudeClient;
use crate::config::{KamuiConfig, MonitorConfig};
use crate::error::{KamuiError, Result};
use crate::storage::StorageConfig;
use crate::transcript::TranscriptScanner;

const CLAUDE_BINARY_NAME: &str = "claude";
const WATCHER_REAP_INTERVAL: Duration = Duration::from_millis(100);

/// Program and leading arguments used to start the background watcher.
#[derive(Debug, Clone)]
pub struct WatcherCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

#[derive(Debug, Clone)]
pub struct ClaudeCli {
    binary: PathBuf,
    default_args: Vec<String>,
    storage: StorageConfig,
    scanner: TranscriptScanner,
    monitor: MonitorConfig,
    watcher: Option<WatcherCommand>,
    watcher_timeout_secs: u64,
}

impl ClaudeCli {
    pub fn new(config: &KamuiConfig, storage: StorageConfig) -> Result<Self> {
        let binary = resolve_binary(config.claude.binary.as_deref())?;
        Ok(Self::with_binary(binary, config, storage))
    }

    /// Skips resolution; `binary` is used as given.
    pub fn with_binary(binary: PathBuf, config: &KamuiConfig, storage: StorageConfig) -> Self {
        Self {
            binary,
            default_args: config.claude.default_args.clone(),
            scanner: TranscriptScanner::new(storage.clone()),
            storage,
            monitor: config.monitor.clone(),
            watcher: None,
            watcher_timeout_secs: config.discovery.timeout_secs,
        }
    }

    pub fn with_watcher(mut self, watcher: WatcherCommand) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn session_env(
        &self,
        local_session_id: &str,
        resume: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let project_path = self.storage.project_root();
        let project_name = project_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        vec![
            ("KAMUI_SESSION_ID", local_session_id.to_string()),
            ("KAMUI_CLAUDE_SESSION_ID", resume.unwrap_or_default().to_string()),
            ("KAMUI_PROJECT_NAME", project_name),
            ("KAMUI_PROJECT_PATH", project_path.to_string_lossy().to_string()),
            ("KAMUI_ACTIVE", "1".to_string()),
        ]
    }

    fn spawn_watcher(&self, working_dir: &str, local_session_id: &str) -> Option<Child> {
        let watcher = self.watcher.as_ref()?;

        let result = Command::new(&watcher.program)
            .args(&watcher.args)
            .arg("monitor")
            .arg("--session-id")
            .arg(local_session_id)
            .arg("--working-dir")
            .arg(working_dir)
            .arg("--project")
            .arg(self.storage.project_root())
            .arg("--timeout-secs")
            .arg(self.watcher_timeout_secs.to_string())
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match result {
            Ok(child) => {
                tracing::debug!(
                    session = %local_session_id,
                    pid = child.id(),
                    "Transcript watcher started"
                );
                thread::sleep(self.monitor.startup_grace());
                Some(child)
            }
            Err(e) => {
                tracing::warn!(
                    session = %local_session_id,
                    program = %watcher.program.display(),
                    error = %e,
                    "Failed to start transcript watcher; session stays unbound"
                );
                None
            }
        }
    }

    /// Waits at most the monitor ceiling for the watcher, then kills it.
    fn reap_watcher(&self, mut child: Child) {
        let deadline = Instant::now() + self.monitor.ceiling();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(%status, "Transcript watcher exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(WATCHER_REAP_INTERVAL),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to poll transcript watcher");
                    break;
                }
            }
        }

        tracing::debug!(pid = child.id(), "Stopping transcript watcher");
        let _ = child.kill();
        let _ = child.wait();
    }

    fn spawn_error(&self, e: std::io::Error) -> KamuiError {
        if e.kind() == std::io::ErrorKind::NotFound {
            KamuiError::ExternalProcessUnavailable {
                binary: self.binary.display().to_string(),
                reason: e.to_string(),
            }
        } else {
            KamuiError::io(format!("running {}", self.binary.display()), e)
        }
    }
}

impl ClaudeClient for ClaudeCli {
    fn session_exists(&self, external_id: &str, working_dir: &str) -> Result<bool> {
        Ok(self.scanner.transcript_exists(working_dir, external_id))
    }

    fn launch_foreground(
        &self,
        working_dir: &str,
        local_session_id: &str,
        resume: Option<&str>,
    ) -> Result<ExitStatus> {
        let watcher = match resume {
            Some(_) => None,
            None => self.spawn_watcher(working_dir, local_session_id),
        };

        let mut command = Command::new(&self.binary);
        command
            .args(&self.default_args)
            .current_dir(working_dir)
            .envs(self.session_env(local_session_id, resume));
        if let Some(external_id) = resume {
            command.arg("--resume").arg(external_id);
        }

        tracing::info!(
            session = %local_session_id,
            resume = resume.unwrap_or("-"),
            working_dir = %working_dir,
            "Launching claude"
        );
        let status = command.status().map_err(|e| self.spawn_error(e));

        if let Some(child) = watcher {
            self.reap_watcher(child);
        }
        status
    }

    fn launch_with_throwaway_message(
        &self,
        working_dir: &str,
        sentinel: &str,
    ) -> Result<ExitStatus> {
        tracing::debug!(working_dir = %working_dir, "Running claude with throwaway message");
        let output = Command::new(&self.binary)
            .arg("--print")
            .arg(sentinel)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            tracing::warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "claude --print failed"
            );
        }
        Ok(output.status)
    }
}

/// Resolves the claude executable: `explicit` if given, otherwise a `PATH` search.
pub fn resolve_binary(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return if is_executable(path) {
            Ok(path.to_path_buf())
        } else {
            Err(KamuiError::ExternalProcessUnavailable {
                binary: path.display().to_string(),
                reason: "configured path is not an executable file".to_string(),
            })
        };
    }

    let path_var = env::var_os("PATH").unwrap_or_default();
    find_in_path(CLAUDE_BINARY_NAME, &path_var)
        .or_else(|| fallback_locations().into_iter().find(|p| is_executable(p)))
        .ok_or_else(|| KamuiError::ExternalProcessUnavailable {
            binary: CLAUDE_BINARY_NAME.to_string(),
            reason: "not found in PATH".to_string(),
        })
}

fn find_in_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

// GUI-launched shells often lack the user's PATH.
fn fallback_locations() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("/opt/homebrew/bin").join(CLAUDE_BINARY_NAME),
        PathBuf::from("/usr/local/bin").join(CLAUDE_BINARY_NAME),
    ];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".local/bin").join(CLAUDE_BINARY_NAME));
        paths.push(home.join(".claude/local").join(CLAUDE_BINARY_NAME));
    }
    paths
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    // Records its arguments and KAMUI_* environment in the working directory.
    const RECORDING_SCRIPT: &str = "#!/bin/sh\n\
        printf '%s\\n' \"$@\" > args.txt\n\
        env | grep '^KAMUI_' | sort > env.txt\n";

    struct Fixture {
        temp: TempDir,
        workdir: PathBuf,
        storage: StorageConfig,
        binary: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let workdir = temp.path().join("my-app");
        std::fs::create_dir_all(&workdir).unwrap();
        let binary = temp.path().join("fake-claude");
        std::fs::write(&binary, RECORDING_SCRIPT).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        let storage = StorageConfig::with_roots(workdir.clone(), temp.path().join("claude"));
        Fixture {
            temp,
            workdir,
            storage,
            binary,
        }
    }

    fn cli(f: &Fixture, config: &KamuiConfig) -> ClaudeCli {
        ClaudeCli::with_binary(f.binary.clone(), config, f.storage.clone())
    }

    fn workdir_str(f: &Fixture) -> String {
        f.workdir.to_string_lossy().to_string()
    }

    fn read(f: &Fixture, name: &str) -> String {
        std::fs::read_to_string(f.workdir.join(name)).unwrap()
    }

    #[test]
    fn test_throwaway_message_uses_print_mode() {
        let f = fixture();
        let status = cli(&f, &KamuiConfig::default())
            .launch_with_throwaway_message(&workdir_str(&f), "KAMUI_INIT_MESSAGE")
            .unwrap();

        assert!(status.success());
        assert_eq!(read(&f, "args.txt"), "--print\nKAMUI_INIT_MESSAGE\n");
    }

    #[test]
    fn test_foreground_resume_passes_id_and_env() {
        let f = fixture();
        let mut config = KamuiConfig::default();
        config.claude.default_args = vec!["--verbose".to_string()];

        cli(&f, &config)
            .launch_foreground(&workdir_str(&f), "Tasks", Some("abc-123"))
            .unwrap();

        assert_eq!(read(&f, "args.txt"), "--verbose\n--resume\nabc-123\n");
        let env = read(&f, "env.txt");
        assert!(env.contains("KAMUI_SESSION_ID=Tasks\n"));
        assert!(env.contains("KAMUI_CLAUDE_SESSION_ID=abc-123\n"));
        assert!(env.contains("KAMUI_PROJECT_NAME=my-app\n"));
        assert!(env.contains("KAMUI_ACTIVE=1\n"));
    }

    #[test]
    fn test_unbound_launch_starts_watcher_with_monitor_args() {
        let f = fixture();
        let mut config = KamuiConfig::default();
        config.monitor.startup_grace_ms = 0;
        config.discovery.timeout_secs = 7;
        let watcher = WatcherCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec![
                "-c".into(),
                "printf '%s\\n' \"$@\" > watcher.txt".into(),
                "sh".into(),
            ],
        };

        cli(&f, &config)
            .with_watcher(watcher)
            .launch_foreground(&workdir_str(&f), "Tasks", None)
            .unwrap();

        let args: Vec<String> = read(&f, "watcher.txt").lines().map(str::to_string).collect();
        assert_eq!(args[0], "monitor");
        assert_eq!(args[1..3], ["--session-id".to_string(), "Tasks".to_string()]);
        assert!(args.contains(&"--timeout-secs".to_string()));
        assert_eq!(args.last().unwrap(), "7");
    }

    #[test]
    fn test_watcher_is_killed_after_ceiling() {
        let f = fixture();
        let mut config = KamuiConfig::default();
        config.monitor.startup_grace_ms = 0;
        config.monitor.ceiling_secs = 0;
        let watcher = WatcherCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "sleep 30".into(), "sh".into()],
        };

        let started = Instant::now();
        cli(&f, &config)
            .with_watcher(watcher)
            .launch_foreground(&workdir_str(&f), "Tasks", None)
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_resumed_launch_does_not_start_watcher() {
        let f = fixture();
        let watcher = WatcherCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "touch watcher.txt".into(), "sh".into()],
        };

        cli(&f, &KamuiConfig::default())
            .with_watcher(watcher)
            .launch_foreground(&workdir_str(&f), "Tasks", Some("abc"))
            .unwrap();
        assert!(!f.workdir.join("watcher.txt").exists());
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let f = fixture();
        let missing = f.temp.path().join("nope");
        let err = ClaudeCli::with_binary(missing, &KamuiConfig::default(), f.storage.clone())
            .launch_with_throwaway_message(&workdir_str(&f), "S")
            .unwrap_err();
        assert!(matches!(err, KamuiError::ExternalProcessUnavailable { .. }));
    }

    #[test]
    fn test_resolve_explicit_binary() {
        let f = fixture();
        assert_eq!(resolve_binary(Some(&f.binary)).unwrap(), f.binary);

        let not_exec = f.temp.path().join("plain");
        std::fs::write(&not_exec, "x").unwrap();
        std::fs::set_permissions(&not_exec, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            resolve_binary(Some(&not_exec)),
            Err(KamuiError::ExternalProcessUnavailable { .. })
        ));
    }

    #[test]
    fn test_find_in_path_searches_in_order() {
        let f = fixture();
        let first = f.temp.path().join("first");
        let second = f.temp.path().join("second");
        for dir in [&first, &second] {
            std::fs::create_dir_all(dir).unwrap();
            let bin = dir.join("claude");
            std::fs::write(&bin, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let path_var =
            env::join_paths([f.temp.path().join("empty"), first.clone(), second]).unwrap();

        assert_eq!(find_in_path("claude", &path_var), Some(first.join("claude")));
        assert_eq!(find_in_path("missing", &path_var), None);
    }

    #[test]
    fn test_session_exists_checks_transcript_file() {
        let f = fixture();
        let claude = cli(&f, &KamuiConfig::default());
        let wd = workdir_str(&f);
        let path = f.storage.transcript_file(
            &crate::path_utils::canonical_working_dir(&wd),
            "abc",
        );
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{}\n").unwrap();

        assert!(claude.session_exists("abc", &wd).unwrap());
        assert!(!claude.session_exists("zzz", &wd).unwrap());
        assert!(!claude.session_exists("", &wd).unwrap());
    }
}

//! Per-invocation state shared by the subcommands.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use kamui_core::{
    default_config_path, load_config, resolve_project_root, ClaudeCli, KamuiConfig, KamuiError,
    Result, SessionLifecycle, StorageConfig, WatcherCommand,
};

pub struct Context {
    pub config: KamuiConfig,
    pub config_path: Option<PathBuf>,
    pub storage: StorageConfig,
}

impl Context {
    pub fn load(config_path: Option<PathBuf>, project: Option<PathBuf>) -> Result<Self> {
        let explicit_config = config_path.is_some();
        let config_path = config_path.or_else(default_config_path);
        let config = match &config_path {
            Some(path) => load_config(path)?,
            None => KamuiConfig::default(),
        };

        let project = match project {
            Some(path) => path,
            None => env::current_dir().map_err(|e| KamuiError::io("reading current directory", e))?,
        };
        let storage = StorageConfig::for_project(&resolve_project_root(&project)?)?;

        tracing::debug!(
            project = %storage.project_root().display(),
            config = ?config_path,
            "Context loaded"
        );
        Ok(Self {
            config,
            // Only forwarded to the watcher when the user chose it.
            config_path: config_path.filter(|_| explicit_config),
            storage,
        })
    }

    /// Lifecycle able to launch claude; fails if the binary can't be found.
    pub fn launching_lifecycle(&self) -> Result<SessionLifecycle<ClaudeCli>> {
        let mut client = ClaudeCli::new(&self.config, self.storage.clone())?;
        match self.watcher_command() {
            Ok(watcher) => client = client.with_watcher(watcher),
            Err(e) => tracing::warn!(
                error = %e,
                "Cannot locate kam executable; transcript watcher disabled"
            ),
        }
        Ok(SessionLifecycle::new(self.storage.clone(), &self.config, client))
    }

    /// Lifecycle for commands that only read or edit records. Never spawns claude,
    /// so the binary is not resolved.
    pub fn records_lifecycle(&self) -> SessionLifecycle<ClaudeCli> {
        self.records_lifecycle_with(&self.config)
    }

    pub fn records_lifecycle_with(&self, config: &KamuiConfig) -> SessionLifecycle<ClaudeCli> {
        let binary = config
            .claude
            .binary
            .clone()
            .unwrap_or_else(|| PathBuf::from("claude"));
        let client = ClaudeCli::with_binary(binary, config, self.storage.clone());
        SessionLifecycle::new(self.storage.clone(), config, client)
    }

    fn watcher_command(&self) -> std::io::Result<WatcherCommand> {
        let program = env::current_exe()?;
        let mut args: Vec<OsString> = Vec::new();
        if let Some(path) = &self.config_path {
            args.push("--config".into());
            args.push(path.as_os_str().to_owned());
        }
        Ok(WatcherCommand { program, args })
    }

    pub fn project_root(&self) -> &Path {
        self.storage.project_root()
    }
}

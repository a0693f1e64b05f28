//! The seam between kamui and the Claude Code executable.
//!
//! Everything that spawns claude goes through [`ClaudeClient`], so the
//! lifecycle and discovery code can be driven by a scripted double in tests.

pub mod cli;

use std::process::ExitStatus;

use crate::error::Result;

pub use cli::{resolve_binary, ClaudeCli, WatcherCommand};

pub trait ClaudeClient {
    /// True if a transcript for `external_id` exists for `working_dir`.
    /// An empty id is never present.
    fn session_exists(&self, external_id: &str, working_dir: &str) -> Result<bool>;

    /// Runs claude interactively in `working_dir`, resuming `resume` when given,
    /// and waits for it to exit.
    fn launch_foreground(
        &self,
        working_dir: &str,
        local_session_id: &str,
        resume: Option<&str>,
    ) -> Result<ExitStatus>;

    /// Runs claude non-interactively with `sentinel` as the only prompt, so that
    /// it creates a transcript.
    fn launch_with_throwaway_message(
        &self,
        working_dir: &str,
        sentinel: &str,
    ) -> Result<ExitStatus>;
}

//! `kam monitor`: background watcher spawned by `kam open` for unbound sessions.
//!
//! Takes a transcript baseline immediately, waits for claude to create a new
//! transcript, binds it to the session and exits. The parent kills this process
//! if it outlives the monitor ceiling, so nothing here needs a signal handler.

use kamui_core::{CancelToken, Result};

use crate::context::Context;

pub fn run(ctx: &Context, session_id: &str, working_dir: &str, timeout_secs: u64) -> Result<()> {
    let mut config = ctx.config.clone();
    config.discovery.timeout_secs = timeout_secs;
    let lifecycle = ctx.records_lifecycle_with(&config);
    let discovery = lifecycle.discovery();

    let baseline = discovery.snapshot(working_dir)?;
    tracing::debug!(
        session = %session_id,
        working_dir = %working_dir,
        existing = baseline.len(),
        "Watching for new transcript"
    );

    let external_id = discovery.poll_for_new(&baseline, working_dir, &CancelToken::new())?;
    lifecycle.bind_external(session_id, &external_id)?;
    Ok(())
}

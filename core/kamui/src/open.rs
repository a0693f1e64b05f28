//! `kam open <name>`: create or resume a session, then hand the terminal to claude.

use kamui_core::Result;

use crate::context::Context;

pub fn run(ctx: &Context, name: &str) -> Result<()> {
    let lifecycle = ctx.launching_lifecycle()?;
    let outcome = lifecycle.create_or_resume(name)?;
    let record = &outcome.record;

    if outcome.fresh {
        println!(
            "Session '{}' bound to Claude session {}",
            name, record.external_session_id
        );
    } else if record.is_bound() {
        println!(
            "Resuming session '{}' (Claude session {})",
            name, record.external_session_id
        );
    } else {
        println!("Starting session '{}' in {}", name, ctx.project_root().display());
    }

    let status = lifecycle.launch(name)?;
    if !status.success() {
        tracing::warn!(session = %name, %status, "claude exited with non-zero status");
    }
    Ok(())
}

//! State-changing subcommands: complete, pause, archive, delete.

use kamui_core::Result;

use crate::context::Context;

#[derive(Debug, Clone, Copy)]
pub enum Action {
    Complete,
    Pause,
    Archive,
    Delete,
}

pub fn run(ctx: &Context, name: &str, action: Action) -> Result<()> {
    let lifecycle = ctx.records_lifecycle();

    let record = match action {
        Action::Complete => lifecycle.complete(name)?,
        Action::Pause => lifecycle.pause(name)?,
        Action::Archive => lifecycle.archive(name)?,
        Action::Delete => {
            lifecycle.delete(name)?;
            println!("Deleted session '{}'", name);
            return Ok(());
        }
    };

    println!("Session '{}' is now {}", name, record.lifecycle_state);
    Ok(())
}

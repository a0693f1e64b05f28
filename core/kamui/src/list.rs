//! `kam list`: sessions recorded for the current project.

use kamui_core::{Result, SessionRecord};

use crate::context::Context;

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let records = ctx.records_lifecycle().list()?;

    if json {
        let output = serde_json::to_string_pretty(&records).map_err(|e| {
            kamui_core::KamuiError::StorageCorrupted {
                context: "serializing session list".to_string(),
                source: e,
            }
        })?;
        println!("{}", output);
        return Ok(());
    }

    if records.is_empty() {
        println!("No sessions in {}", ctx.project_root().display());
        return Ok(());
    }

    println!("{:<24} {:<10} {:<20} CLAUDE SESSION", "NAME", "STATE", "LAST ACCESSED");
    for record in &records {
        println!("{}", format_row(record));
    }
    Ok(())
}

fn format_row(record: &SessionRecord) -> String {
    let external = if record.is_bound() {
        record.external_session_id.as_str()
    } else {
        "-"
    };
    format!(
        "{:<24} {:<10} {:<20} {}",
        record.session_id,
        record.lifecycle_state.to_string(),
        record.last_accessed.format("%Y-%m-%d %H:%M:%S").to_string(),
        external
    )
}

//! `kam info <name>`: details of one session.

use kamui_core::{KamuiError, Result, SessionRecord};

use crate::context::Context;

pub fn run(ctx: &Context, name: &str, json: bool) -> Result<()> {
    let lifecycle = ctx.records_lifecycle();
    let record = lifecycle.get(name)?;

    if json {
        let output =
            serde_json::to_string_pretty(&record).map_err(|e| KamuiError::StorageCorrupted {
                context: format!("serializing session '{}'", name),
                source: e,
            })?;
        println!("{}", output);
        return Ok(());
    }

    let transcript_present = record.is_bound()
        && lifecycle
            .discovery()
            .scanner()
            .transcript_exists(&record.working_directory, &record.external_session_id);
    print!("{}", describe(&record, transcript_present));
    Ok(())
}

fn describe(record: &SessionRecord, transcript_present: bool) -> String {
    let mut out = String::new();
    let mut line = |label: &str, value: String| {
        out.push_str(&format!("{:<16}{}\n", label, value));
    };

    line("Session:", record.session_id.clone());
    line("State:", record.lifecycle_state.to_string());
    line("Project:", format!("{} ({})", record.project_name, record.project_path));
    let binding = match (record.is_bound(), transcript_present) {
        (false, _) => "unbound".to_string(),
        (true, true) => record.external_session_id.clone(),
        (true, false) => format!("{} (transcript missing)", record.external_session_id),
    };
    line("Claude session:", binding);
    line("Created:", record.created.to_rfc3339());
    line("Last accessed:", record.last_accessed.to_rfc3339());
    line(
        "Opened:",
        format!(
            "{} times, {} bindings",
            record.statistics.session_count, record.statistics.discovery_count
        ),
    );
    if !record.metadata.description.is_empty() {
        line("Description:", record.metadata.description.clone());
    }
    if !record.metadata.tags.is_empty() {
        line("Tags:", record.metadata.tags.join(", "));
    }

    out.push_str("History:\n");
    for change in &record.state_history {
        out.push_str(&format!(
            "  {}  {:<10} {}\n",
            change.timestamp.format("%Y-%m-%d %H:%M:%S"),
            change.state.to_string(),
            change.reason
        ));
    }
    out
}

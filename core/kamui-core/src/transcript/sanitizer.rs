//! Removes the injected sentinel message from a freshly created transcript.
//!
//! Discovery forces Claude Code to create a transcript by sending it a
//! throwaway prompt. That prompt shows up as the first user line of the
//! transcript; this module strips it so the conversation starts clean.
//!
//! # Matching
//!
//! At most one line is removed: the first line that parses as a JSON object
//! with `"type": "user"` whose content equals the sentinel exactly, in either
//! of the two shapes Claude Code writes:
//!
//! ```text
//! {"type":"user","message":{"role":"user","content":"KAMUI_INIT_MESSAGE"}, ...}
//! {"type":"user","content":"KAMUI_INIT_MESSAGE", ...}
//! ```
//!
//! Every other byte of the file is preserved, in order. Lines that don't
//! parse are kept verbatim. When no line matches the file is not rewritten.

use std::io::Write;
use std::path::Path;

use fs_err as fs;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{KamuiError, Result};

/// Removes the first sentinel line from `transcript_path`.
///
/// Returns `Ok(true)` if a line was removed, `Ok(false)` if none matched.
pub fn remove_sentinel(transcript_path: &Path, sentinel: &str) -> Result<bool> {
    let content = match fs::read(transcript_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(KamuiError::TranscriptNotFound(transcript_path.to_path_buf()))
        }
        Err(e) => return Err(KamuiError::io("reading transcript", e)),
    };

    let Some(range) = find_sentinel_line(&content, sentinel) else {
        return Ok(false);
    };

    let mut cleaned = Vec::with_capacity(content.len() - range.len());
    cleaned.extend_from_slice(&content[..range.start]);
    cleaned.extend_from_slice(&content[range.end..]);

    write_atomically(transcript_path, &cleaned)?;
    tracing::debug!(path = %transcript_path.display(), "Removed sentinel line from transcript");
    Ok(true)
}

/// Byte range of the first matching line, including its trailing newline.
fn find_sentinel_line(content: &[u8], sentinel: &str) -> Option<std::ops::Range<usize>> {
    let mut start = 0;
    while start < content.len() {
        let end = content[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| start + i + 1)
            .unwrap_or(content.len());

        let line = trim_line_ending(&content[start..end]);
        if is_sentinel_line(line, sentinel) {
            return Some(start..end);
        }
        start = end;
    }
    None
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_sentinel_line(line: &[u8], sentinel: &str) -> bool {
    let Ok(value) = serde_json::from_slice::<Value>(line) else {
        return false;
    };

    if value.get("type").and_then(Value::as_str) != Some("user") {
        return false;
    }

    let nested = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str);
    let flat = value.get("content").and_then(Value::as_str);

    nested == Some(sentinel) || flat == Some(sentinel)
}

fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        KamuiError::io(
            "rewriting transcript",
            std::io::Error::other(format!("{} has no parent directory", path.display())),
        )
    })?;

    let mut temp_file = NamedTempFile::new_in(parent)
        .map_err(|e| KamuiError::io("creating temp transcript", e))?;
    temp_file
        .write_all(content)
        .map_err(|e| KamuiError::io("writing temp transcript", e))?;
    temp_file
        .flush()
        .map_err(|e| KamuiError::io("flushing temp transcript", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| KamuiError::io("syncing temp transcript", e))?;

    // Keep Claude's original permissions on the rewritten file.
    if let Ok(metadata) = fs::metadata(path) {
        if let Err(e) = fs::set_permissions(temp_file.path(), metadata.permissions()) {
            tracing::debug!(
                path = %path.display(),
                error = %e,
                "Could not copy transcript permissions"
            );
        }
    }

    temp_file
        .persist(path)
        .map_err(|e| KamuiError::io("replacing transcript", e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SENTINEL: &str = "KAMUI_INIT_MESSAGE";

    fn nested(content: &str) -> String {
        format!(
            r#"{{"type":"user","message":{{"role":"user","content":"{}"}},"sessionId":"s1"}}"#,
            content
        )
    }

    fn flat(content: &str) -> String {
        format!(r#"{{"type":"user","content":"{}"}}"#, content)
    }

    fn assistant(content: &str) -> String {
        format!(
            r#"{{"type":"assistant","message":{{"role":"assistant","content":"{}"}}}}"#,
            content
        )
    }

    fn write(temp: &TempDir, lines: &[String]) -> std::path::PathBuf {
        let path = temp.path().join("t.jsonl");
        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(&path, content).unwrap();
        path
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_leading_sentinel_removed() {
        let temp = TempDir::new().unwrap();
        let x = assistant("hello");
        let y = nested("real question");
        let path = write(&temp, &[nested(SENTINEL), x.clone(), y.clone()]);

        assert!(remove_sentinel(&path, SENTINEL).unwrap());
        assert_eq!(read_lines(&path), vec![x, y]);
    }

    #[test]
    fn test_middle_sentinel_removed() {
        let temp = TempDir::new().unwrap();
        let x = r#"{"type":"summary","summary":"x"}"#.to_string();
        let y = assistant("ok");
        let path = write(&temp, &[x.clone(), flat(SENTINEL), y.clone()]);

        assert!(remove_sentinel(&path, SENTINEL).unwrap());
        assert_eq!(read_lines(&path), vec![x, y]);
    }

    #[test]
    fn test_no_sentinel_leaves_bytes_unchanged() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("t.jsonl");
        let original = b"{\"type\":\"user\",\"content\":\"hi\"}\r\nnot json at all\n\xff\xfe raw\n";
        std::fs::write(&path, original).unwrap();

        assert!(!remove_sentinel(&path, SENTINEL).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn test_only_first_sentinel_removed() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, &[nested(SENTINEL), nested(SENTINEL)]);

        assert!(remove_sentinel(&path, SENTINEL).unwrap());
        assert_eq!(read_lines(&path), vec![nested(SENTINEL)]);
    }

    #[test]
    fn test_second_call_is_noop() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, &[nested(SENTINEL), assistant("hi")]);

        assert!(remove_sentinel(&path, SENTINEL).unwrap());
        let after_first = std::fs::read(&path).unwrap();
        assert!(!remove_sentinel(&path, SENTINEL).unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), after_first);
    }

    #[test]
    fn test_lookalikes_and_other_roles_are_kept() {
        let temp = TempDir::new().unwrap();
        let lines = vec![
            assistant(SENTINEL),
            nested("KAMUI_INIT_MESSAGE "),
            flat("kamui_init_message"),
            nested("please echo KAMUI_INIT_MESSAGE"),
            format!("garbage {}", SENTINEL),
        ];
        let path = write(&temp, &lines);

        assert!(!remove_sentinel(&path, SENTINEL).unwrap());
        assert_eq!(read_lines(&path), lines);
    }

    #[test]
    fn test_unparseable_lines_preserved_around_removal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("t.jsonl");
        let content = format!("{{broken\n{}\n\u{1F600} tail", nested(SENTINEL));
        std::fs::write(&path, content).unwrap();

        assert!(remove_sentinel(&path, SENTINEL).unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{broken\n\u{1F600} tail"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_permissions_and_leaves_no_temp_files() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = write(&temp, &[nested(SENTINEL), assistant("ok")]);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        assert!(remove_sentinel(&path, SENTINEL).unwrap());
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_transcript_is_an_error() {
        let temp = TempDir::new().unwrap();
        let err = remove_sentinel(&temp.path().join("missing.jsonl"), SENTINEL).unwrap_err();
        assert!(matches!(err, KamuiError::TranscriptNotFound(_)));
    }
}

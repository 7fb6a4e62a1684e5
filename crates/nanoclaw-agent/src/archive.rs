use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};

use nanoclaw_core::write_text_atomic;

use crate::sdk::TranscriptEntry;

const ARCHIVE_MESSAGE_CHAR_CAP: usize = 2_000;

/// Writes the transcript as a dated Markdown file under
/// `<conversations_dir>`, truncating each message to 2 000 characters.
/// Invoked just before the SDK compacts conversation history; callers
/// treat failure as non-fatal.
pub fn archive_transcript(
    conversations_dir: &Path,
    entries: &[TranscriptEntry],
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let file_name = format!("{}-transcript.md", now.format("%Y-%m-%d-%H%M%S"));
    let path = conversations_dir.join(file_name);

    let mut body = format!("# Conversation archive {}\n", now.format("%Y-%m-%d %H:%M:%S UTC"));
    for entry in entries {
        body.push_str("\n## ");
        body.push_str(entry.role.as_str());
        body.push_str("\n\n");
        body.push_str(&truncate_chars(&entry.text, ARCHIVE_MESSAGE_CHAR_CAP));
        body.push('\n');
    }

    write_text_atomic(&path, &body)?;
    Ok(path)
}

fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(cap).collect();
    truncated.push_str("…");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::TranscriptRole;
    use chrono::TimeZone;

    fn entries() -> Vec<TranscriptEntry> {
        vec![
            TranscriptEntry {
                role: TranscriptRole::User,
                text: "please add a cache".to_string(),
            },
            TranscriptEntry {
                role: TranscriptRole::Assistant,
                text: "a".repeat(2_500),
            },
        ]
    }

    #[test]
    fn functional_archive_writes_dated_markdown_with_truncated_messages() {
        let temp = tempfile::tempdir().expect("tempdir");
        let when = Utc.with_ymd_and_hms(2026, 8, 1, 12, 30, 45).unwrap();
        let path = archive_transcript(temp.path(), &entries(), when).expect("archive");

        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some("2026-08-01-123045-transcript.md")
        );
        let body = std::fs::read_to_string(&path).expect("read");
        assert!(body.contains("## user"));
        assert!(body.contains("please add a cache"));
        assert!(body.contains("## assistant"));
        // The long assistant message is capped at 2 000 chars plus the
        // ellipsis marker.
        let assistant_section = body.split("## assistant").nth(1).expect("section");
        assert!(assistant_section.matches('a').count() <= 2_000);
        assert!(assistant_section.contains('…'));
    }

    #[test]
    fn unit_archive_of_empty_transcript_still_produces_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let when = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let path = archive_transcript(temp.path(), &[], when).expect("archive");
        assert!(path.exists());
    }
}

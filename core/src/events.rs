//! Transcript event schema and the append-only JSONL writer.
//!
//! One session maps to one file at `<data-root>/sessions/<session-id>.jsonl`,
//! one JSON object per line. The schema is strict: an unknown kind or a
//! missing required field fails (de)serialization, and readers report the
//! offending line number instead of skipping.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::error::LinconaErr;
use crate::error::Result;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Kind-tagged transcript entry payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventPayload {
    System {
        message: String,
    },
    UserMessage {
        text: String,
    },
    AssistantDelta {
        index: u32,
        text: String,
    },
    AssistantMessage {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool: String,
        arguments: String,
    },
    ToolResult {
        call_id: String,
        success: bool,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        truncated: bool,
    },
    SlashCommand {
        command: String,
    },
    TruncationNotice {
        call_id: String,
    },
    Error {
        #[serde(rename = "error-kind")]
        kind: String,
        message: String,
    },
}

/// A persisted transcript entry: payload plus its RFC 3339 UTC timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Append-only writer for one session transcript.
pub struct EventWriter {
    // `None` once closed; appends after close are a fatal misuse.
    out: Option<BufWriter<File>>,
    path: PathBuf,
    last_ts: DateTime<Utc>,
    appends_since_sync: u32,
    fsync_every: Option<u32>,
}

impl EventWriter {
    /// Open (append, create) the transcript for `session_id` under
    /// `sessions_dir`, creating the directory if needed. With
    /// `fsync_every = Some(n)` the file is fsynced after every `n` appends.
    pub fn open(sessions_dir: &Path, session_id: &str, fsync_every: Option<u32>) -> Result<Self> {
        std::fs::create_dir_all(sessions_dir)?;
        let path = sessions_dir.join(format!("{session_id}.jsonl"));
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        options.mode(0o600);
        let file = options.open(&path)?;
        Ok(Self {
            out: Some(BufWriter::new(file)),
            path,
            last_ts: DateTime::<Utc>::MIN_UTC,
            appends_since_sync: 0,
            fsync_every,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stamp `payload` with a monotonic wall-clock timestamp, serialize it to
    /// one line and append it. Returns the persisted event.
    pub fn append(&mut self, payload: EventPayload) -> Result<Event> {
        let ts = Utc::now().max(self.last_ts);
        let event = Event { ts, payload };
        self.append_event(&event)?;
        Ok(event)
    }

    /// Append an already-stamped event (used when replaying).
    pub fn append_event(&mut self, event: &Event) -> Result<()> {
        let Some(out) = self.out.as_mut() else {
            return Err(LinconaErr::Fatal("append on a closed event writer".to_string()));
        };
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        out.write_all(line.as_bytes())?;
        self.last_ts = event.ts;
        self.appends_since_sync += 1;
        if let Some(every) = self.fsync_every
            && self.appends_since_sync >= every
        {
            self.sync()?;
        }
        Ok(())
    }

    /// Flush buffered lines and force OS-level durability.
    pub fn sync(&mut self) -> Result<()> {
        if let Some(out) = self.out.as_mut() {
            out.flush()?;
            out.get_ref().sync_all()?;
            self.appends_since_sync = 0;
        }
        Ok(())
    }

    /// Flush and release the file handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.out.is_some() {
            self.sync()?;
            self.out = None;
        }
        Ok(())
    }
}

/// Validating reader over a session transcript. Each item is either a parsed
/// [`Event`] or an error naming the 1-based line it came from.
pub struct EventIter {
    lines: std::io::Lines<BufReader<File>>,
    line_number: usize,
}

pub fn iter_events(path: &Path) -> Result<EventIter> {
    let file = File::open(path)?;
    Ok(EventIter {
        lines: BufReader::new(file).lines(),
        line_number: 0,
    })
}

impl Iterator for EventIter {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.next()?;
        self.line_number += 1;
        let line_number = self.line_number;
        Some(match line {
            Ok(line) => serde_json::from_str::<Event>(&line).map_err(|e| {
                LinconaErr::Parse(format!("transcript line {line_number}: {e}"))
            }),
            Err(e) => Err(LinconaErr::Parse(format!(
                "transcript line {line_number}: {e}"
            ))),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn sample_payloads() -> Vec<EventPayload> {
        vec![
            EventPayload::System {
                message: "session started".to_string(),
            },
            EventPayload::UserMessage {
                text: "list the files".to_string(),
            },
            EventPayload::ToolCall {
                call_id: "call_1".to_string(),
                tool: "list_dir".to_string(),
                arguments: "{\"path\":\".\"}".to_string(),
            },
            EventPayload::ToolResult {
                call_id: "call_1".to_string(),
                success: true,
                content: "src/".to_string(),
                truncated: false,
            },
            EventPayload::AssistantMessage {
                text: "done".to_string(),
            },
        ]
    }

    #[test]
    fn round_trips_in_order() {
        let dir = tempdir().unwrap();
        let mut writer = EventWriter::open(dir.path(), "s1", None).unwrap();
        let mut written = Vec::new();
        for payload in sample_payloads() {
            written.push(writer.append(payload).unwrap());
        }
        writer.close().unwrap();

        let read: Vec<Event> = iter_events(&dir.path().join("s1.jsonl"))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn timestamps_never_regress() {
        let dir = tempdir().unwrap();
        let mut writer = EventWriter::open(dir.path(), "s2", None).unwrap();
        for payload in sample_payloads() {
            writer.append(payload).unwrap();
        }
        writer.close().unwrap();

        let events: Vec<Event> = iter_events(&dir.path().join("s2.jsonl"))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        for pair in events.windows(2) {
            assert!(pair[1].ts >= pair[0].ts);
        }
    }

    #[test]
    fn unknown_kind_fails_with_line_number() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(
            &path,
            "{\"ts\":\"2026-08-01T00:00:00Z\",\"kind\":\"user-message\",\"text\":\"ok\"}\n\
             {\"ts\":\"2026-08-01T00:00:01Z\",\"kind\":\"telepathy\",\"vibes\":1}\n",
        )
        .unwrap();
        let mut iter = iter_events(&path).unwrap();
        assert!(iter.next().unwrap().is_ok());
        let err = iter.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("line 2"), "got: {err}");
    }

    #[test]
    fn missing_field_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.jsonl");
        std::fs::write(&path, "{\"ts\":\"2026-08-01T00:00:00Z\",\"kind\":\"tool-call\"}\n").unwrap();
        let mut iter = iter_events(&path).unwrap();
        assert!(iter.next().unwrap().is_err());
    }

    #[test]
    fn append_after_close_is_fatal() {
        let dir = tempdir().unwrap();
        let mut writer = EventWriter::open(dir.path(), "s3", None).unwrap();
        writer.close().unwrap();
        let err = writer
            .append(EventPayload::System {
                message: "late".to_string(),
            })
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn fsync_every_counts_appends() {
        let dir = tempdir().unwrap();
        let mut writer = EventWriter::open(dir.path(), "s4", Some(2)).unwrap();
        for payload in sample_payloads() {
            writer.append(payload).unwrap();
        }
        writer.close().unwrap();
        let count = iter_events(&dir.path().join("s4.jsonl")).unwrap().count();
        assert_eq!(count, 5);
    }
}

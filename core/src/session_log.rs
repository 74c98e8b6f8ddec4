//! Per-session plaintext log with a byte cap that keeps the tail.
//!
//! This is the operator-facing log referenced by user-visible error messages;
//! it is separate from the `tracing` diagnostics stream the front-end wires
//! up. One file per session at `<data-root>/logs/<session-id>.log`.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use chrono::SecondsFormat;
use chrono::Utc;
use strum_macros::Display;
use strum_macros::EnumString;
use tracing::warn;

/// Default size cap: 5 MiB.
pub const DEFAULT_MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub struct SessionLogger {
    file: Option<File>,
    path: PathBuf,
    warned_unknown_level: bool,
}

impl SessionLogger {
    /// Open the log for `session_id` under `logs_dir`. When the existing file
    /// exceeds `max_bytes` (pass `None` to disable the cap) it is truncated to
    /// its last `max_bytes` bytes first, re-aligned to the next line boundary
    /// when one exists in the kept range.
    pub fn open(logs_dir: &Path, session_id: &str, max_bytes: Option<u64>) -> io::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(format!("{session_id}.log"));

        if let Some(max_bytes) = max_bytes
            && let Ok(meta) = std::fs::metadata(&path)
            && meta.len() > max_bytes
        {
            truncate_to_tail(&path, max_bytes)?;
        }

        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(Self {
            file: Some(file),
            path,
            warned_unknown_level: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a timestamped record at the level named by `level`. Unknown level
    /// strings downgrade to INFO and emit a single warning per logger.
    pub fn log(&mut self, level: &str, message: &str) -> io::Result<()> {
        let level = match level.parse::<LogLevel>() {
            Ok(level) => level,
            Err(_) => {
                if !self.warned_unknown_level {
                    self.warned_unknown_level = true;
                    warn!(level, "unknown log level, downgrading to INFO");
                    self.log_at(LogLevel::Warn, &format!("unknown log level '{level}'"))?;
                }
                LogLevel::Info
            }
        };
        self.log_at(level, message)
    }

    pub fn log_at(&mut self, level: LogLevel, message: &str) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let record = format!("{ts} {level:5} {message}\n");
        file.write_all(record.as_bytes())
    }

    /// Flush and release the handle. Idempotent.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Rewrite `path` keeping only its last `max_bytes` bytes.
fn truncate_to_tail(path: &Path, max_bytes: u64) -> io::Result<()> {
    let contents = std::fs::read(path)?;
    let keep_from = contents.len().saturating_sub(max_bytes as usize);
    let mut tail = &contents[keep_from..];
    // Start on a fresh record when the kept range contains a newline.
    if keep_from > 0
        && let Some(nl) = tail.iter().position(|&b| b == b'\n')
        && nl + 1 < tail.len()
    {
        tail = &tail[nl + 1..];
    }
    std::fs::write(path, tail)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_timestamped_records() {
        let dir = tempdir().unwrap();
        let mut logger = SessionLogger::open(dir.path(), "s1", None).unwrap();
        logger.log("info", "hello").unwrap();
        logger.close().unwrap();
        let contents = std::fs::read_to_string(dir.path().join("s1.log")).unwrap();
        assert!(contents.contains("INFO"));
        assert!(contents.contains("hello"));
    }

    #[test]
    fn unknown_level_downgrades_with_single_warning() {
        let dir = tempdir().unwrap();
        let mut logger = SessionLogger::open(dir.path(), "s2", None).unwrap();
        logger.log("shouty", "first").unwrap();
        logger.log("shouty", "second").unwrap();
        logger.close().unwrap();
        let contents = std::fs::read_to_string(dir.path().join("s2.log")).unwrap();
        assert_eq!(contents.matches("unknown log level").count(), 1);
        assert_eq!(contents.matches("INFO").count(), 2);
    }

    #[test]
    fn oversized_log_keeps_the_tail_on_reopen() {
        let dir = tempdir().unwrap();
        let max = 64 * 1024u64;
        {
            let mut logger = SessionLogger::open(dir.path(), "s3", Some(max)).unwrap();
            for i in 0..4096 {
                logger.log_at(LogLevel::Info, &format!("record {i:04}")).unwrap();
            }
            logger.close().unwrap();
        }
        assert!(std::fs::metadata(dir.path().join("s3.log")).unwrap().len() > max);

        let logger = SessionLogger::open(dir.path(), "s3", Some(max)).unwrap();
        drop(logger);
        let contents = std::fs::read_to_string(dir.path().join("s3.log")).unwrap();
        assert!(contents.len() as u64 <= max);
        // The newest records survive, the oldest do not.
        assert!(contents.contains("record 4095"));
        assert!(!contents.contains("record 0000"));
        // The kept tail starts on a record boundary.
        assert!(contents.starts_with("20"));
    }

    #[test]
    fn cap_can_be_disabled() {
        let dir = tempdir().unwrap();
        {
            let mut logger = SessionLogger::open(dir.path(), "s4", None).unwrap();
            for _ in 0..64 {
                logger.log_at(LogLevel::Info, "data").unwrap();
            }
            logger.close().unwrap();
        }
        let before = std::fs::metadata(dir.path().join("s4.log")).unwrap().len();
        let logger = SessionLogger::open(dir.path(), "s4", None).unwrap();
        drop(logger);
        let after = std::fs::metadata(dir.path().join("s4.log")).unwrap().len();
        assert_eq!(before, after);
    }
}

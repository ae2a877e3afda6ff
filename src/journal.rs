//! Session journal: the transcript of one run.
//!
//! Every entry is mirrored to the `log` facade as it happens and kept in memory
//! so the whole session can be appended to the persistent log file and mailed
//! once at the end. The journal is passed explicitly through the stages; there
//! is no global transcript.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::consts::JOURNAL_TS_FORMAT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Warning,
    Error,
    /// Protected-media integrity risk; reported through the alert channel.
    Critical,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub at: NaiveDateTime,
    pub level: Level,
    pub message: String,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.at.format(JOURNAL_TS_FORMAT),
            self.level,
            self.message
        )
    }
}

/// Text handed to `log`: the logger prints ERROR itself, so only CRITICAL
/// carries its own tag.
fn mirrored(level: Level, message: &str) -> String {
    match level {
        Level::Critical => format!("[{}] {}", level, message),
        _ => message.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<Entry>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, level: Level, message: impl Into<String>) {
        let message = message.into();
        let line = mirrored(level, &message);
        match level {
            Level::Info => log::info!("{}", line),
            Level::Warning => log::warn!("{}", line),
            Level::Error | Level::Critical => log::error!("{}", line),
        }
        self.entries.push(Entry {
            at: Local::now().naive_local(),
            level,
            message,
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(Level::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(Level::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(Level::Error, message);
    }

    pub fn critical(&mut self, message: impl Into<String>) {
        self.record(Level::Critical, message);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn count(&self, level: Level) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    pub fn has_critical(&self) -> bool {
        self.count(Level::Critical) > 0
    }

    /// Highest level recorded so far.
    pub fn worst(&self) -> Level {
        self.entries
            .iter()
            .map(|e| e.level)
            .max()
            .unwrap_or(Level::Info)
    }

    pub fn messages(&self, level: Level) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.message.as_str())
            .collect()
    }

    /// One `[timestamp] [LEVEL] message` line per entry.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            out.push_str(&e.to_string());
            out.push('\n');
        }
        out
    }

    /// Append the transcript to the persistent log file.
    pub fn append_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("create {}", dir.display()))?;
            }
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log {}", path.display()))?;
        f.write_all(self.render().as_bytes())
            .with_context(|| format!("append log {}", path.display()))?;
        Ok(())
    }
}

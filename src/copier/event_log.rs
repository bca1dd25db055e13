//! Append-only session event log, capped at 50 entries.
//!
//! Every noteworthy session outcome (authorizations, copy toggles, API
//! errors, connection loss) lands here, and the oldest entries fall off
//! once the cap is reached. Pushes also emit `tracing` records so the log
//! shows up live; the retained entries are printed when the session ends.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};

/// Maximum number of retained entries.
pub const EVENT_LOG_CAP: usize = 50;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Success,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Success => "ok",
            EventLevel::Error => "error",
        }
    }
}

/// A single timestamped entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
}

/// Capped FIFO of session events.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(EventLevel::Info, message.into());
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(EventLevel::Success, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(EventLevel::Error, message.into());
    }

    fn push(&mut self, level: EventLevel, message: String) {
        match level {
            EventLevel::Info => tracing::info!("{}", message),
            EventLevel::Success => tracing::info!("{}", message),
            EventLevel::Error => tracing::warn!("{}", message),
        }

        self.entries.push_back(LogEntry {
            at: Utc::now(),
            level,
            message,
        });
        while self.entries.len() > EVENT_LOG_CAP {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

impl fmt::Display for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(
                f,
                "[{}] {:<5} {}",
                entry.at.format("%H:%M:%S"),
                entry.level.as_str(),
                entry.message
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_evicts_oldest() {
        let mut log = EventLog::new();
        for i in 0..60 {
            log.info(format!("entry {}", i));
        }

        assert_eq!(log.len(), EVENT_LOG_CAP);
        let first = log.entries().next().unwrap();
        assert_eq!(first.message, "entry 10");
    }

    #[test]
    fn test_levels() {
        let mut log = EventLog::new();
        log.success("started");
        log.error("boom");

        let levels: Vec<_> = log.entries().map(|e| e.level).collect();
        assert_eq!(levels, vec![EventLevel::Success, EventLevel::Error]);
    }
}

//! Retained line history and trace export

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A line as it was shown to the user
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    /// Arrival time
    pub timestamp: DateTime<Local>,
    /// Line text without terminator
    pub text: String,
    /// Match verdict
    pub matched: bool,
}

impl HistoryEntry {
    /// Format as one trace line
    pub fn to_text(&self, show_timestamp: bool) -> String {
        let mark = if self.matched { '*' } else { ' ' };
        if show_timestamp {
            format!(
                "[{}] {} {}",
                self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                mark,
                self.text
            )
        } else {
            format!("{} {}", mark, self.text)
        }
    }
}

/// Bounded history; the oldest entries go first
#[derive(Debug)]
pub struct LineHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl LineHistory {
    /// Keep at most `limit` lines; 0 disables retention
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    /// Record a line
    pub fn push(&mut self, text: &str, matched: bool) {
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            timestamp: Local::now(),
            text: text.to_string(),
            matched,
        });
    }

    /// Copy of the retained entries, oldest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Number of retained lines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is retained
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Write every entry as one text line
    pub fn write_to<W: Write>(&self, writer: &mut W, show_timestamp: bool) -> std::io::Result<()> {
        for entry in &self.entries {
            writeln!(writer, "{}", entry.to_text(show_timestamp))?;
        }
        writer.flush()
    }

    /// Save traces to a file, replacing it
    pub fn save(&self, path: &Path, show_timestamp: bool) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer, show_timestamp)
    }
}

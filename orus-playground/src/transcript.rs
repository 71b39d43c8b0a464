use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Error,
    Info,
    Success,
    Warning,
}

impl Severity {
    /// Heuristic used for runtime output: a line mentioning "error" or
    /// "exception" in any case is shown as an error.
    pub fn classify(line: &str) -> Self {
        let lower = line.to_lowercase();
        if lower.contains("error") || lower.contains("exception") {
            Severity::Error
        } else {
            Severity::Normal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Error => "error",
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub id: u64,
    pub content: String,
    pub severity: Severity,
    pub created_at_ms: u64,
}

/// Append-only run log. Identifiers keep increasing across `clear()` so
/// a view keyed on them never sees a reused id.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    lines: Vec<OutputLine>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, content: impl Into<String>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.lines.push(OutputLine {
            id,
            content: content.into(),
            severity,
            created_at_ms: now_ms(),
        });
        id
    }

    /// One line per non-blank line of `text`, each classified with
    /// [`Severity::classify`]. Returns how many lines were added.
    pub fn push_output(&mut self, text: &str) -> usize {
        self.push_lines(text, Severity::classify)
    }

    /// Like [`push_output`](Self::push_output) but every line gets the
    /// same severity.
    pub fn push_all(&mut self, text: &str, severity: Severity) -> usize {
        self.push_lines(text, |_| severity)
    }

    fn push_lines(&mut self, text: &str, severity_of: impl Fn(&str) -> Severity) -> usize {
        let mut added = 0;
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            self.push(severity_of(line), line);
            added += 1;
        }
        added
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[OutputLine] {
        &self.lines
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

use serde::Serialize;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogSeverity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl Display for LogSeverity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub severity: LogSeverity,
    pub message: String,
}

/// Ordered log of a parse call. Stage decoders add entries; the pipeline reads
/// the error labels to classify the outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LogContainer {
    entries: Vec<LogEntry>,
}

impl LogContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: LogSeverity, message: impl Into<String>) {
        self.entries.push(LogEntry {
            severity,
            message: message.into(),
        });
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.push(LogSeverity::Debug, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogSeverity::Info, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(LogSeverity::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogSeverity::Error, message);
    }

    pub fn critical(&mut self, message: impl Into<String>) {
        self.push(LogSeverity::Critical, message);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self, severity: LogSeverity) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |entry| entry.severity == severity)
            .map(|entry| entry.message.as_str())
    }

    pub fn contains(&self, severity: LogSeverity, message: &str) -> bool {
        self.messages(severity).any(|logged| logged == message)
    }

    pub fn has_error(&self, message: &str) -> bool {
        self.contains(LogSeverity::Error, message)
    }

    pub fn extend(&mut self, other: LogContainer) {
        self.entries.extend(other.entries);
    }

    /// Forwards the entries to `tracing`, skipping messages in `ignore`.
    pub fn emit(&self, ignore: &[String]) {
        for entry in &self.entries {
            if ignore.iter().any(|skipped| skipped == &entry.message) {
                continue;
            }
            match entry.severity {
                LogSeverity::Debug => tracing::debug!("{}", entry.message),
                LogSeverity::Info => tracing::info!("{}", entry.message),
                LogSeverity::Warning => tracing::warn!("{}", entry.message),
                LogSeverity::Error | LogSeverity::Critical => {
                    tracing::error!(severity = %entry.severity, "{}", entry.message)
                }
            }
        }
    }
}

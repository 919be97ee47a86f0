//! Processing log
//!
//! Every run returns a [`ProcessingLog`] holding the errors and warnings it
//! recorded. Entries are mirrored to `tracing` as they are added.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Warning => write!(f, "warning: {}", self.message),
            Severity::Error => write!(f, "error: {}", self.message),
        }
    }
}

/// Receives errors as they are recorded
pub trait ErrorHandler: Send + Sync {
    fn handle_error(&self, entry: &LogEntry);
}

impl<F: Fn(&LogEntry) + Send + Sync> ErrorHandler for F {
    fn handle_error(&self, entry: &LogEntry) {
        self(entry)
    }
}

/// Errors and warnings recorded during a run
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProcessingLog {
    entries: Vec<LogEntry>,
    #[serde(skip)]
    handler: Option<Arc<dyn ErrorHandler>>,
}

impl fmt::Debug for ProcessingLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingLog")
            .field("entries", &self.entries)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl PartialEq for ProcessingLog {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl ProcessingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(handler: Arc<dyn ErrorHandler>) -> Self {
        Self {
            entries: Vec::new(),
            handler: Some(handler),
        }
    }

    pub fn set_handler(&mut self, handler: Arc<dyn ErrorHandler>) {
        self.handler = Some(handler);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let entry = LogEntry {
            severity: Severity::Error,
            message: message.into(),
        };
        tracing::error!("{}", entry.message);
        if let Some(handler) = &self.handler {
            handler.handle_error(&entry);
        }
        self.entries.push(entry);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        let entry = LogEntry {
            severity: Severity::Warning,
            message: message.into(),
        };
        tracing::warn!("{}", entry.message);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn errors(&self) -> Vec<&str> {
        self.messages(Severity::Error)
    }

    pub fn warnings(&self) -> Vec<&str> {
        self.messages(Severity::Warning)
    }

    fn messages(&self, severity: Severity) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.severity == severity)
            .map(|e| e.message.as_str())
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Warning)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append the entries of another log. They were already traced when
    /// first recorded, only the handler sees them again.
    pub fn merge(&mut self, other: ProcessingLog) {
        for entry in other.entries {
            if entry.severity == Severity::Error {
                if let Some(handler) = &self.handler {
                    handler.handle_error(&entry);
                }
            }
            self.entries.push(entry);
        }
    }

    /// Turn a log with errors into [`Error::Processing`]
    pub fn into_result(self) -> Result<Self> {
        let (count, first) = {
            let errors = self.errors();
            (errors.len(), errors.first().map(|e| e.to_string()))
        };
        match first {
            Some(first) => Err(Error::Processing { count, first }),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_errors_and_warnings() {
        let mut log = ProcessingLog::new();
        assert!(log.is_empty());
        log.warning("texture not found");
        assert!(!log.has_errors());
        assert!(log.has_warnings());
        log.error("T-junction removal requires welding to be enabled");
        assert_eq!(log.errors(), vec!["T-junction removal requires welding to be enabled"]);
        assert_eq!(log.warnings().len(), 1);

        match log.into_result() {
            Err(Error::Processing { count, .. }) => assert_eq!(count, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_handler_sees_errors_only() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut log = ProcessingLog::with_handler(Arc::new(move |_: &LogEntry| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        log.warning("w");
        log.error("e");
        let mut other = ProcessingLog::new();
        other.error("from worker");
        log.merge(other);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(log.entries().len(), 3);
    }

    #[test]
    fn test_serde_skips_handler() {
        let mut log = ProcessingLog::with_handler(Arc::new(|_: &LogEntry| {}));
        log.error("bad");
        let json = serde_json::to_string(&log).unwrap();
        let back: ProcessingLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
    }
}

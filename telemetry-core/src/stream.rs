//! Live log stream types
//!
//! The server pushes [`StreamMessage`] envelopes; the consumer turns them
//! into [`StreamEvent`]s for its subscribers.

use serde::{Deserialize, Serialize};

use crate::log::{non_empty, LogEntry};

// ============================================================================
// Filter
// ============================================================================

/// Live stream filter.
///
/// `log_type` and `level` are sent to the server as connect parameters;
/// `search_term` is evaluated client-side only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
}

impl StreamFilter {
    pub fn with_log_type(mut self, log_type: impl Into<String>) -> Self {
        self.log_type = Some(log_type.into());
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn with_search_term(mut self, term: impl Into<String>) -> Self {
        self.search_term = Some(term.into());
        self
    }

    /// Parameters sent on connect; omitted means "all"
    pub fn connect_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(t) = non_empty(&self.log_type) {
            params.push(("log_type", t.to_string()));
        }
        if let Some(l) = non_empty(&self.level) {
            params.push(("level", l.to_string()));
        }
        params
    }

    /// Lowercased search needle, if a non-empty search term is set
    pub fn search_needle(&self) -> Option<String> {
        non_empty(&self.search_term).map(str::to_lowercase)
    }

    /// Client-side admission test. Level is never checked here.
    pub fn admits(&self, entry: &LogEntry) -> bool {
        match self.search_needle() {
            Some(needle) => entry.matches_search(&needle),
            None => true,
        }
    }
}

// ============================================================================
// Wire envelope
// ============================================================================

/// Message pushed by the server: either an entry or an in-band error
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamMessage {
    pub fn entry(entry: LogEntry) -> Self {
        Self {
            entry: Some(entry),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            entry: None,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Consumer events
// ============================================================================

/// Events delivered to stream subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Transport opened
    Connected,
    /// Entry accepted into the live buffer
    Entry(LogEntry),
    /// Server-reported error; the connection stays open
    Error(String),
    /// Transport ended. No reconnect is attempted.
    Disconnected { error: Option<String> },
}

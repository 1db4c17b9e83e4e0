//! Error types for the telemetry layer
//!
//! Every service surfaces failures as [`TelemetryError`]. Services record the
//! rendered message as a dismissible error on the region that failed, so the
//! `Display` text is what the dashboard shows.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    /// Non-2xx response from the telemetry API other than 401/404
    #[error("API error: {0}")]
    Api(String),

    /// Transport failure: connect, timeout, dropped socket
    #[error("Network error: {0}")]
    Network(String),

    /// Missing or rejected bearer token
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Response body or stream frame that does not decode
    #[error("Parse error: {0}")]
    Parse(String),

    /// 404 from the API. Historical queries turn this into an empty page.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Key/value store could not be opened, read or written
    #[error("Storage error: {0}")]
    Storage(String),
}

impl TelemetryError {
    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

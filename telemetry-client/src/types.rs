//! Wire response shapes that are not part of the core data model

use serde::Deserialize;
use telemetry_core::LogEntry;

/// Response of the historical query endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQueryResponse {
    #[serde(default)]
    pub entries: Vec<LogEntry>,
}

/// API paths, relative to the base URL
pub(crate) mod paths {
    pub const LOG_OVERVIEW: &str = "/api/logs";
    pub const LOG_QUERY: &str = "/api/logs/query";
    pub const LOG_DOWNLOAD: &str = "/api/logs/download";
    pub const LOG_STREAM: &str = "/api/logs/stream";
    pub const HOLIDAYS: &str = "/api/market/holidays";
    pub const DASHBOARD_SUMMARY: &str = "/api/dashboard/summary";
    pub const POSITIONS: &str = "/api/positions";
    pub const TRADES: &str = "/api/trades";
    pub const STRATEGIES: &str = "/api/strategies";
}

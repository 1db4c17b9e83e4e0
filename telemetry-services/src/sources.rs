//! Collaborator seams
//!
//! Services depend on these traits rather than on the concrete client so
//! they can run against mocks. The API client implements all of them.

use async_trait::async_trait;
use telemetry_client::{LogFrames, LogStreamTransport, TelemetryClient};
use telemetry_core::{
    DashboardSummary, HolidaySet, LogEntry, LogExport, LogOverview, LogQuery, Position,
    StrategyStatus, StreamFilter, TelemetryResult, TradeRecord,
};

/// Opens live log connections
#[async_trait]
pub trait LogTransport: Send + Sync + 'static {
    /// Connect with the filter's server-side parameters
    async fn connect(&self, filter: &StreamFilter) -> TelemetryResult<LogFrames>;
}

/// Stored log files
#[async_trait]
pub trait LogArchive: Send + Sync + 'static {
    async fn query(&self, query: &LogQuery) -> TelemetryResult<Vec<LogEntry>>;
    async fn overview(&self) -> TelemetryResult<LogOverview>;
    async fn download(&self, date: &str, log_type: Option<&str>) -> TelemetryResult<LogExport>;
}

/// The fixed batch of dashboard fetches
#[async_trait]
pub trait DashboardSource: Send + Sync + 'static {
    async fn summary(&self) -> TelemetryResult<DashboardSummary>;
    async fn positions(&self) -> TelemetryResult<Vec<Position>>;
    async fn recent_trades(&self, limit: u32) -> TelemetryResult<Vec<TradeRecord>>;
    async fn strategies(&self) -> TelemetryResult<Vec<StrategyStatus>>;
}

/// Exchange holiday list
#[async_trait]
pub trait HolidaySource: Send + Sync + 'static {
    /// Holidays are only fetched on authenticated access
    fn is_authenticated(&self) -> bool;
    async fn holidays(&self) -> TelemetryResult<HolidaySet>;
}

// ============================================================================
// API client implementations
// ============================================================================

#[async_trait]
impl LogTransport for LogStreamTransport {
    async fn connect(&self, filter: &StreamFilter) -> TelemetryResult<LogFrames> {
        LogStreamTransport::connect(self, filter).await
    }
}

#[async_trait]
impl LogArchive for TelemetryClient {
    async fn query(&self, query: &LogQuery) -> TelemetryResult<Vec<LogEntry>> {
        self.query_logs(query).await
    }

    async fn overview(&self) -> TelemetryResult<LogOverview> {
        self.log_overview().await
    }

    async fn download(&self, date: &str, log_type: Option<&str>) -> TelemetryResult<LogExport> {
        self.download_logs(date, log_type).await
    }
}

#[async_trait]
impl DashboardSource for TelemetryClient {
    async fn summary(&self) -> TelemetryResult<DashboardSummary> {
        self.dashboard_summary().await
    }

    async fn positions(&self) -> TelemetryResult<Vec<Position>> {
        TelemetryClient::positions(self).await
    }

    async fn recent_trades(&self, limit: u32) -> TelemetryResult<Vec<TradeRecord>> {
        TelemetryClient::recent_trades(self, limit).await
    }

    async fn strategies(&self) -> TelemetryResult<Vec<StrategyStatus>> {
        TelemetryClient::strategies(self).await
    }
}

#[async_trait]
impl HolidaySource for TelemetryClient {
    fn is_authenticated(&self) -> bool {
        TelemetryClient::is_authenticated(self)
    }

    async fn holidays(&self) -> TelemetryResult<HolidaySet> {
        TelemetryClient::holidays(self).await
    }
}

//! Core types for the trading dashboard telemetry layer
//!
//! This crate defines the shared data structures used across the telemetry
//! crates: log entries and descriptors, the live-stream envelope, dashboard
//! slices, and the pure market session clock.

pub mod dashboard;
pub mod error;
pub mod log;
pub mod market;
pub mod stream;

pub use dashboard::{DashboardSummary, Position, StrategyStatus, TradeRecord, TradeSide};
pub use error::{TelemetryError, TelemetryResult};
pub use log::{
    IdentityKey, LogEntry, LogExport, LogFile, LogLevel, LogOverview, LogQuery, LogStats,
    SizeBucket, DEFAULT_QUERY_LIMIT,
};
pub use market::{ClosedReason, HolidaySet, MarketClock, MarketSession};
pub use stream::{StreamEvent, StreamFilter, StreamMessage};

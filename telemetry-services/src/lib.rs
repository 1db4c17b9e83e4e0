//! Telemetry services for the trading dashboard
//!
//! This crate provides the stateful side of the telemetry layer: the live
//! log consumer, historical log queries, the durable holiday calendar cache
//! and the rate-limited refresh scheduler, plus the context object that
//! wires them to a single API client.

pub mod calendar;
pub mod context;
pub mod dashboard;
pub mod historical;
pub mod refresh_gate;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod stream_consumer;
pub mod ttl_cache;

pub use calendar::{CalendarCache, MarketCalendar, HOLIDAY_CACHE_KEY, HOLIDAY_CACHE_TTL_DAYS};
pub use context::{TelemetryConfig, TelemetryContext};
pub use dashboard::{DashboardSlice, DashboardState, SharedDashboard};
pub use historical::{ArchiveOperation, HistoricalQueryEngine, QueryOutcome};
pub use refresh_gate::{GateDecision, RefreshGate, RefreshGateStats};
pub use scheduler::{BatchReport, RefreshScheduler, SchedulerConfig, TickOutcome};
pub use sources::{DashboardSource, HolidaySource, LogArchive, LogTransport};
pub use store::{KvStore, MemoryStore, SqliteStore, StoreError};
pub use stream_consumer::{LiveBuffer, StreamConsumer, LIVE_BUFFER_CAPACITY};
pub use ttl_cache::{CacheLookup, MissReason, TtlCache};

//! Historical log queries
//!
//! Holds the current [`LogQuery`] and the last accepted result page. Every
//! filter change resets paging and re-issues the query. Each issued query
//! takes a new generation number; a response that arrives after a newer
//! query was issued is discarded.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use telemetry_core::{LogEntry, LogExport, LogOverview, LogQuery, TelemetryResult};
use tracing::{debug, warn};

use crate::sources::LogArchive;

/// What happened to a query's response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Response accepted; holds the number of entries
    Applied(usize),
    /// A newer query was issued before this one returned
    Superseded,
    /// Parameters did not change, nothing was issued
    Unchanged,
}

/// Engine operation that owns an error slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveOperation {
    Query,
    Overview,
    Download,
}

impl ArchiveOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveOperation::Query => "query",
            ArchiveOperation::Overview => "overview",
            ArchiveOperation::Download => "download",
        }
    }
}

impl fmt::Display for ArchiveOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct EngineState {
    query: LogQuery,
    entries: Vec<LogEntry>,
    /// Last failure per operation, until dismissed or that operation succeeds
    errors: HashMap<ArchiveOperation, String>,
    loading: bool,
}

/// Query engine for historical log files
///
/// The engine owns one [`LogQuery`] and re-issues it whenever a parameter
/// changes. Date, type, level, search and limit changes go back to the first
/// page; paging moves `offset` by `limit` and never below zero. Setting a
/// parameter to its current value issues nothing.
///
/// ## Key Design: Generations Instead Of Cancellation
///
/// A filter change does not cancel the request already in flight. Instead
/// every issued query takes the next generation number, and a response is
/// only applied if its generation is still the latest when it returns. A
/// slow response for an old date can therefore never overwrite the page for
/// the date the user switched to, and `loading` is cleared only by the
/// latest query.
///
/// Errors are tracked per [`ArchiveOperation`]. A failed download stays
/// visible after a later successful query and is only cleared by dismissing
/// it or by the next successful download.
pub struct HistoricalQueryEngine {
    archive: Arc<dyn LogArchive>,
    state: Mutex<EngineState>,
    generation: AtomicU64,
}

impl HistoricalQueryEngine {
    pub fn new(archive: Arc<dyn LogArchive>, query: LogQuery) -> Self {
        Self {
            archive,
            state: Mutex::new(EngineState {
                query,
                ..Default::default()
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub fn current_query(&self) -> LogQuery {
        self.state.lock().query.clone()
    }

    /// Entries of the last accepted response
    pub fn entries(&self) -> Vec<LogEntry> {
        self.state.lock().entries.clone()
    }

    pub fn error(&self, operation: ArchiveOperation) -> Option<String> {
        self.state.lock().errors.get(&operation).cloned()
    }

    pub fn dismiss_error(&self, operation: ArchiveOperation) {
        self.state.lock().errors.remove(&operation);
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    /// Replace all parameters and run the query
    pub async fn query(&self, query: LogQuery) -> TelemetryResult<QueryOutcome> {
        self.state.lock().query = query;
        self.refresh().await
    }

    /// Re-run the current query
    pub async fn refresh(&self) -> TelemetryResult<QueryOutcome> {
        let (generation, query) = {
            let mut state = self.state.lock();
            state.loading = true;
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            (generation, state.query.clone())
        };

        debug!(
            "[LogQuery] #{} date={} offset={} limit={}",
            generation, query.date, query.offset, query.limit
        );

        let result = self.archive.query(&query).await;

        let mut state = self.state.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("[LogQuery] Discarding superseded response #{}", generation);
            return Ok(QueryOutcome::Superseded);
        }
        state.loading = false;

        match result {
            Ok(entries) => {
                let count = entries.len();
                state.entries = entries;
                state.errors.remove(&ArchiveOperation::Query);
                Ok(QueryOutcome::Applied(count))
            }
            Err(e) => {
                warn!("[LogQuery] Query for {} failed: {}", query.date, e);
                state.errors.insert(ArchiveOperation::Query, e.to_string());
                Err(e)
            }
        }
    }

    pub async fn set_date(&self, date: impl Into<String>) -> TelemetryResult<QueryOutcome> {
        let date = date.into();
        self.change_filter(|q| q.date = date).await
    }

    pub async fn set_log_type(&self, log_type: Option<String>) -> TelemetryResult<QueryOutcome> {
        self.change_filter(|q| q.log_type = log_type).await
    }

    pub async fn set_level(&self, level: Option<String>) -> TelemetryResult<QueryOutcome> {
        self.change_filter(|q| q.level = level).await
    }

    pub async fn set_search(&self, search: Option<String>) -> TelemetryResult<QueryOutcome> {
        self.change_filter(|q| q.search = search).await
    }

    pub async fn set_limit(&self, limit: u32) -> TelemetryResult<QueryOutcome> {
        self.change_filter(|q| q.limit = limit.max(1)).await
    }

    pub async fn next_page(&self) -> TelemetryResult<QueryOutcome> {
        self.change_query(|q| q.offset = q.offset.saturating_add(q.limit))
            .await
    }

    pub async fn prev_page(&self) -> TelemetryResult<QueryOutcome> {
        self.change_query(|q| q.offset = q.offset.saturating_sub(q.limit))
            .await
    }

    /// Available log files and aggregate stats
    pub async fn overview(&self) -> TelemetryResult<LogOverview> {
        let result = self.archive.overview().await;
        if let Err(e) = &result {
            warn!("[LogQuery] Overview failed: {}", e);
        }
        self.record(ArchiveOperation::Overview, &result);
        result
    }

    /// Full filtered log text for a date
    pub async fn download(
        &self,
        date: &str,
        log_type: Option<&str>,
    ) -> TelemetryResult<LogExport> {
        let result = self.archive.download(date, log_type).await;
        if let Err(e) = &result {
            warn!("[LogQuery] Download for {} failed: {}", date, e);
        }
        self.record(ArchiveOperation::Download, &result);
        result
    }

    fn record<T>(&self, operation: ArchiveOperation, result: &TelemetryResult<T>) {
        let mut state = self.state.lock();
        match result {
            Ok(_) => {
                state.errors.remove(&operation);
            }
            Err(e) => {
                state.errors.insert(operation, e.to_string());
            }
        }
    }

    /// Filter changes restart paging from the first page
    async fn change_filter(
        &self,
        update: impl FnOnce(&mut LogQuery),
    ) -> TelemetryResult<QueryOutcome> {
        self.change_query(|q| {
            update(q);
            q.offset = 0;
        })
        .await
    }

    async fn change_query(
        &self,
        update: impl FnOnce(&mut LogQuery),
    ) -> TelemetryResult<QueryOutcome> {
        let changed = {
            let mut state = self.state.lock();
            let before = state.query.clone();
            update(&mut state.query);
            state.query != before
        };

        if !changed {
            return Ok(QueryOutcome::Unchanged);
        }
        self.refresh().await
    }
}

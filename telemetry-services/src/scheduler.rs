//! Dashboard refresh scheduler
//!
//! Runs two repeating tasks: a data refresh (default every 60s) that fetches
//! the dashboard slices concurrently, and a market-state recomputation
//! (default every 30s). Background refreshes pass through a [`RefreshGate`]
//! so they never fire more often than the minimum interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use telemetry_client::client::RECENT_TRADES_LIMIT;
use telemetry_core::{MarketClock, MarketSession, TelemetryResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::calendar::MarketCalendar;
use crate::dashboard::{DashboardSlice, DashboardState, SharedDashboard};
use crate::refresh_gate::{
    GateDecision, RefreshGate, RefreshGateStats, DEFAULT_MIN_REFRESH_INTERVAL_MS,
};
use crate::sources::DashboardSource;

/// Configuration for RefreshScheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Period of the data refresh task
    pub refresh_interval: Duration,
    /// Period of the market-state task
    pub market_interval: Duration,
    /// Background refreshes closer together than this are skipped
    pub min_interval: Duration,
    pub recent_trades_limit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            market_interval: Duration::from_secs(30),
            min_interval: Duration::from_millis(DEFAULT_MIN_REFRESH_INTERVAL_MS),
            recent_trades_limit: RECENT_TRADES_LIMIT,
        }
    }
}

/// Per-slice results of an executed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub background: bool,
    pub succeeded: Vec<DashboardSlice>,
    pub failed: Vec<(DashboardSlice, String)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Executed(BatchReport),
    /// Background tick dropped by the minimum interval
    Skipped { since_last: Duration },
}

impl TickOutcome {
    pub fn executed(&self) -> bool {
        matches!(self, TickOutcome::Executed(_))
    }
}

struct SchedulerCore {
    source: Arc<dyn DashboardSource>,
    calendar: MarketCalendar,
    clock: MarketClock,
    gate: RefreshGate,
    state: SharedDashboard,
    config: SchedulerConfig,
}

struct RunningTasks {
    shutdown: watch::Sender<bool>,
    refresh: JoinHandle<()>,
    market: JoinHandle<()>,
}

/// Owns the dashboard state and the two repeating tasks that keep it fresh
pub struct RefreshScheduler {
    core: Arc<SchedulerCore>,
    tasks: Option<RunningTasks>,
}

impl RefreshScheduler {
    pub fn new(
        source: Arc<dyn DashboardSource>,
        calendar: MarketCalendar,
        config: SchedulerConfig,
    ) -> Self {
        Self::with_clock(source, calendar, MarketClock::nse(), config)
    }

    pub fn with_clock(
        source: Arc<dyn DashboardSource>,
        calendar: MarketCalendar,
        clock: MarketClock,
        config: SchedulerConfig,
    ) -> Self {
        info!(
            "Initializing RefreshScheduler (refresh {:?}, market {:?}, min interval {:?})",
            config.refresh_interval, config.market_interval, config.min_interval
        );
        Self {
            core: Arc::new(SchedulerCore {
                source,
                calendar,
                clock,
                gate: RefreshGate::new(config.min_interval, "Dashboard"),
                state: DashboardState::shared(),
                config,
            }),
            tasks: None,
        }
    }

    /// Shared dashboard state
    pub fn state(&self) -> SharedDashboard {
        Arc::clone(&self.core.state)
    }

    pub fn dismiss_error(&self, slice: DashboardSlice) {
        self.core.state.write().dismiss_error(slice);
    }

    pub fn gate_stats(&self) -> RefreshGateStats {
        self.core.gate.stats()
    }

    pub fn is_running(&self) -> bool {
        self.tasks.is_some()
    }

    /// Run one refresh batch. Background ticks may be skipped; foreground
    /// ticks always execute and toggle the loading flag.
    pub async fn tick(&self, background: bool) -> TickOutcome {
        self.core.tick(background, Instant::now()).await
    }

    pub async fn recompute_market(&self) -> MarketSession {
        self.core.recompute_market_at(Utc::now()).await
    }

    pub async fn recompute_market_at(&self, now: DateTime<Utc>) -> MarketSession {
        self.core.recompute_market_at(now).await
    }

    /// Refresh in the foreground and recompute the market state, then spawn
    /// both repeating tasks. Does nothing if already running.
    pub async fn start(&mut self) -> Option<TickOutcome> {
        if self.tasks.is_some() {
            warn!("[Refresh] Scheduler already running");
            return None;
        }

        let outcome = self.core.tick(false, Instant::now()).await;
        self.core.recompute_market_at(Utc::now()).await;

        let (shutdown, shutdown_rx) = watch::channel(false);

        let core = Arc::clone(&self.core);
        let rx = shutdown_rx.clone();
        let refresh = tokio::spawn(async move { core.refresh_loop(rx).await });

        let core = Arc::clone(&self.core);
        let market = tokio::spawn(async move { core.market_loop(shutdown_rx).await });

        self.tasks = Some(RunningTasks {
            shutdown,
            refresh,
            market,
        });

        info!("[Refresh] Scheduler started");
        Some(outcome)
    }

    /// Signal both tasks and wait for them to exit. An in-flight tick is
    /// allowed to finish. Idempotent.
    pub async fn stop(&mut self) {
        let Some(tasks) = self.tasks.take() else {
            return;
        };

        let _ = tasks.shutdown.send(true);
        for handle in [tasks.refresh, tasks.market] {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("[Refresh] Task ended abnormally: {}", e);
                }
            }
        }

        info!("[Refresh] Scheduler stopped");
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.take() {
            let _ = tasks.shutdown.send(true);
            tasks.refresh.abort();
            tasks.market.abort();
        }
    }
}

impl SchedulerCore {
    /// `due` is when the tick was scheduled to fire. The gate measures the
    /// minimum interval between due times.
    async fn tick(&self, background: bool, due: Instant) -> TickOutcome {
        if let GateDecision::Skip { since_last } = self.gate.check_at(background, due) {
            return TickOutcome::Skipped { since_last };
        }

        if !background {
            self.state.write().loading = true;
        }

        let limit = self.config.recent_trades_limit;
        let results = tokio::join!(
            self.refresh_slice(DashboardSlice::Summary, self.source.summary(), |s, v| {
                s.summary = v
            }),
            self.refresh_slice(DashboardSlice::Positions, self.source.positions(), |s, v| {
                s.positions = v
            }),
            self.refresh_slice(
                DashboardSlice::Trades,
                self.source.recent_trades(limit),
                |s, v| s.trades = v
            ),
            self.refresh_slice(
                DashboardSlice::Strategies,
                self.source.strategies(),
                |s, v| s.strategies = v
            ),
        );

        let mut report = BatchReport {
            background,
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (slice, result) in [results.0, results.1, results.2, results.3] {
            match result {
                Ok(()) => report.succeeded.push(slice),
                Err(e) => report.failed.push((slice, e)),
            }
        }

        {
            let mut state = self.state.write();
            state.last_refreshed = Some(Utc::now());
            if !background {
                state.loading = false;
            }
        }

        if report.is_complete() {
            debug!(
                "[Refresh] {} batch complete",
                if background { "Background" } else { "Foreground" }
            );
        } else {
            info!(
                "[Refresh] Batch finished with {} failed slice(s)",
                report.failed.len()
            );
        }

        TickOutcome::Executed(report)
    }

    /// Await one fetch and write its slice. A failure keeps the previous
    /// value and records the error against the slice.
    async fn refresh_slice<T, F>(
        &self,
        slice: DashboardSlice,
        fetch: F,
        apply: impl FnOnce(&mut DashboardState, T),
    ) -> (DashboardSlice, Result<(), String>)
    where
        F: Future<Output = TelemetryResult<T>>,
    {
        match fetch.await {
            Ok(value) => {
                let mut state = self.state.write();
                apply(&mut state, value);
                state.errors.remove(&slice);
                (slice, Ok(()))
            }
            Err(e) => {
                warn!("[Refresh] Failed to fetch {}: {}", slice, e);
                let message = e.to_string();
                self.state.write().errors.insert(slice, message.clone());
                (slice, Err(message))
            }
        }
    }

    async fn recompute_market_at(&self, now: DateTime<Utc>) -> MarketSession {
        let holidays = self.calendar.holidays_at(now).await;
        let session = self.clock.session(now, &holidays);

        let previous = {
            let mut state = self.state.write();
            state.market_checked_at = Some(now);
            state.market.replace(session)
        };

        if previous != Some(session) {
            info!("[Market] Session is now {:?}", session);
        }

        session
    }

    async fn refresh_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.refresh_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let due = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                due = ticker.tick() => due,
            };
            if *shutdown.borrow() {
                break;
            }
            self.tick(true, due).await;
        }

        debug!("[Refresh] Refresh loop exited");
    }

    async fn market_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.market_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            self.recompute_market_at(Utc::now()).await;
        }

        debug!("[Refresh] Market loop exited");
    }
}

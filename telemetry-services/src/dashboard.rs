//! Dashboard view state
//!
//! One slice per independent fetch in a refresh batch. A failed fetch leaves
//! its slice untouched and records an error against it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use telemetry_core::{DashboardSummary, MarketSession, Position, StrategyStatus, TradeRecord};

/// Shared, lock-protected dashboard state
pub type SharedDashboard = Arc<RwLock<DashboardState>>;

/// Independently refreshed parts of the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DashboardSlice {
    Summary,
    Positions,
    Trades,
    Strategies,
}

impl DashboardSlice {
    pub const ALL: [DashboardSlice; 4] = [
        DashboardSlice::Summary,
        DashboardSlice::Positions,
        DashboardSlice::Trades,
        DashboardSlice::Strategies,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DashboardSlice::Summary => "summary",
            DashboardSlice::Positions => "positions",
            DashboardSlice::Trades => "trades",
            DashboardSlice::Strategies => "strategies",
        }
    }
}

impl fmt::Display for DashboardSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DashboardState {
    pub summary: DashboardSummary,
    pub positions: Vec<Position>,
    pub trades: Vec<TradeRecord>,
    pub strategies: Vec<StrategyStatus>,
    /// Set only while a foreground batch is in flight
    pub loading: bool,
    /// Last failure per slice, cleared by the slice's next success
    pub errors: HashMap<DashboardSlice, String>,
    /// `None` until the first market recomputation
    pub market: Option<MarketSession>,
    pub market_checked_at: Option<DateTime<Utc>>,
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl DashboardState {
    pub fn shared() -> SharedDashboard {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn error(&self, slice: DashboardSlice) -> Option<&str> {
        self.errors.get(&slice).map(String::as_str)
    }

    pub fn dismiss_error(&mut self, slice: DashboardSlice) {
        self.errors.remove(&slice);
    }

    pub fn is_market_open(&self) -> bool {
        self.market.is_some_and(|session| session.is_open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_core::ClosedReason;

    #[test]
    fn test_dismiss_error_only_clears_one_slice() {
        let mut state = DashboardState::default();
        state.errors.insert(DashboardSlice::Positions, "timeout".into());
        state.errors.insert(DashboardSlice::Trades, "500".into());

        state.dismiss_error(DashboardSlice::Positions);
        assert_eq!(state.error(DashboardSlice::Positions), None);
        assert_eq!(state.error(DashboardSlice::Trades), Some("500"));
    }

    #[test]
    fn test_market_unknown_reads_as_closed() {
        let mut state = DashboardState::default();
        assert!(!state.is_market_open());

        state.market = Some(MarketSession::Closed(ClosedReason::Weekend));
        assert!(!state.is_market_open());

        state.market = Some(MarketSession::Open);
        assert!(state.is_market_open());
    }
}

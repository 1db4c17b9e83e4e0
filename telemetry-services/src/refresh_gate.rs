//! Minimum-interval gate for dashboard refreshes
//!
//! Background refreshes are dropped when the last executed refresh was less
//! than `min_interval` ago. Foreground refreshes always pass and restart the
//! interval. Unlike a queueing rate limiter, a gated call never waits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default minimum spacing between executed refreshes (60s)
pub const DEFAULT_MIN_REFRESH_INTERVAL_MS: u64 = 60_000;

/// Outcome of a gate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Skip { since_last: Duration },
}

/// Gate that keeps background dashboard refreshes at least `min_interval`
/// apart
///
/// Background callers are the repeating refresh task. Foreground callers are
/// explicit user refreshes and the initial load on start. Both share the same
/// "last call" timestamp, so a manual refresh pushes the next background
/// refresh out by a full interval.
///
/// ## Key Design: Timestamps From The Caller's Schedule
///
/// The repeating task runs at the same period as the minimum interval. If
/// the gate stamped each admitted call with the moment the check happened,
/// timer jitter would make two consecutive ticks look a few microseconds
/// closer than the period and the second one would be dropped, leaving the
/// dashboard a full extra period stale. [`RefreshGate::check_at`] therefore
/// takes the instant the tick was *scheduled* for, which is exact.
/// [`RefreshGate::check`] stamps with `Instant::now()` for unscheduled
/// callers.
#[derive(Debug)]
pub struct RefreshGate {
    /// When the last admitted refresh was due; `None` before the first
    last_call: Mutex<Option<Instant>>,
    /// Background calls closer than this to `last_call` are skipped
    min_interval: Duration,
    /// Name for logging purposes
    name: String,
    /// Counter for debugging - refreshes let through
    admitted: AtomicU64,
    /// Counter for debugging - background refreshes dropped
    skipped: AtomicU64,
}

impl RefreshGate {
    pub fn new(min_interval: Duration, name: &str) -> Self {
        Self {
            last_call: Mutex::new(None),
            min_interval,
            name: name.to_string(),
            admitted: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Gate with the default 60s interval
    pub fn dashboard() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_MIN_REFRESH_INTERVAL_MS),
            "Dashboard",
        )
    }

    /// Decide whether a refresh may run now
    pub fn check(&self, background: bool) -> GateDecision {
        self.check_at(background, Instant::now())
    }

    /// Decide whether a refresh due at `now` may run. An admitted call
    /// records `now` as the last call before returning.
    pub fn check_at(&self, background: bool, now: Instant) -> GateDecision {
        let mut last_call = self.last_call.lock();

        if background {
            if let Some(last) = *last_call {
                let since_last = now.saturating_duration_since(last);
                if since_last < self.min_interval {
                    let n = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(
                        "[REFRESH_GATE:{}] SKIP background refresh #{} - last call {:?} ago, min interval {:?}",
                        self.name, n, since_last, self.min_interval
                    );
                    return GateDecision::Skip { since_last };
                }
            }
        }

        *last_call = Some(now);
        let n = self.admitted.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "[REFRESH_GATE:{}] PROCEED {} refresh #{}",
            self.name,
            if background { "background" } else { "foreground" },
            n
        );
        GateDecision::Proceed
    }

    /// Time since the last admitted refresh
    pub fn since_last(&self) -> Option<Duration> {
        self.last_call
            .lock()
            .map(|last| Instant::now().saturating_duration_since(last))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn stats(&self) -> RefreshGateStats {
        RefreshGateStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            min_interval_ms: self.min_interval.as_millis() as u64,
            name: self.name.clone(),
        }
    }
}

/// Statistics about gate usage
#[derive(Debug, Clone)]
pub struct RefreshGateStats {
    pub admitted: u64,
    pub skipped: u64,
    pub min_interval_ms: u64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_background_call_proceeds() {
        let gate = RefreshGate::dashboard();
        assert_eq!(gate.check(true), GateDecision::Proceed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_within_interval_is_skipped() {
        let gate = RefreshGate::dashboard();
        assert_eq!(gate.check(true), GateDecision::Proceed);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(
            gate.check(true),
            GateDecision::Skip {
                since_last: Duration::from_secs(10)
            }
        );

        let stats = gate.stats();
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_after_interval_proceeds() {
        let gate = RefreshGate::dashboard();
        gate.check(true);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(gate.check(true), GateDecision::Proceed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_always_proceeds_and_resets() {
        let gate = RefreshGate::dashboard();
        assert_eq!(gate.check(false), GateDecision::Proceed);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(gate.check(false), GateDecision::Proceed);

        // The second foreground call restarted the interval
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(matches!(gate.check(true), GateDecision::Skip { .. }));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(gate.check(true), GateDecision::Proceed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_call_does_not_reset() {
        let gate = RefreshGate::new(Duration::from_secs(60), "test");
        gate.check(true);

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(matches!(gate.check(true), GateDecision::Skip { .. }));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(gate.check(true), GateDecision::Proceed);
        assert_eq!(gate.since_last(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_instants_absorb_check_jitter() {
        let gate = RefreshGate::dashboard();
        let due = Instant::now();

        // First tick is checked 5ms late, the next one only 1ms late
        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(gate.check_at(true, due), GateDecision::Proceed);

        tokio::time::advance(Duration::from_millis(59_996)).await;
        assert_eq!(
            gate.check_at(true, due + Duration::from_secs(60)),
            GateDecision::Proceed
        );
        assert_eq!(gate.stats().skipped, 0);
    }
}

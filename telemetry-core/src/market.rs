//! Trading session clock
//!
//! Open/closed state is computed in the exchange's fixed civil timezone,
//! independent of the caller's locale. The default session is the NSE cash
//! market: Monday to Friday, 09:15 to 15:30 IST (UTC+05:30, no DST).

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Non-trading dates in exchange-local time
pub type HolidaySet = BTreeSet<NaiveDate>;

/// IST offset from UTC in seconds
const IST_OFFSET_SECS: i64 = 5 * 3600 + 30 * 60;

/// Why the market is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedReason {
    Weekend,
    Holiday,
    OutsideHours,
}

/// Trading session state at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum MarketSession {
    Open,
    Closed(ClosedReason),
}

impl MarketSession {
    pub fn is_open(&self) -> bool {
        matches!(self, MarketSession::Open)
    }
}

/// Session rules for one exchange. Holds configuration only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketClock {
    utc_offset_secs: i64,
    /// Minutes since local midnight, inclusive
    open_minute: u32,
    /// Minutes since local midnight, inclusive
    close_minute: u32,
}

impl MarketClock {
    /// NSE equities session
    pub const fn nse() -> Self {
        Self {
            utc_offset_secs: IST_OFFSET_SECS,
            open_minute: 9 * 60 + 15,
            close_minute: 15 * 60 + 30,
        }
    }

    pub const fn new(utc_offset_secs: i64, open_minute: u32, close_minute: u32) -> Self {
        Self {
            utc_offset_secs,
            open_minute,
            close_minute,
        }
    }

    /// Exchange-local calendar date for an instant
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        (now.naive_utc() + Duration::seconds(self.utc_offset_secs)).date()
    }

    /// Session state for `now`.
    ///
    /// An empty holiday set is valid: weekday and hour rules still apply.
    pub fn session(&self, now: DateTime<Utc>, holidays: &HolidaySet) -> MarketSession {
        let local = now.naive_utc() + Duration::seconds(self.utc_offset_secs);

        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return MarketSession::Closed(ClosedReason::Weekend);
        }

        if holidays.contains(&local.date()) {
            return MarketSession::Closed(ClosedReason::Holiday);
        }

        let minutes = local.hour() * 60 + local.minute();
        if (self.open_minute..=self.close_minute).contains(&minutes) {
            MarketSession::Open
        } else {
            MarketSession::Closed(ClosedReason::OutsideHours)
        }
    }

    pub fn is_open(&self, now: DateTime<Utc>, holidays: &HolidaySet) -> bool {
        self.session(now, holidays).is_open()
    }
}

impl Default for MarketClock {
    fn default() -> Self {
        Self::nse()
    }
}

//! Exchange holiday calendar
//!
//! [`CalendarCache`] keeps the holiday list in durable storage for 30 days.
//! [`MarketCalendar`] resolves the list for the market clock: cache first,
//! then an authenticated fetch, otherwise an empty set.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use telemetry_core::HolidaySet;
use tracing::{debug, info, warn};

use crate::sources::HolidaySource;
use crate::store::{KvStore, StoreError};
use crate::ttl_cache::{CacheLookup, TtlCache};

/// Storage key prefix for the holiday list
pub const HOLIDAY_CACHE_KEY: &str = "holiday_cache";

/// Holiday list lifetime
pub const HOLIDAY_CACHE_TTL_DAYS: i64 = 30;

/// Durable holiday list with a fixed 30-day TTL
#[derive(Clone)]
pub struct CalendarCache {
    cache: TtlCache<HolidaySet>,
}

impl CalendarCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            cache: TtlCache::new(store),
        }
    }

    pub fn ttl() -> Duration {
        Duration::days(HOLIDAY_CACHE_TTL_DAYS)
    }

    /// Cached holidays, or `None` on any miss
    pub fn get(&self) -> Option<HolidaySet> {
        self.get_at(Utc::now())
    }

    pub fn get_at(&self, now: DateTime<Utc>) -> Option<HolidaySet> {
        self.lookup_at(now).into_value()
    }

    pub fn lookup_at(&self, now: DateTime<Utc>) -> CacheLookup<HolidaySet> {
        self.cache.lookup_at(HOLIDAY_CACHE_KEY, now)
    }

    /// Store the list with expiry `now + 30 days`
    pub fn put(&self, holidays: &HolidaySet) -> Result<DateTime<Utc>, StoreError> {
        self.put_at(holidays, Utc::now())
    }

    pub fn put_at(
        &self,
        holidays: &HolidaySet,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        self.cache.put_at(HOLIDAY_CACHE_KEY, holidays, Self::ttl(), now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.cache.is_valid_at(HOLIDAY_CACHE_KEY, now)
    }

    pub fn invalidate(&self) -> Result<(), StoreError> {
        self.cache.invalidate(HOLIDAY_CACHE_KEY)
    }
}

/// Holiday resolution for the market clock
#[derive(Clone)]
pub struct MarketCalendar {
    cache: CalendarCache,
    source: Arc<dyn HolidaySource>,
}

impl MarketCalendar {
    pub fn new(cache: CalendarCache, source: Arc<dyn HolidaySource>) -> Self {
        Self { cache, source }
    }

    pub fn cache(&self) -> &CalendarCache {
        &self.cache
    }

    pub async fn holidays(&self) -> HolidaySet {
        self.holidays_at(Utc::now()).await
    }

    /// Cached set when valid, else fetched (authenticated only), else empty
    pub async fn holidays_at(&self, now: DateTime<Utc>) -> HolidaySet {
        if let Some(holidays) = self.cache.get_at(now) {
            debug!("[Calendar] Using {} cached holidays", holidays.len());
            return holidays;
        }

        if !self.source.is_authenticated() {
            debug!("[Calendar] Not authenticated, skipping holiday fetch");
            return HolidaySet::new();
        }

        self.fetch_and_store(now).await.unwrap_or_default()
    }

    /// Drop the cached list and fetch again
    pub async fn refresh(&self) -> HolidaySet {
        if let Err(e) = self.cache.invalidate() {
            warn!("[Calendar] Failed to invalidate holiday cache: {}", e);
        }
        self.holidays().await
    }

    async fn fetch_and_store(&self, now: DateTime<Utc>) -> Option<HolidaySet> {
        let holidays = match self.source.holidays().await {
            Ok(holidays) => holidays,
            Err(e) => {
                warn!("[Calendar] Failed to fetch holidays: {}", e);
                return None;
            }
        };

        match self.cache.put_at(&holidays, now) {
            Ok(expiry) => info!(
                "[Calendar] Cached {} holidays until {}",
                holidays.len(),
                expiry
            ),
            Err(e) => warn!("[Calendar] Failed to cache holidays: {}", e),
        }

        Some(holidays)
    }
}

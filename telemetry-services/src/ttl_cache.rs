//! Durable TTL cache
//!
//! Stores JSON values in a [`KvStore`] with an expiry timestamp. Entry `k`
//! occupies two keys: `k_payload` (the serialized value) and `k_expiry`
//! (epoch milliseconds). Anything unreadable is reported as a miss.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::store::{KvStore, StoreError};

/// Why a lookup produced no value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// Payload or expiry entry not present
    Absent,
    /// `now` is at or past the stored expiry
    Expired,
    /// Payload or expiry could not be parsed
    Corrupt,
    /// The backing store failed
    Unavailable,
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<V> {
    Hit { value: V, expires_at: DateTime<Utc> },
    Miss(MissReason),
}

impl<V> CacheLookup<V> {
    pub fn into_value(self) -> Option<V> {
        match self {
            CacheLookup::Hit { value, .. } => Some(value),
            CacheLookup::Miss(_) => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit { .. })
    }
}

/// Typed TTL cache over a shared key/value store
pub struct TtlCache<V> {
    store: Arc<dyn KvStore>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _value: PhantomData,
        }
    }
}

fn payload_key(key: &str) -> String {
    format!("{}_payload", key)
}

fn expiry_key(key: &str) -> String {
    format!("{}_expiry", key)
}

impl<V> TtlCache<V>
where
    V: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            _value: PhantomData,
        }
    }

    /// Stored expiry, if present and parsable
    pub fn expiry(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.read_expiry(key) {
            Ok(expiry) => expiry,
            Err(reason) => {
                debug!("[TtlCache] Expiry for {} unreadable: {:?}", key, reason);
                None
            }
        }
    }

    /// True when the expiry entry exists, parses, and lies after `now`
    pub fn is_valid_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.expiry(key).is_some_and(|expiry| now < expiry)
    }

    pub fn is_valid(&self, key: &str) -> bool {
        self.is_valid_at(key, Utc::now())
    }

    pub fn lookup(&self, key: &str) -> CacheLookup<V> {
        self.lookup_at(key, Utc::now())
    }

    /// Read the entry as of `now`. Never fails: problems become misses.
    pub fn lookup_at(&self, key: &str, now: DateTime<Utc>) -> CacheLookup<V> {
        let expires_at = match self.read_expiry(key) {
            Ok(Some(expiry)) => expiry,
            Ok(None) => return CacheLookup::Miss(MissReason::Absent),
            Err(reason) => return CacheLookup::Miss(reason),
        };

        if now >= expires_at {
            debug!("[TtlCache] {} expired at {}", key, expires_at);
            return CacheLookup::Miss(MissReason::Expired);
        }

        let raw = match self.store.get(&payload_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheLookup::Miss(MissReason::Absent),
            Err(e) => {
                warn!("[TtlCache] Failed to read payload for {}: {}", key, e);
                return CacheLookup::Miss(MissReason::Unavailable);
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => CacheLookup::Hit { value, expires_at },
            Err(e) => {
                warn!("[TtlCache] Corrupt payload for {}, treating as miss: {}", key, e);
                CacheLookup::Miss(MissReason::Corrupt)
            }
        }
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<(V, DateTime<Utc>)> {
        match self.lookup_at(key, now) {
            CacheLookup::Hit { value, expires_at } => Some((value, expires_at)),
            CacheLookup::Miss(_) => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<(V, DateTime<Utc>)> {
        self.get_at(key, Utc::now())
    }

    /// Write the value with expiry `now + ttl`. Returns the expiry.
    pub fn put_at(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let payload = serde_json::to_string(value)?;
        let expires_at = now + ttl;

        self.store.set(&payload_key(key), &payload)?;
        self.store
            .set(&expiry_key(key), &expires_at.timestamp_millis().to_string())?;

        debug!("[TtlCache] Stored {} until {}", key, expires_at);
        Ok(expires_at)
    }

    pub fn put(&self, key: &str, value: &V, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
        self.put_at(key, value, ttl, Utc::now())
    }

    /// Remove both entries
    pub fn invalidate(&self, key: &str) -> Result<(), StoreError> {
        self.store.remove(&expiry_key(key))?;
        self.store.remove(&payload_key(key))?;
        Ok(())
    }

    fn read_expiry(&self, key: &str) -> Result<Option<DateTime<Utc>>, MissReason> {
        let raw = match self.store.get(&expiry_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("[TtlCache] Failed to read expiry for {}: {}", key, e);
                return Err(MissReason::Unavailable);
            }
        };

        let parsed = raw
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        match parsed {
            Some(expiry) => Ok(Some(expiry)),
            None => {
                warn!("[TtlCache] Unparsable expiry for {}: {:?}", key, raw);
                Err(MissReason::Corrupt)
            }
        }
    }
}

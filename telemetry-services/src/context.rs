//! Shared telemetry context
//!
//! One API client and one durable store, built once from configuration and
//! handed to every service.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use telemetry_client::{ClientConfig, TelemetryClient};
use telemetry_core::{LogQuery, StreamFilter, TelemetryError, TelemetryResult};
use tracing::{info, warn};

use crate::calendar::{CalendarCache, MarketCalendar};
use crate::historical::HistoricalQueryEngine;
use crate::scheduler::{RefreshScheduler, SchedulerConfig};
use crate::store::{KvStore, MemoryStore, SqliteStore};
use crate::stream_consumer::StreamConsumer;

/// Default location of the key/value database
pub const DEFAULT_CACHE_DB_PATH: &str = "data/telemetry.db";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub client: ClientConfig,
    pub cache_db_path: PathBuf,
    pub scheduler: SchedulerConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            cache_db_path: PathBuf::from(DEFAULT_CACHE_DB_PATH),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from environment variables
    ///
    /// Reads:
    /// - TELEMETRY_API_URL: API base URL
    /// - TELEMETRY_API_TOKEN: bearer token (optional)
    /// - TELEMETRY_CACHE_DB: key/value database path
    /// - TELEMETRY_REFRESH_SECS / TELEMETRY_MARKET_SECS: task periods
    /// - TELEMETRY_MIN_INTERVAL_MS: minimum background refresh spacing
    /// - TELEMETRY_HTTP_TIMEOUT_SECS: request timeout
    pub fn from_env() -> TelemetryResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any variable lookup. Unset or empty values use defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> TelemetryResult<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = var("TELEMETRY_API_URL") {
            config.client.base_url = url;
        }
        config.client.api_token = var("TELEMETRY_API_TOKEN");
        if let Some(path) = var("TELEMETRY_CACHE_DB") {
            config.cache_db_path = PathBuf::from(path);
        }

        if let Some(secs) = parse_var::<u64>(&var, "TELEMETRY_HTTP_TIMEOUT_SECS")? {
            config.client.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&var, "TELEMETRY_REFRESH_SECS")? {
            config.scheduler.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&var, "TELEMETRY_MARKET_SECS")? {
            config.scheduler.market_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&var, "TELEMETRY_MIN_INTERVAL_MS")? {
            config.scheduler.min_interval = Duration::from_millis(ms);
        }

        if config.scheduler.refresh_interval.is_zero() || config.scheduler.market_interval.is_zero()
        {
            return Err(TelemetryError::config("Task intervals must be positive"));
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> TelemetryResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| TelemetryError::config(format!("Invalid {}='{}': {}", key, raw, e))),
        None => Ok(None),
    }
}

/// Client, store and configuration shared by all telemetry services
#[derive(Clone)]
pub struct TelemetryContext {
    config: TelemetryConfig,
    client: Arc<TelemetryClient>,
    store: Arc<dyn KvStore>,
}

impl TelemetryContext {
    /// Build the client and open the store. If the database cannot be opened
    /// the context falls back to a volatile store.
    pub fn new(config: TelemetryConfig) -> TelemetryResult<Self> {
        let store: Arc<dyn KvStore> = match SqliteStore::open(&config.cache_db_path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(
                    "Failed to open key/value store at {}: {}. Holiday cache will not persist.",
                    config.cache_db_path.display(),
                    e
                );
                Arc::new(MemoryStore::new())
            }
        };
        Self::with_store(config, store)
    }

    pub fn with_store(config: TelemetryConfig, store: Arc<dyn KvStore>) -> TelemetryResult<Self> {
        let client = TelemetryClient::new(config.client.clone())?;
        info!(
            "Telemetry context ready for {} ({})",
            client.base_url(),
            if client.is_authenticated() {
                "authenticated"
            } else {
                "unauthenticated"
            }
        );

        Ok(Self {
            config,
            client: Arc::new(client),
            store,
        })
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn client(&self) -> Arc<TelemetryClient> {
        Arc::clone(&self.client)
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.store)
    }

    pub fn stream_consumer(&self, filter: StreamFilter) -> StreamConsumer {
        StreamConsumer::new(Arc::new(self.client.log_stream()), filter)
    }

    pub fn query_engine(&self, date: impl Into<String>) -> HistoricalQueryEngine {
        HistoricalQueryEngine::new(self.client.clone(), LogQuery::new(date))
    }

    pub fn calendar(&self) -> MarketCalendar {
        MarketCalendar::new(CalendarCache::new(self.store()), self.client.clone())
    }

    pub fn scheduler(&self) -> RefreshScheduler {
        RefreshScheduler::new(
            self.client.clone(),
            self.calendar(),
            self.config.scheduler.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = TelemetryConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.client.base_url, "http://localhost:8000");
        assert_eq!(config.client.api_token, None);
        assert_eq!(config.cache_db_path, PathBuf::from("data/telemetry.db"));
        assert_eq!(config.scheduler.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.scheduler.market_interval, Duration::from_secs(30));
        assert_eq!(config.scheduler.min_interval, Duration::from_millis(60_000));
    }

    #[test]
    fn test_overrides_from_env() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("TELEMETRY_API_URL", "https://bot.example.com"),
            ("TELEMETRY_API_TOKEN", "secret"),
            ("TELEMETRY_REFRESH_SECS", "120"),
            ("TELEMETRY_MIN_INTERVAL_MS", "5000"),
            ("TELEMETRY_HTTP_TIMEOUT_SECS", " 10 "),
        ]))
        .unwrap();

        assert_eq!(config.client.base_url, "https://bot.example.com");
        assert_eq!(config.client.api_token.as_deref(), Some("secret"));
        assert_eq!(config.client.timeout, Duration::from_secs(10));
        assert_eq!(config.scheduler.refresh_interval, Duration::from_secs(120));
        assert_eq!(config.scheduler.min_interval, Duration::from_millis(5000));
    }

    #[test]
    fn test_empty_token_is_unauthenticated() {
        let config = TelemetryConfig::from_lookup(lookup(&[("TELEMETRY_API_TOKEN", "")])).unwrap();
        assert_eq!(config.client.api_token, None);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let result = TelemetryConfig::from_lookup(lookup(&[("TELEMETRY_MARKET_SECS", "soon")]));
        assert!(matches!(result, Err(TelemetryError::Config(msg)) if msg.contains("TELEMETRY_MARKET_SECS")));

        let result = TelemetryConfig::from_lookup(lookup(&[("TELEMETRY_REFRESH_SECS", "0")]));
        assert!(matches!(result, Err(TelemetryError::Config(_))));
    }

    #[tokio::test]
    async fn test_context_wires_services_to_one_store() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let context =
            TelemetryContext::with_store(TelemetryConfig::default(), store.clone()).unwrap();

        let calendar = context.calendar();
        // Unauthenticated: nothing fetched, nothing cached
        assert!(calendar.holidays().await.is_empty());
        assert!(!calendar.cache().is_valid());

        let engine = context.query_engine("2024-03-01");
        assert_eq!(engine.current_query().date, "2024-03-01");

        let consumer = context.stream_consumer(StreamFilter::default());
        assert!(!consumer.is_active());

        let scheduler = context.scheduler();
        assert!(!scheduler.is_running());
    }
}

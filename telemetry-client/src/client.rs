//! Telemetry REST client
//!
//! Provides methods for the historical log, dashboard and calendar
//! endpoints of the bot's API.

use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use telemetry_core::{
    DashboardSummary, HolidaySet, LogEntry, LogExport, LogOverview, LogQuery, Position,
    StrategyStatus, TelemetryError, TradeRecord,
};
use tracing::{debug, instrument, warn};

use crate::config::ClientConfig;
use crate::types::{paths, LogQueryResponse};
use crate::websocket::LogStreamTransport;

/// Number of trades requested for the dashboard's recent-trades slice
pub const RECENT_TRADES_LIMIT: u32 = 50;

/// Telemetry API client
#[derive(Clone)]
pub struct TelemetryClient {
    client: Client,
    config: ClientConfig,
}

impl TelemetryClient {
    /// Create a new client from connection settings
    pub fn new(config: ClientConfig) -> Result<Self, TelemetryError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TelemetryError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.config.base()
    }

    /// Check if the client carries an API token
    pub fn is_authenticated(&self) -> bool {
        self.config.api_token.is_some()
    }

    /// Live log transport sharing this client's base URL and token
    pub fn log_stream(&self) -> LogStreamTransport {
        LogStreamTransport::new(self.config.clone())
    }

    // ========================================================================
    // Historical Logs
    // ========================================================================

    /// Run a filtered, paginated query against the stored logs for a date.
    ///
    /// A date with no stored log file yields an empty result.
    #[instrument(skip(self))]
    pub async fn query_logs(&self, query: &LogQuery) -> Result<Vec<LogEntry>, TelemetryError> {
        debug!(
            "Querying logs for {} (offset {}, limit {})",
            query.date, query.offset, query.limit
        );

        match self
            .get_json::<LogQueryResponse>(paths::LOG_QUERY, &query.to_params(), "logs")
            .await
        {
            Ok(response) => Ok(response.entries),
            Err(e) if e.is_not_found() => {
                debug!("No log file for {}, returning empty result", query.date);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// List available log files with aggregate stats
    #[instrument(skip(self))]
    pub async fn log_overview(&self) -> Result<LogOverview, TelemetryError> {
        self.get_json(paths::LOG_OVERVIEW, &[], "log overview").await
    }

    /// Download the full filtered log set for a date as raw text
    #[instrument(skip(self))]
    pub async fn download_logs(
        &self,
        date: &str,
        log_type: Option<&str>,
    ) -> Result<LogExport, TelemetryError> {
        let mut params = vec![("date", date.to_string())];
        if let Some(t) = log_type.filter(|t| !t.is_empty()) {
            params.push(("log_type", t.to_string()));
        }

        let response = self
            .send(self.get(paths::LOG_DOWNLOAD).query(&params), "log download")
            .await?;

        let body = response
            .text()
            .await
            .map_err(|e| TelemetryError::network(format!("Failed to read log download: {}", e)))?;

        Ok(LogExport {
            file_name: LogExport::file_name_for(date, log_type),
            body,
        })
    }

    // ========================================================================
    // Market Calendar
    // ========================================================================

    /// Fetch the exchange holiday list. Unparsable dates are skipped.
    #[instrument(skip(self))]
    pub async fn holidays(&self) -> Result<HolidaySet, TelemetryError> {
        let raw: Vec<String> = self.get_json(paths::HOLIDAYS, &[], "holidays").await?;

        let holidays: HolidaySet = raw
            .iter()
            .filter_map(|s| match parse_iso_date(s) {
                Some(date) => Some(date),
                None => {
                    warn!("Skipping unparsable holiday date: {}", s);
                    None
                }
            })
            .collect();

        debug!("Fetched {} holidays", holidays.len());
        Ok(holidays)
    }

    // ========================================================================
    // Dashboard
    // ========================================================================

    #[instrument(skip(self))]
    pub async fn dashboard_summary(&self) -> Result<DashboardSummary, TelemetryError> {
        self.get_json(paths::DASHBOARD_SUMMARY, &[], "dashboard summary")
            .await
    }

    #[instrument(skip(self))]
    pub async fn positions(&self) -> Result<Vec<Position>, TelemetryError> {
        self.get_json(paths::POSITIONS, &[], "positions").await
    }

    #[instrument(skip(self))]
    pub async fn recent_trades(&self, limit: u32) -> Result<Vec<TradeRecord>, TelemetryError> {
        self.get_json(paths::TRADES, &[("limit", limit.to_string())], "trades")
            .await
    }

    #[instrument(skip(self))]
    pub async fn strategies(&self) -> Result<Vec<StrategyStatus>, TelemetryError> {
        self.get_json(paths::STRATEGIES, &[], "strategies").await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.config.base(), path));
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, TelemetryError> {
        let response = request
            .send()
            .await
            .map_err(|e| TelemetryError::network(format!("Failed to fetch {}: {}", what, e)))?;

        let status = response.status();

        if status.as_u16() == 401 {
            return Err(TelemetryError::auth("Invalid or expired API token"));
        }

        if status.as_u16() == 404 {
            return Err(TelemetryError::not_found(format!("{} not found", what)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::api(format!(
                "Telemetry API error ({}): {}",
                status, body
            )));
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        what: &str,
    ) -> Result<T, TelemetryError> {
        let mut request = self.get(path);
        if !params.is_empty() {
            request = request.query(params);
        }

        let response = self.send(request, what).await?;

        response
            .json()
            .await
            .map_err(|e| TelemetryError::parse(format!("Failed to parse {}: {}", what, e)))
    }
}

/// Parse `YYYY-MM-DD`, tolerating a trailing time component
fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

impl std::fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("base_url", &self.config.base_url)
            .field("authenticated", &self.config.api_token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> TelemetryClient {
        TelemetryClient::new(ClientConfig::new(server.url()).with_token("t0ken")).unwrap()
    }

    #[tokio::test]
    async fn test_query_logs_sends_filters_and_parses_entries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/logs/query")
            .match_header("authorization", "Bearer t0ken")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("date".into(), "2024-03-01".into()),
                Matcher::UrlEncoded("level".into(), "ERROR".into()),
                Matcher::UrlEncoded("limit".into(), "1000".into()),
                Matcher::UrlEncoded("offset".into(), "0".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"entries":[{"timestamp":"2024-03-01T09:20:00","level":"ERROR","logger":"broker","module":"session","line":88,"message":"token expired"}]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let query = LogQuery::new("2024-03-01").with_level("ERROR");
        let entries = client.query_logs(&query).await.unwrap();

        mock.assert_async().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "token expired");
    }

    #[tokio::test]
    async fn test_query_logs_unknown_date_is_empty() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/logs/query")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"detail":"Log file not found"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let entries = client.query_logs(&LogQuery::new("1999-01-01")).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/logs")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = client_for(&server);
        match client.log_overview().await {
            Err(TelemetryError::Api(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/positions")
            .with_status(401)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(matches!(client.positions().await, Err(TelemetryError::Auth(_))));
    }

    #[tokio::test]
    async fn test_download_returns_raw_text_named_by_date() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/logs/download")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("date".into(), "2024-03-01".into()),
                Matcher::UrlEncoded("log_type".into(), "error".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("line one\nline two\n")
            .create_async()
            .await;

        let client = client_for(&server);
        let export = client.download_logs("2024-03-01", Some("error")).await.unwrap();
        assert_eq!(export.file_name, "logs_2024-03-01_error.txt");
        assert_eq!(export.body, "line one\nline two\n");
    }

    #[tokio::test]
    async fn test_holidays_skip_bad_dates() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/market/holidays")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"["2024-03-08", "2024-03-25T00:00:00", "not-a-date"]"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let holidays = client.holidays().await.unwrap();
        assert_eq!(holidays.len(), 2);
        assert!(holidays.contains(&NaiveDate::from_ymd_opt(2024, 3, 25).unwrap()));
    }

    #[tokio::test]
    async fn test_recent_trades_sends_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/trades")
            .match_query(Matcher::UrlEncoded("limit".into(), "50".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let client = client_for(&server);
        let trades = client.recent_trades(RECENT_TRADES_LIMIT).await.unwrap();
        mock.assert_async().await;
        assert!(trades.is_empty());
    }

    #[test]
    fn test_parse_iso_date() {
        assert_eq!(parse_iso_date("2024-01-26"), NaiveDate::from_ymd_opt(2024, 1, 26));
        assert_eq!(parse_iso_date("bad"), None);
    }
}

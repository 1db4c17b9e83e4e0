//! Live log stream transport
//!
//! Opens the server-push WebSocket for application logs and exposes it as a
//! stream of raw text frames. Parsing, filtering and deduplication happen in
//! the consumer. Dropping the frame stream closes the socket.

use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use telemetry_core::{StreamFilter, TelemetryError};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};
use url::Url;

use crate::config::ClientConfig;
use crate::types::paths;

/// Raw text frames from an open log connection
pub type LogFrames = Pin<Box<dyn Stream<Item = Result<String, TelemetryError>> + Send>>;

/// WebSocket transport for the live log endpoint
#[derive(Clone)]
pub struct LogStreamTransport {
    config: ClientConfig,
}

impl LogStreamTransport {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Stream URL for a filter: ws/wss scheme, `log_type` and `level` as query
    pub fn stream_url(&self, filter: &StreamFilter) -> Result<Url, TelemetryError> {
        let raw = format!("{}{}", self.config.base(), paths::LOG_STREAM);
        let mut url = Url::parse(&raw)
            .map_err(|e| TelemetryError::config(format!("Invalid API URL '{}': {}", raw, e)))?;

        let ws_scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TelemetryError::config(format!(
                    "Unsupported URL scheme for log stream: {}",
                    other
                )))
            }
        };
        url.set_scheme(ws_scheme)
            .map_err(|_| TelemetryError::config(format!("Cannot switch {} to {}", raw, ws_scheme)))?;

        let params = filter.connect_params();
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &params {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Open a connection for the filter's server-side parameters
    pub async fn connect(&self, filter: &StreamFilter) -> Result<LogFrames, TelemetryError> {
        let url = self.stream_url(filter)?;
        info!("[LogStream] Connecting to {}", url);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TelemetryError::config(format!("Failed to build request: {}", e)))?;

        if let Some(token) = &self.config.api_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TelemetryError::config(format!("Invalid API token: {}", e)))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| TelemetryError::network(format!("Log stream connect failed: {}", e)))?;

        info!("[LogStream] Connected");

        let frames = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!("[LogStream] Closed by server: {:?}", frame);
                    None
                }
                // Pings are answered by tungstenite; binary frames are not part of the protocol
                Ok(_) => None,
                Err(e) => Some(Err(TelemetryError::network(format!("Log stream error: {}", e)))),
            }
        });

        Ok(Box::pin(frames))
    }
}

impl std::fmt::Debug for LogStreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStreamTransport")
            .field("config", &self.config)
            .finish()
    }
}

//! Trading Dashboard Telemetry CLI
//!
//! Keeps the dashboard state fresh, reports market status and tails the
//! live application log to stdout until Ctrl-C.

use telemetry_core::{LogEntry, LogLevel, StreamEvent, StreamFilter};
use telemetry_services::{DashboardSlice, SharedDashboard, TelemetryConfig, TelemetryContext};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,telemetry_cli=debug")),
        )
        .init();

    info!("Starting trading dashboard telemetry");

    let config = TelemetryConfig::from_env()?;
    let context = TelemetryContext::new(config)?;

    if !context.client().is_authenticated() {
        info!("No TELEMETRY_API_TOKEN set - holiday calendar will not be fetched");
    }

    // Dashboard refresh + market clock
    let mut scheduler = context.scheduler();
    scheduler.start().await;
    let dashboard = scheduler.state();
    print_status(&dashboard);

    // Live log tail
    let filter = stream_filter_from_env();
    let mut consumer = context.stream_consumer(filter);
    let mut events = consumer.subscribe();
    if let Err(e) = consumer.start().await {
        error!("Failed to start live log stream: {}", e);
    }

    let mut status_ticker = tokio::time::interval(context.config().scheduler.refresh_interval);
    status_ticker.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            _ = status_ticker.tick() => print_status(&dashboard),
            event = events.recv() => match event {
                Ok(StreamEvent::Entry(entry)) => print_entry(&entry),
                Ok(StreamEvent::Error(message)) => warn!("[LiveLogs] Server error: {}", message),
                Ok(StreamEvent::Connected) => info!("[LiveLogs] Connected"),
                Ok(StreamEvent::Disconnected { error: Some(e) }) => {
                    error!("[LiveLogs] Disconnected: {}. Restart to resume streaming.", e)
                }
                Ok(StreamEvent::Disconnected { error: None }) => info!("[LiveLogs] Disconnected"),
                Err(RecvError::Lagged(n)) => warn!("[LiveLogs] Skipped {} events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    consumer.stop().await;
    scheduler.stop().await;
    info!("Shutdown complete");
    Ok(())
}

/// Live filter from LOG_TYPE, LOG_LEVEL and LOG_SEARCH. An unknown level
/// streams every level.
fn stream_filter_from_env() -> StreamFilter {
    let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
    let level = var("LOG_LEVEL").and_then(|raw| match raw.parse::<LogLevel>() {
        Ok(level) => Some(String::from(level)),
        Err(e) => {
            warn!("Ignoring LOG_LEVEL: {}", e);
            None
        }
    });

    StreamFilter {
        log_type: var("LOG_TYPE"),
        level,
        search_term: var("LOG_SEARCH"),
    }
}

fn print_entry(entry: &LogEntry) {
    println!(
        "{} {:<8} {}:{}:{} {}",
        entry.timestamp, entry.level, entry.logger, entry.module, entry.line, entry.message
    );
}

fn print_status(dashboard: &SharedDashboard) {
    let state = dashboard.read();

    let market = match state.market {
        Some(session) if session.is_open() => "OPEN".to_string(),
        Some(session) => format!("{:?}", session),
        None => "UNKNOWN".to_string(),
    };

    info!(
        "Market {} | P&L total {} day {} | {} positions, {} trades today, {} active strategies",
        market,
        state.summary.total_pnl,
        state.summary.day_pnl,
        state.positions.len(),
        state.summary.trades_today,
        state.summary.active_strategies
    );

    for slice in DashboardSlice::ALL {
        if let Some(e) = state.error(slice) {
            warn!("Dashboard {} unavailable: {}", slice, e);
        }
    }
}

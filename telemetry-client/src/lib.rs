//! Client for the trading dashboard telemetry API
//!
//! This crate provides a REST client for historical logs, dashboard
//! aggregates and the holiday calendar, and a WebSocket transport for the
//! live log stream.

pub mod client;
pub mod config;
pub mod types;
pub mod websocket;

pub use client::TelemetryClient;
pub use config::ClientConfig;
pub use websocket::{LogFrames, LogStreamTransport};

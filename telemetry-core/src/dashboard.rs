//! Dashboard aggregates refreshed by the scheduler

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Headline numbers shown at the top of the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    #[serde(default)]
    pub total_pnl: Decimal,
    #[serde(default)]
    pub day_pnl: Decimal,
    #[serde(default)]
    pub open_positions: u32,
    #[serde(default)]
    pub active_strategies: u32,
    #[serde(default)]
    pub trades_today: u32,
}

/// An open position held by the bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    #[serde(default)]
    pub last_price: Decimal,
    #[serde(default)]
    pub unrealized_pnl: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

/// Side of an executed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// An executed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

/// Run state of a configured strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStatus {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub status: String,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market-data snapshot for one symbol, pushed in by an external feed.
/// The core never fetches this itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    /// Latest trade price. Must be positive; a non-positive price is
    /// treated as a bad tick and ignored by strategies.
    pub price: f64,
    pub volume: f64,
    pub change_24h: f64,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(symbol: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume: 0.0,
            change_24h: 0.0,
            timestamp: Utc::now(),
        }
    }
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// A strategy's trading decision for one analysis cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSignal {
    Buy,
    Sell,
    Hold,
}

impl TradeSignal {
    /// `None` for `Hold` — a hold never becomes a trade.
    pub fn side(self) -> Option<Side> {
        match self {
            TradeSignal::Buy => Some(Side::Buy),
            TradeSignal::Sell => Some(Side::Sell),
            TradeSignal::Hold => None,
        }
    }
}

impl std::fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSignal::Buy => write!(f, "buy"),
            TradeSignal::Sell => write!(f, "sell"),
            TradeSignal::Hold => write!(f, "hold"),
        }
    }
}

/// Order type carried on a trade intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    Stop,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Executed,
}

/// One order intent and, once filled, its execution outcome.
///
/// A trade is owned by exactly one list of its strategy: pending until an
/// execution report arrives, then history. Never both, never mutated after
/// being marked executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    /// Requested amount in base-asset units.
    pub amount: f64,
    pub kind: OrderKind,
    /// `None` = market order; `Some(price)` = limit/stop price.
    pub price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub status: TradeStatus,
    pub executed_price: Option<f64>,
    pub executed_amount: Option<f64>,
    pub fees: f64,
}

impl Trade {
    pub fn market(symbol: impl Into<String>, side: Side, amount: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            amount,
            kind: OrderKind::Market,
            price: None,
            created_at: Utc::now(),
            status: TradeStatus::Pending,
            executed_price: None,
            executed_amount: None,
            fees: 0.0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TradeStatus::Pending
    }

    /// Signed position change contributed by this trade's fill.
    /// Zero while still pending.
    pub fn position_delta(&self) -> f64 {
        let filled = self.executed_amount.unwrap_or(0.0);
        match self.side {
            Side::Buy => filled,
            Side::Sell => -filled,
        }
    }
}

/// Lifecycle state of a single strategy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    #[default]
    Stopped,
    Running,
    Paused,
    Error,
}

impl std::fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyStatus::Stopped => write!(f, "stopped"),
            StrategyStatus::Running => write!(f, "running"),
            StrategyStatus::Paused => write!(f, "paused"),
            StrategyStatus::Error => write!(f, "error"),
        }
    }
}

/// Registry-wide counts by status, exposed to control surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSummary {
    pub total: usize,
    pub running: usize,
    pub paused: usize,
    pub stopped: usize,
    pub error: usize,
    pub registered_types: Vec<String>,
}

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use common::{Error, Result};

/// Immutable per-strategy configuration, copied into the cell at creation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Human-readable name shown in logs and query surfaces.
    pub name: String,
    /// Traded symbol, e.g. "BTC/USD". Snapshots for other symbols are
    /// never dispatched to this strategy.
    pub symbol: String,
    /// Quote-currency amount per trade for policies without their own sizing.
    #[serde(default = "default_base_amount")]
    pub base_amount: f64,
    /// Absolute position ceiling in base-asset units. Trades that would push
    /// `|position|` past this are rejected. `f64::INFINITY` disables the check.
    #[serde(default = "default_max_position")]
    pub max_position: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    /// Policy-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

fn default_base_amount() -> f64 {
    100.0
}

fn default_max_position() -> f64 {
    1000.0
}

fn default_stop_loss_pct() -> f64 {
    0.05
}

fn default_take_profit_pct() -> f64 {
    0.10
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            base_amount: default_base_amount(),
            max_position: default_max_position(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            params: HashMap::new(),
        }
    }

    pub fn param_f64(&self, key: &str, default: f64) -> f64 {
        self.opt_param_f64(key).unwrap_or(default)
    }

    pub fn opt_param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(value_as_f64)
    }

    pub fn param_i64(&self, key: &str, default: i64) -> i64 {
        self.params
            .get(key)
            .and_then(|v| v.as_integer())
            .unwrap_or(default)
    }

    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.params
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }
}

/// TOML integers are accepted wherever a float parameter is expected.
pub(crate) fn value_as_f64(value: &toml::Value) -> Option<f64> {
    match value {
        toml::Value::Float(f) => Some(*f),
        toml::Value::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

/// Top-level strategies file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// type = "dca"
/// name = "BTC accumulation"
/// symbol = "BTC/USD"
///
/// [strategy.params]
/// interval_minutes = 60
/// dca_amount = 50.0
/// max_total_investment = 5000.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategyEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyEntry {
    /// Registered type name to instantiate, e.g. "dca".
    #[serde(rename = "type")]
    pub strategy_type: String,
    #[serde(flatten)]
    pub config: StrategyConfig,
}

impl StrategyFileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse strategies file: {e}")))
    }
}

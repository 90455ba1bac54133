pub mod cell;
pub mod config;
pub mod dca;

pub use cell::{PerformanceMetrics, StrategyCell, StrategySnapshot};
pub use config::{StrategyConfig, StrategyEntry, StrategyFileConfig};
pub use dca::DcaPolicy;

use std::collections::HashMap;

use common::{MarketSnapshot, Result, Trade, TradeSignal};

/// The pluggable decision half of a strategy.
///
/// A policy owns only its strategy-specific state (indicator buffers,
/// accounting overlays); lifecycle status, position and trade lists live in
/// the [`StrategyCell`] that wraps it. All hooks have default no-op
/// implementations so a minimal policy only writes `kind` and `analyze`.
pub trait Policy: Send {
    /// Type name this policy registers under (e.g. "dca").
    fn kind(&self) -> &'static str;

    /// Evaluate one market snapshot and decide. Errors transition the
    /// owning cell to the error state.
    fn analyze(&mut self, config: &StrategyConfig, snapshot: &MarketSnapshot)
        -> Result<TradeSignal>;

    /// Quote-currency amount to commit for a non-hold signal.
    /// Default sizing is the flat per-trade amount from config.
    fn trade_amount(
        &self,
        config: &StrategyConfig,
        signal: TradeSignal,
        snapshot: &MarketSnapshot,
    ) -> f64 {
        let _ = (signal, snapshot);
        config.base_amount
    }

    /// Policy-specific validation, layered on top of the cell's
    /// position-limit check. Rejected trades are dropped, not queued.
    fn validate(&self, config: &StrategyConfig, trade: &Trade) -> Result<()> {
        let _ = (config, trade);
        Ok(())
    }

    /// Accounting overlay, invoked after a fill has been applied to the
    /// cell's position and the trade moved to history.
    fn on_trade_executed(&mut self, trade: &Trade) {
        let _ = trade;
    }

    /// Setup-phase hook with caller-supplied parameters.
    fn on_setup(&mut self, params: &HashMap<String, toml::Value>) -> Result<()> {
        let _ = params;
        Ok(())
    }

    fn on_start(&mut self) {}
    fn on_stop(&mut self) {}
    fn on_pause(&mut self) {}
    fn on_resume(&mut self) {}
    fn on_cleanup(&mut self) {}

    /// Strategy-specific diagnostics, merged into query snapshots.
    fn diagnostics(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use common::{
    Error, MarketSnapshot, Result, Side, StrategyStatus, Trade, TradeSignal, TradeStatus,
};

use crate::config::StrategyConfig;
use crate::Policy;

/// One live strategy instance: a [`Policy`] plus everything the policy does
/// not own — lifecycle status, signed position, P&L, pending trades and the
/// append-only execution history.
///
/// The cell is single-threaded by construction; the manager wraps it in a
/// mutex so at most one fan-out cycle touches `analyze_market` at a time.
pub struct StrategyCell {
    id: String,
    config: StrategyConfig,
    policy: Box<dyn Policy>,
    status: StrategyStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    position: f64,
    realized_pnl: f64,
    unrealized_pnl: f64,
    winning_trades: u64,
    losing_trades: u64,
    last_signal: Option<TradeSignal>,
    last_analysis_at: Option<DateTime<Utc>>,
    pending: Vec<Trade>,
    history: Vec<Trade>,
}

impl StrategyCell {
    /// Mints a fresh id. Ids are uuid-v4 and never reused.
    pub fn new(config: StrategyConfig, policy: Box<dyn Policy>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            policy,
            status: StrategyStatus::Stopped,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            position: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            winning_trades: 0,
            losing_trades: 0,
            last_signal: None,
            last_analysis_at: None,
            pending: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn status(&self) -> StrategyStatus {
        self.status
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn pending(&self) -> &[Trade] {
        &self.pending
    }

    pub fn history(&self) -> &[Trade] {
        &self.history
    }

    // ── Lifecycle state machine ───────────────────────────────────────────

    pub fn start(&mut self) -> Result<()> {
        if self.status != StrategyStatus::Stopped {
            return Err(Error::InvalidTransition {
                op: "start",
                from: self.status,
            });
        }
        self.status = StrategyStatus::Running;
        self.started_at = Some(Utc::now());
        info!(id = %self.id, name = %self.config.name, "Strategy started");
        self.policy.on_start();
        Ok(())
    }

    /// No-op if already stopped. Returns the prior status so callers can
    /// tell whether anything actually changed.
    pub fn stop(&mut self) -> StrategyStatus {
        let prior = self.status;
        if prior == StrategyStatus::Stopped {
            return prior;
        }
        self.status = StrategyStatus::Stopped;
        self.stopped_at = Some(Utc::now());
        info!(id = %self.id, name = %self.config.name, "Strategy stopped");
        self.policy.on_stop();
        prior
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.status != StrategyStatus::Running {
            return Err(Error::InvalidTransition {
                op: "pause",
                from: self.status,
            });
        }
        self.status = StrategyStatus::Paused;
        info!(id = %self.id, name = %self.config.name, "Strategy paused");
        self.policy.on_pause();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.status != StrategyStatus::Paused {
            return Err(Error::InvalidTransition {
                op: "resume",
                from: self.status,
            });
        }
        self.status = StrategyStatus::Running;
        info!(id = %self.id, name = %self.config.name, "Strategy resumed");
        self.policy.on_resume();
        Ok(())
    }

    /// Setup-phase parameterization. A policy without setup logic is a no-op
    /// success; a failing hook leaves the cell in the error state.
    pub fn setup(&mut self, params: &HashMap<String, toml::Value>) -> Result<()> {
        if let Err(e) = self.policy.on_setup(params) {
            self.status = StrategyStatus::Error;
            error!(id = %self.id, error = %e, "Strategy setup failed");
            return Err(Error::SetupFailed(e.to_string()));
        }
        Ok(())
    }

    /// Disposal: force-stop if still active, then run the cleanup hook.
    /// The caller drops the cell afterwards; its id is never reissued.
    pub fn cleanup(&mut self) {
        if matches!(self.status, StrategyStatus::Running | StrategyStatus::Paused) {
            self.stop();
        }
        self.policy.on_cleanup();
        info!(id = %self.id, name = %self.config.name, "Strategy cleaned up");
    }

    // ── Analysis ──────────────────────────────────────────────────────────

    /// Run one analysis cycle against a snapshot.
    ///
    /// Returns `Hold` with zero side effects unless running. A non-hold
    /// signal is sized by the policy, validated, and queued as a pending
    /// trade; rejected trades are logged and dropped. A policy failure
    /// transitions the cell to the error state and surfaces the error so
    /// the manager can pull it from the dispatch path.
    pub fn analyze_market(&mut self, snapshot: &MarketSnapshot) -> Result<TradeSignal> {
        if self.status != StrategyStatus::Running {
            return Ok(TradeSignal::Hold);
        }

        let signal = match self.policy.analyze(&self.config, snapshot) {
            Ok(signal) => signal,
            Err(e) => {
                self.status = StrategyStatus::Error;
                error!(id = %self.id, name = %self.config.name, error = %e, "Analysis failed");
                return Err(Error::AnalysisFailed(e.to_string()));
            }
        };

        self.last_signal = Some(signal);
        self.last_analysis_at = Some(Utc::now());

        if let Some(side) = signal.side() {
            if snapshot.price <= 0.0 {
                warn!(id = %self.id, price = snapshot.price, "Ignoring signal on bad tick");
                return Ok(signal);
            }
            let quote_amount = self.policy.trade_amount(&self.config, signal, snapshot);
            if quote_amount <= 0.0 {
                return Ok(signal);
            }
            let trade = Trade::market(&self.config.symbol, side, quote_amount / snapshot.price);
            match self.validate_trade(&trade) {
                Ok(()) => {
                    info!(
                        id = %self.id,
                        trade_id = %trade.id,
                        side = %trade.side,
                        amount = trade.amount,
                        "Signal queued as pending trade"
                    );
                    self.pending.push(trade);
                }
                Err(e) => {
                    warn!(id = %self.id, reason = %e, "Trade rejected");
                }
            }
        }

        Ok(signal)
    }

    fn validate_trade(&self, trade: &Trade) -> Result<()> {
        let new_position = self.position
            + match trade.side {
                Side::Buy => trade.amount,
                Side::Sell => -trade.amount,
            };
        if new_position.abs() > self.config.max_position {
            return Err(Error::TradeRejected(format!(
                "position {new_position:.8} would exceed limit {:.8}",
                self.config.max_position
            )));
        }
        self.policy.validate(&self.config, trade)
    }

    // ── Accounting ────────────────────────────────────────────────────────

    /// Apply an execution report to a pending trade.
    ///
    /// This is the single place position mutates. The trade moves from
    /// pending to history exactly once; a second report for the same id
    /// fails with `TradeNotFound` and changes nothing. History order is
    /// execution order.
    pub fn execute_trade(
        &mut self,
        trade_id: &str,
        executed_price: f64,
        executed_amount: f64,
        fees: f64,
    ) -> Result<Trade> {
        if executed_price <= 0.0 || executed_amount <= 0.0 || fees < 0.0 {
            return Err(Error::TradeRejected(format!(
                "invalid execution report: price {executed_price}, amount {executed_amount}, fees {fees}"
            )));
        }

        let idx = self
            .pending
            .iter()
            .position(|t| t.id == trade_id)
            .ok_or_else(|| Error::TradeNotFound(trade_id.to_string()))?;

        let mut trade = self.pending.remove(idx);
        trade.status = TradeStatus::Executed;
        trade.executed_price = Some(executed_price);
        trade.executed_amount = Some(executed_amount);
        trade.fees = fees;

        self.position += trade.position_delta();
        self.policy.on_trade_executed(&trade);
        self.history.push(trade.clone());

        info!(
            id = %self.id,
            trade_id = %trade.id,
            side = %trade.side,
            price = executed_price,
            amount = executed_amount,
            position = self.position,
            "Trade executed"
        );
        Ok(trade)
    }

    /// Record a realized P&L figure reported by an external accountant.
    /// Observational only — never touches position.
    pub fn record_realized_pnl(&mut self, pnl: f64) {
        self.realized_pnl += pnl;
        if pnl >= 0.0 {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
    }

    pub fn set_unrealized_pnl(&mut self, pnl: f64) {
        self.unrealized_pnl = pnl;
    }

    // ── Reporting ─────────────────────────────────────────────────────────

    pub fn metrics(&self) -> PerformanceMetrics {
        let total_trades = self.history.len() as u64;
        let win_rate = if total_trades > 0 {
            self.winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };
        PerformanceMetrics {
            strategy_id: self.id.clone(),
            name: self.config.name.clone(),
            status: self.status,
            total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            win_rate,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
            position: self.position,
            started_at: self.started_at,
            runtime_secs: self
                .started_at
                .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0),
        }
    }

    pub fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            id: self.id.clone(),
            name: self.config.name.clone(),
            symbol: self.config.symbol.clone(),
            status: self.status,
            position: self.position,
            created_at: self.created_at,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            last_signal: self.last_signal,
            last_analysis_at: self.last_analysis_at,
            pending_trades: self.pending.len(),
            executed_trades: self.history.len(),
            diagnostics: self.policy.diagnostics(),
        }
    }
}

impl std::fmt::Debug for StrategyCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyCell")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("kind", &self.policy.kind())
            .field("status", &self.status)
            .field("position", &self.position)
            .finish()
    }
}

/// Point-in-time view of a cell for query surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub status: StrategyStatus,
    pub position: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_signal: Option<TradeSignal>,
    pub last_analysis_at: Option<DateTime<Utc>>,
    pub pending_trades: usize,
    pub executed_trades: usize,
    pub diagnostics: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub strategy_id: String,
    pub name: String,
    pub status: StrategyStatus,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub position: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub runtime_secs: f64,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

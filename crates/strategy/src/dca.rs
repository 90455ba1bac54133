use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info};

use common::{Error, MarketSnapshot, Result, Side, Trade, TradeSignal};

use crate::config::{value_as_f64, StrategyConfig};
use crate::Policy;

/// Dollar-cost-averaging accumulation policy.
///
/// Buys a fixed quote amount at a fixed wall-clock interval until an
/// investment cap is reached, optionally gated on the price sitting a
/// configured percentage below the running average buy price. Never sells.
pub struct DcaPolicy {
    interval: Duration,
    dca_amount: f64,
    max_total_investment: f64,
    only_buy: bool,
    /// Minimum percent drop below the average buy price before the next
    /// purchase. `None` buys on schedule regardless of price.
    price_threshold_pct: Option<f64>,

    last_purchase_at: Option<DateTime<Utc>>,
    total_invested: f64,
    total_acquired: f64,
    total_fees: f64,
    average_buy_price: f64,
    purchases: u64,
    last_price: f64,
}

impl DcaPolicy {
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            interval: Duration::minutes(config.param_i64("interval_minutes", 60)),
            dca_amount: config.param_f64("dca_amount", 50.0),
            max_total_investment: config.param_f64("max_total_investment", 5000.0),
            only_buy: config.param_bool("only_buy", true),
            price_threshold_pct: config.opt_param_f64("price_threshold_pct"),
            last_purchase_at: None,
            total_invested: 0.0,
            total_acquired: 0.0,
            total_fees: 0.0,
            average_buy_price: 0.0,
            purchases: 0,
            last_price: 0.0,
        }
    }

    pub fn total_invested(&self) -> f64 {
        self.total_invested
    }

    pub fn total_acquired(&self) -> f64 {
        self.total_acquired
    }

    pub fn average_buy_price(&self) -> f64 {
        self.average_buy_price
    }

    pub fn purchases(&self) -> u64 {
        self.purchases
    }

    fn cap_reached(&self) -> bool {
        self.total_invested >= self.max_total_investment
    }

    fn next_purchase_eta(&self) -> String {
        if self.cap_reached() {
            return "investment complete".into();
        }
        let Some(last) = self.last_purchase_at else {
            return "ready now".into();
        };
        let remaining = last + self.interval - Utc::now();
        if remaining <= Duration::zero() {
            return "ready now".into();
        }
        let hours = remaining.num_hours();
        let minutes = remaining.num_minutes() % 60;
        if hours > 0 {
            format!("{hours}h {minutes}m")
        } else {
            format!("{minutes}m")
        }
    }
}

impl Policy for DcaPolicy {
    fn kind(&self) -> &'static str {
        "dca"
    }

    fn analyze(
        &mut self,
        _config: &StrategyConfig,
        snapshot: &MarketSnapshot,
    ) -> Result<TradeSignal> {
        if snapshot.price <= 0.0 {
            return Ok(TradeSignal::Hold);
        }
        self.last_price = snapshot.price;

        if self.cap_reached() {
            debug!(invested = self.total_invested, "Investment cap reached");
            return Ok(TradeSignal::Hold);
        }

        if let Some(last) = self.last_purchase_at {
            if Utc::now() - last < self.interval {
                return Ok(TradeSignal::Hold);
            }
        }

        if let Some(threshold) = self.price_threshold_pct {
            if self.average_buy_price > 0.0 {
                let drop_pct =
                    (self.average_buy_price - snapshot.price) / self.average_buy_price * 100.0;
                if drop_pct < threshold {
                    debug!(
                        price = snapshot.price,
                        average = self.average_buy_price,
                        "Price has not dropped enough for threshold buy"
                    );
                    return Ok(TradeSignal::Hold);
                }
            }
        }

        Ok(TradeSignal::Buy)
    }

    /// Fixed quote amount per purchase, clamped to the remaining cap
    /// headroom so the final purchase never overshoots.
    fn trade_amount(
        &self,
        _config: &StrategyConfig,
        signal: TradeSignal,
        _snapshot: &MarketSnapshot,
    ) -> f64 {
        if signal != TradeSignal::Buy {
            return 0.0;
        }
        let headroom = self.max_total_investment - self.total_invested;
        self.dca_amount.min(headroom)
    }

    fn validate(&self, _config: &StrategyConfig, trade: &Trade) -> Result<()> {
        if self.only_buy && trade.side != Side::Buy {
            return Err(Error::TradeRejected(
                "accumulation policy only buys".into(),
            ));
        }
        let notional = trade.amount * self.last_price;
        if self.total_invested + notional > self.max_total_investment + 1e-9 {
            return Err(Error::TradeRejected(format!(
                "purchase of {notional:.2} would exceed investment cap {:.2}",
                self.max_total_investment
            )));
        }
        Ok(())
    }

    /// Accounting overlay. Reads only the fill fields on the trade, so a
    /// replay of trade history reproduces identical figures.
    fn on_trade_executed(&mut self, trade: &Trade) {
        if trade.side != Side::Buy {
            return;
        }
        let price = trade.executed_price.unwrap_or(0.0);
        let amount = trade.executed_amount.unwrap_or(0.0);
        let value = price * amount;

        self.total_invested += value;
        self.total_acquired += amount;
        self.total_fees += trade.fees;
        self.purchases += 1;
        self.last_purchase_at = Some(Utc::now());
        if self.total_acquired > 0.0 {
            self.average_buy_price = self.total_invested / self.total_acquired;
        }

        info!(
            purchase = self.purchases,
            amount,
            price,
            invested = self.total_invested,
            average = self.average_buy_price,
            "DCA purchase recorded"
        );
    }

    /// Sizing and schedule can be re-parameterized during the setup phase.
    /// Non-positive values fail the setup and leave the strategy in error.
    fn on_setup(&mut self, params: &HashMap<String, toml::Value>) -> Result<()> {
        if let Some(amount) = params.get("dca_amount").and_then(value_as_f64) {
            if amount <= 0.0 {
                return Err(Error::Other(format!("dca_amount must be positive, got {amount}")));
            }
            self.dca_amount = amount;
        }
        if let Some(cap) = params.get("max_total_investment").and_then(value_as_f64) {
            if cap <= 0.0 {
                return Err(Error::Other(format!(
                    "max_total_investment must be positive, got {cap}"
                )));
            }
            self.max_total_investment = cap;
        }
        if let Some(minutes) = params.get("interval_minutes").and_then(|v| v.as_integer()) {
            if minutes < 0 {
                return Err(Error::Other(format!(
                    "interval_minutes must be non-negative, got {minutes}"
                )));
            }
            self.interval = Duration::minutes(minutes);
        }
        Ok(())
    }

    fn on_start(&mut self) {
        info!(
            amount = self.dca_amount,
            interval_minutes = self.interval.num_minutes(),
            cap = self.max_total_investment,
            "DCA policy active"
        );
    }

    fn on_stop(&mut self) {
        info!(
            invested = self.total_invested,
            acquired = self.total_acquired,
            purchases = self.purchases,
            "DCA policy stopped"
        );
    }

    fn diagnostics(&self) -> serde_json::Value {
        let current_value = self.total_acquired * self.last_price;
        let unrealized = current_value - self.total_invested;
        let unrealized_pct = if self.total_invested > 0.0 {
            unrealized / self.total_invested * 100.0
        } else {
            0.0
        };
        let progress_pct = if self.max_total_investment > 0.0 {
            self.total_invested / self.max_total_investment * 100.0
        } else {
            0.0
        };

        json!({
            "strategy_type": "dca",
            "interval_minutes": self.interval.num_minutes(),
            "dca_amount": self.dca_amount,
            "max_total_investment": self.max_total_investment,
            "total_invested": self.total_invested,
            "total_acquired": self.total_acquired,
            "total_fees": self.total_fees,
            "average_buy_price": self.average_buy_price,
            "current_price": self.last_price,
            "current_value": current_value,
            "unrealized_pnl": unrealized,
            "unrealized_pnl_pct": unrealized_pct,
            "purchases": self.purchases,
            "last_purchase_at": self.last_purchase_at.map(|t| t.to_rfc3339()),
            "investment_progress_pct": progress_pct,
            "next_purchase_eta": self.next_purchase_eta(),
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::MarketSnapshot;
use manager::StrategyManager;
use strategy::{DcaPolicy, Policy, StrategyConfig, StrategyFileConfig};

/// Demo driver for the strategy core. Stands in for the real collaborators:
/// a simulated snapshot producer replaces the exchange feed, and a simulated
/// fill reporter replaces the execution venue. Everything else is the same
/// wiring a production process would use.
#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let _ = dotenvy::dotenv(); // ignore error if .env not present
    let strategies_path = std::env::var("STRATEGIES_PATH")
        .unwrap_or_else(|_| "config/strategies.toml".to_string());
    let tick_ms: u64 = std::env::var("TICK_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000);

    let file = StrategyFileConfig::load(&strategies_path)
        .unwrap_or_else(|e| panic!("Failed to load strategies file: {e}"));

    // ── Manager ───────────────────────────────────────────────────────────────
    let manager = Arc::new(StrategyManager::new());
    manager
        .register("dca", |cfg: &StrategyConfig| {
            Box::new(DcaPolicy::from_config(cfg)) as Box<dyn Policy>
        })
        .await;

    let symbols: HashSet<String> = file
        .strategies
        .iter()
        .map(|entry| entry.config.symbol.clone())
        .collect();

    for entry in &file.strategies {
        match manager
            .initialize(&entry.strategy_type, entry.config.clone())
            .await
        {
            Ok(id) => {
                manager.setup(&id, &entry.config.params).await;
                manager.start(&id).await;
            }
            Err(e) => error!(name = %entry.config.name, error = %e, "Failed to initialize strategy"),
        }
    }
    info!(summary = ?manager.summary().await, "Strategies running");

    // ── Simulated snapshot producer ───────────────────────────────────────────
    {
        let manager = manager.clone();
        let symbols: Vec<String> = symbols.into_iter().collect();
        tokio::spawn(async move {
            let mut tick: u64 = 0;
            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
            loop {
                interval.tick().await;
                tick += 1;
                for (i, symbol) in symbols.iter().enumerate() {
                    // deterministic drift around a per-symbol base price
                    let base = 100.0 * (i + 1) as f64;
                    let price = base * (1.0 + 0.02 * ((tick as f64) * 0.37 + i as f64).sin());
                    let snapshot = MarketSnapshot {
                        symbol: symbol.clone(),
                        price,
                        volume: 1000.0,
                        change_24h: 0.0,
                        timestamp: Utc::now(),
                    };
                    manager.update_market_data(snapshot).await;
                }
            }
        });
    }

    // ── Simulated fill reporter ───────────────────────────────────────────────
    {
        let manager = manager.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
            loop {
                interval.tick().await;
                for (strategy_id, trade) in manager.pending_trades().await {
                    let Some(snapshot) = manager.latest_snapshot(&trade.symbol).await else {
                        continue;
                    };
                    let fees = trade.amount * snapshot.price * 0.001;
                    if let Err(e) = manager
                        .execute_trade(&strategy_id, &trade.id, snapshot.price, trade.amount, fees)
                        .await
                    {
                        error!(trade_id = %trade.id, error = %e, "Fill report rejected");
                    }
                }
            }
        });
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    info!("Core running. Ctrl-C to shut down.");
    tokio::signal::ctrl_c().await.unwrap();
    manager.emergency_cleanup_all().await;
    info!(summary = ?manager.summary().await, "Shutdown complete");
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{Error, MarketSnapshot, Result, StrategyStatus, TradeSignal};
use manager::StrategyManager;
use strategy::{DcaPolicy, Policy, StrategyConfig};

/// Emits a buy on every snapshot, sized by the default base amount.
struct AlwaysBuy;

impl Policy for AlwaysBuy {
    fn kind(&self) -> &'static str {
        "always_buy"
    }

    fn analyze(
        &mut self,
        _config: &StrategyConfig,
        _snapshot: &MarketSnapshot,
    ) -> Result<TradeSignal> {
        Ok(TradeSignal::Buy)
    }
}

/// Fails on the first snapshot it sees.
struct Exploding;

impl Policy for Exploding {
    fn kind(&self) -> &'static str {
        "exploding"
    }

    fn analyze(
        &mut self,
        _config: &StrategyConfig,
        _snapshot: &MarketSnapshot,
    ) -> Result<TradeSignal> {
        Err(Error::Other("division by market".into()))
    }
}

/// Counts its lifecycle hook invocations.
struct Hooked {
    cleanups: Arc<AtomicUsize>,
    setups: Arc<AtomicUsize>,
}

impl Policy for Hooked {
    fn kind(&self) -> &'static str {
        "hooked"
    }

    fn analyze(
        &mut self,
        _config: &StrategyConfig,
        _snapshot: &MarketSnapshot,
    ) -> Result<TradeSignal> {
        Ok(TradeSignal::Hold)
    }

    fn on_setup(&mut self, _params: &HashMap<String, toml::Value>) -> Result<()> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_cleanup(&mut self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

async fn manager_with_buy() -> StrategyManager {
    let manager = StrategyManager::new();
    manager
        .register("always_buy", |_cfg: &StrategyConfig| {
            Box::new(AlwaysBuy) as Box<dyn Policy>
        })
        .await;
    manager
}

fn dca_config(name: &str, dca_amount: f64, cap: f64) -> StrategyConfig {
    let mut config = StrategyConfig::new(name, "BTC/USD");
    config
        .params
        .insert("dca_amount".into(), toml::Value::Float(dca_amount));
    config
        .params
        .insert("max_total_investment".into(), toml::Value::Float(cap));
    config
        .params
        .insert("interval_minutes".into(), toml::Value::Integer(0));
    config
}

#[tokio::test]
async fn initialize_fails_for_unknown_type() {
    let manager = StrategyManager::new();
    let err = manager
        .initialize("nope", StrategyConfig::new("x", "BTC/USD"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownStrategyType(_)));
    assert_eq!(manager.summary().await.total, 0);
}

#[tokio::test]
async fn full_lifecycle_walkthrough() {
    let manager = manager_with_buy().await;
    let id = manager
        .initialize("always_buy", StrategyConfig::new("walker", "BTC/USD"))
        .await
        .unwrap();

    assert!(manager.setup(&id, &HashMap::new()).await);
    assert!(manager.start(&id).await);
    assert_eq!(manager.get(&id).await.unwrap().status, StrategyStatus::Running);

    assert!(manager.pause(&id).await);
    assert_eq!(manager.get(&id).await.unwrap().status, StrategyStatus::Paused);

    assert!(manager.resume(&id).await);
    assert!(manager.stop(&id).await);
    assert_eq!(manager.get(&id).await.unwrap().status, StrategyStatus::Stopped);

    assert!(manager.cleanup(&id).await);
    assert!(manager.get(&id).await.is_none());
}

#[tokio::test]
async fn lifecycle_verbs_on_unknown_id_report_failure() {
    let manager = manager_with_buy().await;
    assert!(!manager.setup("ghost", &HashMap::new()).await);
    assert!(!manager.start("ghost").await);
    assert!(!manager.stop("ghost").await);
    assert!(!manager.pause("ghost").await);
    assert!(!manager.resume("ghost").await);
    assert!(!manager.cleanup("ghost").await);
}

#[tokio::test]
async fn pause_while_stopped_fails_and_state_is_unchanged() {
    let manager = manager_with_buy().await;
    let id = manager
        .initialize("always_buy", StrategyConfig::new("idle", "BTC/USD"))
        .await
        .unwrap();

    assert!(!manager.pause(&id).await);
    assert_eq!(manager.get(&id).await.unwrap().status, StrategyStatus::Stopped);
}

#[tokio::test]
async fn cleanup_on_running_strategy_force_stops_and_runs_hook_once() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let setups = Arc::new(AtomicUsize::new(0));

    let manager = StrategyManager::new();
    {
        let cleanups = cleanups.clone();
        let setups = setups.clone();
        manager
            .register("hooked", move |_cfg: &StrategyConfig| {
                Box::new(Hooked {
                    cleanups: cleanups.clone(),
                    setups: setups.clone(),
                }) as Box<dyn Policy>
            })
            .await;
    }

    let id = manager
        .initialize("hooked", StrategyConfig::new("hooked", "BTC/USD"))
        .await
        .unwrap();
    assert!(manager.setup(&id, &HashMap::new()).await);
    assert_eq!(setups.load(Ordering::SeqCst), 1);

    assert!(manager.start(&id).await);
    assert!(manager.cleanup(&id).await);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert!(manager.get(&id).await.is_none());

    // a second cleanup on the dead id fails and does not re-run the hook
    assert!(!manager.cleanup(&id).await);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dca_accumulates_to_cap_through_the_manager() {
    let manager = StrategyManager::new();
    manager
        .register("dca", |cfg: &StrategyConfig| {
            Box::new(DcaPolicy::from_config(cfg)) as Box<dyn Policy>
        })
        .await;

    // per-purchase 50, cap 150, interval 0
    let id = manager
        .initialize("dca", dca_config("accumulator", 50.0, 150.0))
        .await
        .unwrap();
    assert!(manager.start(&id).await);

    for _ in 0..3 {
        manager
            .update_market_data(MarketSnapshot::new("BTC/USD", 100.0))
            .await;
        let pending = manager.pending_trades().await;
        assert_eq!(pending.len(), 1);
        let (sid, trade) = &pending[0];
        assert_eq!(sid, &id);
        manager
            .execute_trade(sid, &trade.id, 100.0, trade.amount, 0.0)
            .await
            .unwrap();
    }

    let diag = manager.get(&id).await.unwrap().diagnostics;
    assert!((diag["total_invested"].as_f64().unwrap() - 150.0).abs() < 1e-9);
    assert_eq!(diag["purchases"].as_u64().unwrap(), 3);

    // cap reached: fourth snapshot produces no new intent
    manager
        .update_market_data(MarketSnapshot::new("BTC/USD", 100.0))
        .await;
    assert!(manager.pending_trades().await.is_empty());
    assert_eq!(
        manager.get(&id).await.unwrap().last_signal,
        Some(TradeSignal::Hold)
    );
}

#[tokio::test]
async fn execution_report_for_unknown_ids_fails_without_mutation() {
    let manager = manager_with_buy().await;
    let id = manager
        .initialize("always_buy", StrategyConfig::new("solo", "BTC/USD"))
        .await
        .unwrap();
    manager.start(&id).await;
    manager
        .update_market_data(MarketSnapshot::new("BTC/USD", 100.0))
        .await;

    let err = manager
        .execute_trade("ghost", "trade", 100.0, 1.0, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StrategyNotFound(_)));

    let err = manager
        .execute_trade(&id, "no-such-trade", 100.0, 1.0, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TradeNotFound(_)));

    // the real pending trade is untouched
    assert_eq!(manager.pending_trades().await.len(), 1);
    assert_eq!(manager.get(&id).await.unwrap().position, 0.0);
}

#[tokio::test]
async fn double_execution_is_rejected_with_single_history_record() {
    let manager = manager_with_buy().await;
    let id = manager
        .initialize("always_buy", StrategyConfig::new("once", "BTC/USD"))
        .await
        .unwrap();
    manager.start(&id).await;
    manager
        .update_market_data(MarketSnapshot::new("BTC/USD", 100.0))
        .await;

    let (_, trade) = manager.pending_trades().await.remove(0);
    manager
        .execute_trade(&id, &trade.id, 100.0, trade.amount, 0.0)
        .await
        .unwrap();

    let err = manager
        .execute_trade(&id, &trade.id, 100.0, trade.amount, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TradeNotFound(_)));

    let snapshot = manager.get(&id).await.unwrap();
    assert_eq!(snapshot.executed_trades, 1);
    assert_eq!(snapshot.pending_trades, 0);
}

#[tokio::test]
async fn fan_out_survives_one_strategy_failing() {
    let manager = manager_with_buy().await;
    manager
        .register("exploding", |_cfg: &StrategyConfig| {
            Box::new(Exploding) as Box<dyn Policy>
        })
        .await;

    let bad = manager
        .initialize("exploding", StrategyConfig::new("bad", "BTC/USD"))
        .await
        .unwrap();
    let good = manager
        .initialize("always_buy", StrategyConfig::new("good", "BTC/USD"))
        .await
        .unwrap();
    manager.start(&bad).await;
    manager.start(&good).await;

    manager
        .update_market_data(MarketSnapshot::new("BTC/USD", 100.0))
        .await;

    // the failing strategy is marked errored, the healthy one still queued
    assert_eq!(manager.get(&bad).await.unwrap().status, StrategyStatus::Error);
    assert_eq!(manager.get(&good).await.unwrap().pending_trades, 1);

    // errored strategies drop out of the dispatch path
    manager
        .update_market_data(MarketSnapshot::new("BTC/USD", 100.0))
        .await;
    assert_eq!(manager.get(&bad).await.unwrap().status, StrategyStatus::Error);
    assert_eq!(manager.get(&good).await.unwrap().pending_trades, 2);

    let summary = manager.summary().await;
    assert_eq!(summary.error, 1);
    assert_eq!(summary.running, 1);
}

#[tokio::test]
async fn fan_out_respects_symbol_and_status() {
    let manager = manager_with_buy().await;
    let btc = manager
        .initialize("always_buy", StrategyConfig::new("btc", "BTC/USD"))
        .await
        .unwrap();
    let eth = manager
        .initialize("always_buy", StrategyConfig::new("eth", "ETH/USD"))
        .await
        .unwrap();
    let parked = manager
        .initialize("always_buy", StrategyConfig::new("parked", "BTC/USD"))
        .await
        .unwrap();
    manager.start(&btc).await;
    manager.start(&eth).await;
    // `parked` stays stopped

    manager
        .update_market_data(MarketSnapshot::new("BTC/USD", 100.0))
        .await;

    assert_eq!(manager.get(&btc).await.unwrap().pending_trades, 1);
    assert_eq!(manager.get(&eth).await.unwrap().pending_trades, 0);
    assert_eq!(manager.get(&parked).await.unwrap().pending_trades, 0);
    assert!(manager.get(&parked).await.unwrap().last_analysis_at.is_none());

    // snapshot cache reflects the latest update per symbol
    assert!(manager.latest_snapshot("BTC/USD").await.is_some());
    assert!(manager.latest_snapshot("ETH/USD").await.is_none());
}

#[tokio::test]
async fn summary_counts_by_status() {
    let manager = manager_with_buy().await;
    let a = manager
        .initialize("always_buy", StrategyConfig::new("a", "BTC/USD"))
        .await
        .unwrap();
    let b = manager
        .initialize("always_buy", StrategyConfig::new("b", "BTC/USD"))
        .await
        .unwrap();
    let _c = manager
        .initialize("always_buy", StrategyConfig::new("c", "BTC/USD"))
        .await
        .unwrap();

    manager.start(&a).await;
    manager.start(&b).await;
    manager.pause(&b).await;

    let summary = manager.summary().await;
    assert_eq!(summary.total, 3);
    assert_eq!(summary.running, 1);
    assert_eq!(summary.paused, 1);
    assert_eq!(summary.stopped, 1);
    assert_eq!(summary.error, 0);
    assert_eq!(summary.registered_types, vec!["always_buy".to_string()]);
}

#[tokio::test]
async fn emergency_verbs_sweep_the_whole_registry() {
    let manager = manager_with_buy().await;
    let mut ids = Vec::new();
    for i in 0..4 {
        let id = manager
            .initialize("always_buy", StrategyConfig::new(format!("s{i}"), "BTC/USD"))
            .await
            .unwrap();
        manager.start(&id).await;
        ids.push(id);
    }

    manager.emergency_stop_all().await;
    for id in &ids {
        assert_eq!(manager.get(id).await.unwrap().status, StrategyStatus::Stopped);
    }

    manager.emergency_cleanup_all().await;
    assert_eq!(manager.summary().await.total, 0);
    for id in &ids {
        assert!(manager.get(id).await.is_none());
    }
}

#[tokio::test]
async fn concurrent_lifecycle_verbs_keep_the_registry_consistent() {
    let manager = Arc::new(manager_with_buy().await);

    let mut ids = Vec::new();
    for i in 0..16 {
        let id = manager
            .initialize("always_buy", StrategyConfig::new(format!("w{i}"), "BTC/USD"))
            .await
            .unwrap();
        ids.push(id);
    }

    let mut handles = Vec::new();
    for (i, id) in ids.iter().cloned().enumerate() {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.start(&id).await;
            manager.pause(&id).await;
            manager.resume(&id).await;
            if i % 2 == 0 {
                manager.stop(&id).await;
            }
        }));
    }
    // market updates race the lifecycle verbs
    {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..8 {
                manager
                    .update_market_data(MarketSnapshot::new("BTC/USD", 100.0))
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let summary = manager.summary().await;
    assert_eq!(summary.total, 16);
    assert_eq!(summary.running + summary.paused + summary.stopped + summary.error, 16);

    // cleanup half, count tracks created − cleaned
    for id in ids.iter().take(8) {
        assert!(manager.cleanup(id).await);
    }
    assert_eq!(manager.summary().await.total, 8);
}

#[tokio::test]
async fn strategy_ids_are_unique_across_instances() {
    let manager = manager_with_buy().await;
    let mut seen = std::collections::HashSet::new();
    for i in 0..32 {
        let id = manager
            .initialize("always_buy", StrategyConfig::new(format!("u{i}"), "BTC/USD"))
            .await
            .unwrap();
        assert!(seen.insert(id));
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use common::{
    Error, LifecycleSummary, MarketSnapshot, Result, StrategyStatus, Trade,
};
use strategy::{PerformanceMetrics, Policy, StrategyCell, StrategyConfig, StrategySnapshot};

/// Builds a policy instance for a registered type name.
pub type PolicyFactory = Box<dyn Fn(&StrategyConfig) -> Box<dyn Policy> + Send + Sync>;

/// Owns the registry of live strategies and drives their lifecycle:
/// initialize → setup → execute (start/stop/pause/resume, market fan-out,
/// fill routing) → cleanup.
///
/// Construct one at process start and share it behind an `Arc`; there is no
/// ambient global instance. Registry maps are guarded by `RwLock`; each cell
/// sits behind its own `Mutex` so per-strategy work happens outside the
/// registry lock but never concurrently for one cell.
pub struct StrategyManager {
    factories: RwLock<HashMap<String, PolicyFactory>>,
    cells: RwLock<HashMap<String, Arc<Mutex<StrategyCell>>>>,
    /// Latest snapshot per symbol, cached on every update.
    snapshots: RwLock<HashMap<String, MarketSnapshot>>,
}

impl StrategyManager {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            cells: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    // ── Type registry ─────────────────────────────────────────────────────

    pub async fn register(
        &self,
        type_name: impl Into<String>,
        factory: impl Fn(&StrategyConfig) -> Box<dyn Policy> + Send + Sync + 'static,
    ) {
        let type_name = type_name.into();
        info!(strategy_type = %type_name, "Registered strategy type");
        self.factories
            .write()
            .await
            .insert(type_name, Box::new(factory));
    }

    pub async fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    // ── INIT ──────────────────────────────────────────────────────────────

    /// Create and store a strategy instance. The only place ids are minted.
    pub async fn initialize(&self, type_name: &str, config: StrategyConfig) -> Result<String> {
        let policy = {
            let factories = self.factories.read().await;
            let factory = factories
                .get(type_name)
                .ok_or_else(|| Error::UnknownStrategyType(type_name.to_string()))?;
            factory(&config)
        };

        let cell = StrategyCell::new(config, policy);
        let id = cell.id().to_string();
        info!(id = %id, strategy_type = %type_name, name = %cell.name(), "Strategy initialized");
        self.cells
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(cell)));
        Ok(id)
    }

    // ── SETUP ─────────────────────────────────────────────────────────────

    /// Run the strategy's setup hook. A failing hook leaves the strategy in
    /// the error state; the failure is reported, never raised.
    pub async fn setup(&self, id: &str, params: &HashMap<String, toml::Value>) -> bool {
        let Some(cell) = self.cell(id).await else {
            warn!(id = %id, "Setup requested for unknown strategy");
            return false;
        };
        let ok = match cell.lock().await.setup(params) {
            Ok(()) => true,
            Err(e) => {
                error!(id = %id, error = %e, "Strategy setup failed");
                false
            }
        };
        ok
    }

    // ── EXECUTE ───────────────────────────────────────────────────────────

    pub async fn start(&self, id: &str) -> bool {
        self.transition(id, "start", |cell| cell.start()).await
    }

    pub async fn stop(&self, id: &str) -> bool {
        let Some(cell) = self.cell(id).await else {
            warn!(id = %id, "Stop requested for unknown strategy");
            return false;
        };
        cell.lock().await.stop();
        true
    }

    pub async fn pause(&self, id: &str) -> bool {
        self.transition(id, "pause", |cell| cell.pause()).await
    }

    pub async fn resume(&self, id: &str) -> bool {
        self.transition(id, "resume", |cell| cell.resume()).await
    }

    async fn transition<F>(&self, id: &str, op: &'static str, apply: F) -> bool
    where
        F: FnOnce(&mut StrategyCell) -> Result<()>,
    {
        let Some(cell) = self.cell(id).await else {
            warn!(id = %id, op, "Lifecycle verb for unknown strategy");
            return false;
        };
        let ok = match apply(&mut *cell.lock().await) {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %id, op, error = %e, "Lifecycle transition refused");
                false
            }
        };
        ok
    }

    /// Cache the snapshot and fan it out to running strategies trading its
    /// symbol. A failure inside one strategy's analysis marks that strategy
    /// as errored and never interrupts the fan-out to the rest.
    pub async fn update_market_data(&self, snapshot: MarketSnapshot) {
        self.snapshots
            .write()
            .await
            .insert(snapshot.symbol.clone(), snapshot.clone());

        // Snapshot the registry so per-cell work happens outside the lock.
        let targets: Vec<(String, Arc<Mutex<StrategyCell>>)> = self
            .cells
            .read()
            .await
            .iter()
            .map(|(id, cell)| (id.clone(), cell.clone()))
            .collect();

        for (id, cell) in targets {
            let mut cell = cell.lock().await;
            if cell.symbol() != snapshot.symbol {
                continue;
            }
            if let Err(e) = cell.analyze_market(&snapshot) {
                error!(id = %id, error = %e, "Strategy removed from dispatch after analysis failure");
            }
        }
    }

    /// All pending trade intents across the registry, paired with the owning
    /// strategy id for later execution reports.
    pub async fn pending_trades(&self) -> Vec<(String, Trade)> {
        let cells: Vec<(String, Arc<Mutex<StrategyCell>>)> = self
            .cells
            .read()
            .await
            .iter()
            .map(|(id, cell)| (id.clone(), cell.clone()))
            .collect();

        let mut out = Vec::new();
        for (id, cell) in cells {
            let cell = cell.lock().await;
            for trade in cell.pending() {
                out.push((id.clone(), trade.clone()));
            }
        }
        out
    }

    /// Route an execution report to the owning strategy's accounting.
    pub async fn execute_trade(
        &self,
        strategy_id: &str,
        trade_id: &str,
        executed_price: f64,
        executed_amount: f64,
        fees: f64,
    ) -> Result<Trade> {
        let cell = self
            .cell(strategy_id)
            .await
            .ok_or_else(|| Error::StrategyNotFound(strategy_id.to_string()))?;
        let mut cell = cell.lock().await;
        cell.execute_trade(trade_id, executed_price, executed_amount, fees)
    }

    // ── CLEANUP ───────────────────────────────────────────────────────────

    /// Force-stop if active, run the cleanup hook, drop from the registry.
    /// The id is unresolvable afterwards.
    pub async fn cleanup(&self, id: &str) -> bool {
        let removed = self.cells.write().await.remove(id);
        match removed {
            None => {
                warn!(id = %id, "Cleanup requested for unknown strategy");
                false
            }
            Some(cell) => {
                cell.lock().await.cleanup();
                info!(id = %id, "Strategy removed from registry");
                true
            }
        }
    }

    /// Fail-fast stop of every strategy. Iterates an id snapshot so
    /// concurrent registry mutation cannot trip the loop.
    pub async fn emergency_stop_all(&self) {
        warn!("EMERGENCY STOP: stopping all strategies");
        for id in self.ids().await {
            self.stop(&id).await;
        }
    }

    pub async fn emergency_cleanup_all(&self) {
        warn!("EMERGENCY CLEANUP: cleaning up all strategies");
        for id in self.ids().await {
            self.cleanup(&id).await;
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub async fn get(&self, id: &str) -> Option<StrategySnapshot> {
        let cell = self.cell(id).await?;
        let cell = cell.lock().await;
        Some(cell.snapshot())
    }

    pub async fn list(&self) -> Vec<StrategySnapshot> {
        let cells: Vec<Arc<Mutex<StrategyCell>>> =
            self.cells.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(cell.lock().await.snapshot());
        }
        out
    }

    pub async fn running(&self) -> Vec<StrategySnapshot> {
        self.list()
            .await
            .into_iter()
            .filter(|s| s.status == StrategyStatus::Running)
            .collect()
    }

    pub async fn metrics(&self, id: &str) -> Option<PerformanceMetrics> {
        let cell = self.cell(id).await?;
        let cell = cell.lock().await;
        Some(cell.metrics())
    }

    pub async fn metrics_all(&self) -> Vec<PerformanceMetrics> {
        let cells: Vec<Arc<Mutex<StrategyCell>>> =
            self.cells.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(cell.lock().await.metrics());
        }
        out
    }

    pub async fn summary(&self) -> LifecycleSummary {
        let snapshots = self.list().await;
        let count = |status: StrategyStatus| {
            snapshots.iter().filter(|s| s.status == status).count()
        };
        LifecycleSummary {
            total: snapshots.len(),
            running: count(StrategyStatus::Running),
            paused: count(StrategyStatus::Paused),
            stopped: count(StrategyStatus::Stopped),
            error: count(StrategyStatus::Error),
            registered_types: self.registered_types().await,
        }
    }

    pub async fn latest_snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.snapshots.read().await.get(symbol).cloned()
    }

    async fn cell(&self, id: &str) -> Option<Arc<Mutex<StrategyCell>>> {
        self.cells.read().await.get(id).cloned()
    }

    async fn ids(&self) -> Vec<String> {
        self.cells.read().await.keys().cloned().collect()
    }
}

impl Default for StrategyManager {
    fn default() -> Self {
        Self::new()
    }
}

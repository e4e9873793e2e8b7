//! Hunt Coordinator — composition root
//!
//! Owns every stateful component (breaker registry, reputation ledger,
//! settlement oracle, report cache, autopilot), wires the cross-module
//! seams (the oracle's outcome feedback goes to the concrete ledger), and
//! drives hunts end to end: fan-out → synthesis → immediate staking →
//! delayed settlement scheduling → cache. Teardown stops timers and
//! performs the final synchronous flush.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{
    AgentCaller, DeclinePayments, HttpAgentClient, HttpPriceFeed, PriceSource,
};
use crate::autopilot::{Autopilot, AutopilotStatus, HuntRunner};
use crate::cache::ReportCache;
use crate::config::AppConfig;
use crate::coordination::{BreakerSnapshot, CircuitBreakerRegistry, Shutdown};
use crate::domain::{AgentDescriptor, Direction, ReputationSnapshot, Synthesis};
use crate::error::{QuarryError, Result};
use crate::hunt::events::{emit, HuntEvent};
use crate::hunt::{HuntOrchestrator, Synthesizer};
use crate::persistence::{JsonStore, Persist};
use crate::reputation::{ReputationLedger, StakingEngine};
use crate::services::Metrics;
use crate::settlement::{PendingSettlement, SettlementOracle, SettlementOutcome};

const MAX_TOPIC_LEN: usize = 200;

pub struct HuntCoordinator {
    cfg: AppConfig,
    orchestrator: HuntOrchestrator,
    synthesizer: Synthesizer,
    ledger: Arc<ReputationLedger>,
    breakers: Arc<CircuitBreakerRegistry>,
    oracle: Arc<SettlementOracle>,
    cache: Arc<ReportCache>,
    store: Arc<JsonStore>,
    metrics: Arc<Metrics>,
    autopilot: Arc<Autopilot>,
    shutdown: Shutdown,
}

impl HuntCoordinator {
    /// Build with production adapters: HTTP agents, HTTP price feed, and
    /// the declining payment handler.
    pub async fn bootstrap(cfg: AppConfig) -> Result<Arc<Self>> {
        let caller: Arc<dyn AgentCaller> =
            Arc::new(HttpAgentClient::new(Arc::new(DeclinePayments))?);
        let prices: Arc<dyn PriceSource> = Arc::new(HttpPriceFeed::new(&cfg.oracle)?);
        Self::bootstrap_with(cfg, caller, prices).await
    }

    /// Build with injected adapters; the seam integration tests use.
    pub async fn bootstrap_with(
        cfg: AppConfig,
        caller: Arc<dyn AgentCaller>,
        prices: Arc<dyn PriceSource>,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(JsonStore::new(cfg.persistence.resolved_data_dir()));
        let metrics = Arc::new(Metrics::new());

        let ledger = Arc::new(ReputationLedger::new(cfg.staking.clone()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(cfg.breaker.clone()));
        let oracle = Arc::new(SettlementOracle::new(
            cfg.settlement.clone(),
            cfg.oracle.proxy_keywords.clone(),
            cfg.oracle.baseline_asset.clone(),
            prices,
            ledger.clone(),
            metrics.clone(),
        ));
        let cache = Arc::new(ReportCache::new(cfg.cache.clone()));
        let autopilot = Arc::new(Autopilot::new(cfg.autopilot.clone()));

        // Corrupt or missing documents never block startup; in-memory
        // defaults are authoritative until the next flush.
        for component in [
            ledger.clone() as Arc<dyn Persist>,
            oracle.clone() as Arc<dyn Persist>,
            cache.clone() as Arc<dyn Persist>,
            autopilot.clone() as Arc<dyn Persist>,
        ] {
            if let Err(e) = store.load(component.as_ref()).await {
                warn!("{e}");
            }
        }

        let orchestrator = HuntOrchestrator::new(
            cfg.agents.registry.clone(),
            caller,
            breakers.clone(),
            ledger.clone(),
            Duration::from_millis(cfg.agents.call_timeout_ms),
            metrics.clone(),
        );
        let synthesizer = Synthesizer::new(StakingEngine::new(cfg.staking.clone()));

        info!(
            agents = cfg.agents.registry.len(),
            data_dir = %store.dir().display(),
            "hunt coordinator bootstrapped"
        );

        Ok(Arc::new(Self {
            cfg,
            orchestrator,
            synthesizer,
            ledger,
            breakers,
            oracle,
            cache,
            store,
            metrics,
            autopilot,
            shutdown: Shutdown::new(),
        }))
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn autopilot(&self) -> &Arc<Autopilot> {
        &self.autopilot
    }

    /// Spawn the background loops: settlement sweep, cache TTL sweep and
    /// the debounced persistence flusher. Optionally the autopilot.
    pub async fn start_background(self: &Arc<Self>) {
        self.oracle.spawn_sweep(self.shutdown.subscribe());
        self.cache.spawn_sweep(self.shutdown.subscribe());
        self.store.spawn_flusher(
            self.persisted_components(),
            Duration::from_secs(self.cfg.persistence.flush_interval_secs),
            self.shutdown.subscribe(),
        );
        if self.cfg.autopilot.enabled {
            let runner: Arc<dyn HuntRunner> = Arc::clone(self) as Arc<dyn HuntRunner>;
            self.autopilot.start(runner).await;
        }
    }

    fn persisted_components(&self) -> Vec<Arc<dyn Persist>> {
        vec![
            self.ledger.clone(),
            self.oracle.clone(),
            self.cache.clone(),
            self.autopilot.clone(),
        ]
    }

    /// Stop timers and flush every dirty document synchronously. Safe to
    /// call more than once.
    pub async fn teardown(&self) {
        self.autopilot.stop().await;
        self.shutdown.trigger();
        let flushed = self.store.flush_all(&self.persisted_components()).await;
        info!(flushed, "final flush complete");
    }

    /// Synchronous hunt: returns the full synthesis. Degrades, never
    /// aborts — a hunt with zero live agents still yields a synthesis.
    pub async fn run_hunt(&self, topic: &str) -> Result<Synthesis> {
        let topic = validate_topic(topic)?;
        let (cancel, _guard) = broadcast::channel(1);
        Ok(self.hunt(topic, None, &cancel).await)
    }

    /// Incremental hunt: the ordered event sequence lands on `events`,
    /// terminated with `done` even on invalid input. Dropping or
    /// triggering `cancel` aborts the hunt's outstanding agent calls.
    pub async fn run_hunt_streaming(
        &self,
        topic: &str,
        events: mpsc::Sender<HuntEvent>,
        cancel: broadcast::Sender<()>,
    ) {
        match validate_topic(topic) {
            Ok(topic) => {
                self.hunt(topic, Some(&events), &cancel).await;
            }
            Err(e) => {
                emit(
                    Some(&events),
                    HuntEvent::Error {
                        message: e.to_string(),
                    },
                )
                .await;
                emit(
                    Some(&events),
                    HuntEvent::Done {
                        hunt_id: Uuid::nil(),
                    },
                )
                .await;
            }
        }
    }

    async fn hunt(
        &self,
        topic: &str,
        events: Option<&mpsc::Sender<HuntEvent>>,
        cancel: &broadcast::Sender<()>,
    ) -> Synthesis {
        let hunt_id = Uuid::new_v4();
        let agents = self.orchestrator.agents().await;
        emit(
            events,
            HuntEvent::Start {
                hunt_id,
                topic: topic.to_string(),
                agents: agents.iter().map(|a| a.key.clone()).collect(),
                at: chrono::Utc::now(),
            },
        )
        .await;

        let fanout = self.orchestrator.fan_out(topic, cancel, events).await;
        let mut synthesis = self
            .synthesizer
            .synthesize(hunt_id, topic, &fanout, &self.ledger)
            .await;
        self.metrics.inc_hunts();

        // Schedule the delayed ground-truth check for every direction
        // that fed consensus. A missing snapshot price degrades to a
        // warning; the hunt result stands.
        let declared: BTreeMap<String, Direction> = fanout
            .outcomes
            .iter()
            .filter(|o| !o.excluded)
            .filter_map(|o| {
                o.reply
                    .as_ref()
                    .map(|r| (o.descriptor.key.clone(), r.position.direction))
            })
            .collect();
        if declared.is_empty() {
            synthesis
                .warnings
                .push("no signals to settle; ground-truth check skipped".into());
        } else {
            match self
                .oracle
                .schedule(hunt_id, topic, synthesis.consensus, declared)
                .await
            {
                Ok(pending) => {
                    info!(
                        hunt_id = %hunt_id,
                        asset = %pending.asset_id,
                        settle_at = %pending.settle_at,
                        "ground-truth settlement scheduled"
                    );
                }
                Err(e) => {
                    warn!(hunt_id = %hunt_id, "settlement scheduling failed: {e}");
                    synthesis
                        .warnings
                        .push(format!("settlement not scheduled: {e}"));
                }
            }
        }

        emit(
            events,
            HuntEvent::Alpha {
                synthesis: Box::new(synthesis.clone()),
            },
        )
        .await;

        let report_id = self.cache.put(synthesis.clone()).await;
        emit(events, HuntEvent::Cached { report_id }).await;
        emit(events, HuntEvent::Done { hunt_id }).await;

        synthesis
    }

    // --- read surface ---

    pub async fn agents(&self) -> Vec<AgentDescriptor> {
        self.orchestrator.agents().await
    }

    pub async fn register_agent(&self, descriptor: AgentDescriptor) -> Result<()> {
        self.orchestrator.register(descriptor).await
    }

    pub async fn reputation(&self) -> BTreeMap<String, ReputationSnapshot> {
        self.ledger.snapshot().await
    }

    pub async fn circuits(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshot().await
    }

    pub async fn pending_settlements(&self) -> Vec<PendingSettlement> {
        self.oracle.pending().await
    }

    pub async fn settlement_history(&self) -> Vec<SettlementOutcome> {
        self.oracle.history().await
    }

    pub async fn autopilot_status(&self) -> AutopilotStatus {
        self.autopilot.status().await
    }

    pub async fn report(&self, id: &str) -> Option<Synthesis> {
        self.cache.get(id).await
    }

    pub async fn cached_reports(&self) -> usize {
        self.cache.len().await
    }

    pub fn cache_hit_counts(&self) -> (u64, u64) {
        self.cache.hit_counts()
    }
}

#[async_trait::async_trait]
impl HuntRunner for HuntCoordinator {
    async fn run_hunt(&self, topic: &str) -> Result<Synthesis> {
        HuntCoordinator::run_hunt(self, topic).await
    }
}

/// Boundary validation: the core never sees an invalid topic.
fn validate_topic(topic: &str) -> Result<&str> {
    let trimmed = topic.trim();
    if trimmed.is_empty() {
        return Err(QuarryError::Validation("topic must not be empty".into()));
    }
    if trimmed.len() > MAX_TOPIC_LEN {
        return Err(QuarryError::Validation(format!(
            "topic exceeds {MAX_TOPIC_LEN} characters"
        )));
    }
    Ok(trimmed)
}

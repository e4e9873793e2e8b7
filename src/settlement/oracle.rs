//! Settlement Oracle
//!
//! A hunt's consensus can be unanimous and still wrong. Every hunt is
//! therefore re-checked against reality after a delay: the topic is mapped
//! to a proxy asset, a price snapshot is taken at hunt time, and a periodic
//! sweep later compares the settled price against the snapshot. The outcome
//! feeds per-agent ground-truth reputation updates through the
//! `OutcomeFeedback` seam — the oracle never knows the concrete ledger.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::PriceSource;
use crate::config::SettlementConfig;
use crate::domain::Direction;
use crate::error::Result;
use crate::persistence::Persist;
use crate::services::Metrics;

/// Delayed reputation update fed by settled ground truth. Implemented by
/// the reputation ledger and wired in by the coordinator at startup.
#[async_trait]
pub trait OutcomeFeedback: Send + Sync {
    async fn record_outcome(&self, agent_key: &str, correct: bool);
}

/// A hunt awaiting ground truth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSettlement {
    pub hunt_id: Uuid,
    pub topic: String,
    pub asset_id: String,
    pub consensus: Direction,
    pub snapshot_price: Decimal,
    pub settle_at: DateTime<Utc>,
    /// Each agent's declared direction at hunt time
    pub declared: BTreeMap<String, Direction>,
    #[serde(default)]
    pub deferrals: u32,
}

/// A completed ground-truth check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub hunt_id: Uuid,
    pub topic: String,
    pub asset_id: String,
    pub snapshot_price: Decimal,
    pub settled_price: Decimal,
    pub change_pct: Decimal,
    pub actual: Direction,
    pub consensus: Direction,
    pub consensus_correct: bool,
    pub per_agent: BTreeMap<String, bool>,
    pub settled_at: DateTime<Utc>,
}

/// Classify a percentage move with a symmetric dead zone: moves at or
/// below `min_move_pct` in magnitude are neutral.
pub fn classify_move(change_pct: Decimal, min_move_pct: Decimal) -> Direction {
    if change_pct > min_move_pct {
        Direction::Bullish
    } else if change_pct < -min_move_pct {
        Direction::Bearish
    } else {
        Direction::Neutral
    }
}

/// Map a topic to its ground-truth proxy asset by keyword, falling back to
/// the configured baseline.
pub fn proxy_asset(topic: &str, cfg: &SettlementProxyCfg<'_>) -> String {
    let lowered = topic.to_lowercase();
    for (keyword, asset) in cfg.keywords {
        if lowered.contains(keyword.as_str()) {
            return asset.clone();
        }
    }
    cfg.baseline.to_string()
}

/// Borrowed view of the proxy-mapping config
pub struct SettlementProxyCfg<'a> {
    pub keywords: &'a std::collections::HashMap<String, String>,
    pub baseline: &'a str,
}

pub struct SettlementOracle {
    cfg: SettlementConfig,
    proxy_keywords: std::collections::HashMap<String, String>,
    baseline_asset: String,
    prices: Arc<dyn PriceSource>,
    feedback: Arc<dyn OutcomeFeedback>,
    metrics: Arc<Metrics>,
    pending: RwLock<Vec<PendingSettlement>>,
    history: RwLock<VecDeque<SettlementOutcome>>,
    dirty: AtomicBool,
}

impl SettlementOracle {
    pub fn new(
        cfg: SettlementConfig,
        proxy_keywords: std::collections::HashMap<String, String>,
        baseline_asset: String,
        prices: Arc<dyn PriceSource>,
        feedback: Arc<dyn OutcomeFeedback>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cfg,
            proxy_keywords,
            baseline_asset,
            prices,
            feedback,
            metrics,
            pending: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn resolve_asset(&self, topic: &str) -> String {
        proxy_asset(
            topic,
            &SettlementProxyCfg {
                keywords: &self.proxy_keywords,
                baseline: &self.baseline_asset,
            },
        )
    }

    /// Snapshot the proxy asset's price and enqueue a delayed check. The
    /// pending set is capped; the oldest entry is evicted past the cap.
    pub async fn schedule(
        &self,
        hunt_id: Uuid,
        topic: &str,
        consensus: Direction,
        declared: BTreeMap<String, Direction>,
    ) -> Result<PendingSettlement> {
        let asset_id = self.resolve_asset(topic);
        let snapshot_price = self.prices.price_usd(&asset_id).await?;

        let entry = PendingSettlement {
            hunt_id,
            topic: topic.to_string(),
            asset_id,
            consensus,
            snapshot_price,
            settle_at: Utc::now() + ChronoDuration::seconds(self.cfg.delay_secs as i64),
            declared,
            deferrals: 0,
        };

        {
            let mut pending = self.pending.write().await;
            if pending.len() >= self.cfg.pending_cap {
                pending.sort_by_key(|p| p.settle_at);
                let evicted = pending.remove(0);
                warn!(
                    hunt_id = %evicted.hunt_id,
                    "pending settlement set full, evicting oldest entry"
                );
            }
            pending.push(entry.clone());
        }
        self.dirty.store(true, Ordering::SeqCst);

        debug!(
            hunt_id = %hunt_id,
            asset = %entry.asset_id,
            snapshot = %entry.snapshot_price,
            settle_at = %entry.settle_at,
            "settlement scheduled"
        );
        Ok(entry)
    }

    /// Process every due entry once. Returns the number settled. A failed
    /// price fetch defers the entry instead of discarding it.
    pub async fn process_due(&self) -> usize {
        let now = Utc::now();
        let due: Vec<PendingSettlement> = {
            let pending = self.pending.read().await;
            pending
                .iter()
                .filter(|p| p.settle_at <= now)
                .cloned()
                .collect()
        };

        let mut settled = 0;
        for entry in due {
            match self.prices.price_usd(&entry.asset_id).await {
                Ok(price) => {
                    self.settle_entry(&entry, price).await;
                    settled += 1;
                }
                Err(e) => {
                    self.defer_entry(entry.hunt_id, &e.to_string()).await;
                }
            }
        }
        if settled > 0 {
            self.metrics.add_settlements(settled as u64);
        }
        settled
    }

    async fn settle_entry(&self, entry: &PendingSettlement, settled_price: Decimal) {
        let change_pct = if entry.snapshot_price.is_zero() {
            Decimal::ZERO
        } else {
            (settled_price - entry.snapshot_price) / entry.snapshot_price * Decimal::ONE_HUNDRED
        };
        let actual = classify_move(change_pct, self.cfg.min_move_pct);

        // The dead zone is deliberately unfalsifiable: a directionless
        // market marks every bet correct, consensus included.
        let mut per_agent = BTreeMap::new();
        for (agent, declared) in &entry.declared {
            let correct = actual == Direction::Neutral || *declared == actual;
            self.feedback.record_outcome(agent, correct).await;
            per_agent.insert(agent.clone(), correct);
        }
        let consensus_correct = actual == Direction::Neutral || entry.consensus == actual;

        let outcome = SettlementOutcome {
            hunt_id: entry.hunt_id,
            topic: entry.topic.clone(),
            asset_id: entry.asset_id.clone(),
            snapshot_price: entry.snapshot_price,
            settled_price,
            change_pct,
            actual,
            consensus: entry.consensus,
            consensus_correct,
            per_agent,
            settled_at: Utc::now(),
        };

        info!(
            hunt_id = %entry.hunt_id,
            asset = %entry.asset_id,
            change_pct = %change_pct,
            actual = %actual,
            consensus_correct,
            "settlement completed"
        );

        // Settled at most once: drop from pending before recording.
        {
            let mut pending = self.pending.write().await;
            pending.retain(|p| p.hunt_id != entry.hunt_id);
        }
        {
            let mut history = self.history.write().await;
            history.push_back(outcome);
            while history.len() > self.cfg.history_cap {
                history.pop_front();
            }
        }
        self.dirty.store(true, Ordering::SeqCst);
    }

    async fn defer_entry(&self, hunt_id: Uuid, reason: &str) {
        // Jitter the deferral so a flapping price feed doesn't line every
        // retry up on the same sweep.
        let jitter_secs = {
            let cap = (self.cfg.retry_interval_secs / 5).max(1);
            rand::thread_rng().gen_range(0..cap) as i64
        };
        let mut pending = self.pending.write().await;
        if let Some(entry) = pending.iter_mut().find(|p| p.hunt_id == hunt_id) {
            entry.settle_at = Utc::now()
                + ChronoDuration::seconds(self.cfg.retry_interval_secs as i64 + jitter_secs);
            entry.deferrals += 1;
            warn!(
                hunt_id = %hunt_id,
                deferrals = entry.deferrals,
                "price unavailable, settlement deferred: {reason}"
            );
        }
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub async fn pending(&self) -> Vec<PendingSettlement> {
        let mut out = self.pending.read().await.clone();
        out.sort_by_key(|p| p.settle_at);
        out
    }

    pub async fn history(&self) -> Vec<SettlementOutcome> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Spawn the periodic sweep; runs until shutdown fires.
    pub fn spawn_sweep(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let oracle = Arc::clone(self);
        let interval = std::time::Duration::from_secs(oracle.cfg.sweep_interval_secs);
        info!(
            interval_secs = oracle.cfg.sweep_interval_secs,
            "settlement sweep started"
        );
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = timer.tick() => {
                        let settled = oracle.process_due().await;
                        if settled > 0 {
                            debug!(settled, "settlement sweep cycle");
                        }
                    }
                }
            }
            info!("settlement sweep stopped");
        })
    }
}

#[derive(Serialize, Deserialize)]
struct SettlementDocument {
    pending: Vec<PendingSettlement>,
    history: Vec<SettlementOutcome>,
}

#[async_trait]
impl Persist for SettlementOracle {
    fn document(&self) -> &'static str {
        "settlements"
    }

    async fn to_document(&self) -> Value {
        let doc = SettlementDocument {
            pending: self.pending.read().await.clone(),
            history: self.history.read().await.iter().cloned().collect(),
        };
        serde_json::to_value(doc).unwrap_or(Value::Null)
    }

    async fn restore(&self, doc: &Value) -> std::result::Result<(), String> {
        let doc: SettlementDocument =
            serde_json::from_value(doc.clone()).map_err(|e| e.to_string())?;
        *self.pending.write().await = doc.pending;
        *self.history.write().await = doc.history.into();
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockPriceSource;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Records ground-truth feedback for assertions
    struct RecordingFeedback {
        outcomes: Mutex<Vec<(String, bool)>>,
    }

    impl RecordingFeedback {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(Vec::new()),
            })
        }

        fn recorded(&self) -> Vec<(String, bool)> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutcomeFeedback for RecordingFeedback {
        async fn record_outcome(&self, agent_key: &str, correct: bool) {
            self.outcomes
                .lock()
                .unwrap()
                .push((agent_key.to_string(), correct));
        }
    }

    fn oracle_with(
        prices: MockPriceSource,
        feedback: Arc<RecordingFeedback>,
        cfg: SettlementConfig,
    ) -> SettlementOracle {
        SettlementOracle::new(
            cfg,
            crate::config::OracleConfig::default().proxy_keywords,
            "bitcoin".into(),
            Arc::new(prices),
            feedback,
            Arc::new(Metrics::new()),
        )
    }

    fn immediate_cfg() -> SettlementConfig {
        SettlementConfig {
            delay_secs: 0,
            retry_interval_secs: 60,
            ..Default::default()
        }
    }

    #[test]
    fn dead_zone_classification() {
        let min_move = dec!(0.3);
        assert_eq!(classify_move(dec!(0.2), min_move), Direction::Neutral);
        assert_eq!(classify_move(dec!(-0.3), min_move), Direction::Neutral);
        assert_eq!(classify_move(dec!(0.5), min_move), Direction::Bullish);
        assert_eq!(classify_move(dec!(-0.8), min_move), Direction::Bearish);
    }

    #[test]
    fn topics_map_to_proxy_assets_by_keyword() {
        let cfg = crate::config::OracleConfig::default();
        let proxy = SettlementProxyCfg {
            keywords: &cfg.proxy_keywords,
            baseline: &cfg.baseline_asset,
        };
        assert_eq!(proxy_asset("ETH rollup season", &proxy), "ethereum");
        assert_eq!(proxy_asset("Will Bitcoin reclaim 100k", &proxy), "bitcoin");
        assert_eq!(proxy_asset("macro uncertainty", &proxy), "bitcoin");
    }

    #[tokio::test]
    async fn neutral_move_marks_every_direction_correct() {
        let mut prices = MockPriceSource::new();
        prices
            .expect_price_usd()
            .returning(|_| Ok(dec!(100)))
            .times(1);
        // +0.2% on settlement, inside the 0.3% dead zone
        prices
            .expect_price_usd()
            .returning(|_| Ok(dec!(100.2)))
            .times(1);

        let feedback = RecordingFeedback::new();
        let oracle = oracle_with(prices, feedback.clone(), immediate_cfg());

        let mut declared = BTreeMap::new();
        declared.insert("bull-agent".to_string(), Direction::Bullish);
        declared.insert("bear-agent".to_string(), Direction::Bearish);

        oracle
            .schedule(Uuid::new_v4(), "bitcoin", Direction::Bullish, declared)
            .await
            .unwrap();
        assert_eq!(oracle.process_due().await, 1);

        let history = oracle.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].actual, Direction::Neutral);
        assert!(history[0].consensus_correct);
        assert!(history[0].per_agent.values().all(|c| *c));
        assert!(feedback.recorded().iter().all(|(_, correct)| *correct));
        assert_eq!(oracle.pending_len().await, 0);
    }

    #[tokio::test]
    async fn directional_move_judges_each_declared_direction() {
        let mut prices = MockPriceSource::new();
        prices
            .expect_price_usd()
            .returning(|_| Ok(dec!(100)))
            .times(1);
        // +0.5%, above the dead zone
        prices
            .expect_price_usd()
            .returning(|_| Ok(dec!(100.5)))
            .times(1);

        let feedback = RecordingFeedback::new();
        let oracle = oracle_with(prices, feedback.clone(), immediate_cfg());

        let mut declared = BTreeMap::new();
        declared.insert("bull-agent".to_string(), Direction::Bullish);
        declared.insert("bear-agent".to_string(), Direction::Bearish);

        oracle
            .schedule(Uuid::new_v4(), "bitcoin", Direction::Bearish, declared)
            .await
            .unwrap();
        assert_eq!(oracle.process_due().await, 1);

        let history = oracle.history().await;
        assert_eq!(history[0].actual, Direction::Bullish);
        assert!(!history[0].consensus_correct);
        assert_eq!(history[0].per_agent["bull-agent"], true);
        assert_eq!(history[0].per_agent["bear-agent"], false);

        let recorded = feedback.recorded();
        assert!(recorded.contains(&("bull-agent".to_string(), true)));
        assert!(recorded.contains(&("bear-agent".to_string(), false)));
    }

    #[tokio::test]
    async fn price_failure_defers_instead_of_discarding() {
        let mut prices = MockPriceSource::new();
        prices
            .expect_price_usd()
            .returning(|_| Ok(dec!(100)))
            .times(1);
        prices.expect_price_usd().returning(|asset| {
            Err(crate::error::QuarryError::PriceUnavailable {
                asset: asset.to_string(),
                reason: "feed down".into(),
            })
        });

        let feedback = RecordingFeedback::new();
        let oracle = oracle_with(prices, feedback, immediate_cfg());

        oracle
            .schedule(
                Uuid::new_v4(),
                "bitcoin",
                Direction::Bullish,
                BTreeMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(oracle.process_due().await, 0);

        let pending = oracle.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].deferrals, 1);
        assert!(pending[0].settle_at > Utc::now());
    }

    #[tokio::test]
    async fn pending_set_evicts_oldest_past_cap() {
        let mut prices = MockPriceSource::new();
        prices.expect_price_usd().returning(|_| Ok(dec!(100)));

        let feedback = RecordingFeedback::new();
        let cfg = SettlementConfig {
            pending_cap: 2,
            delay_secs: 600,
            ..Default::default()
        };
        let oracle = oracle_with(prices, feedback, cfg);

        let first = oracle
            .schedule(Uuid::new_v4(), "a", Direction::Neutral, BTreeMap::new())
            .await
            .unwrap();
        for topic in ["b", "c"] {
            oracle
                .schedule(Uuid::new_v4(), topic, Direction::Neutral, BTreeMap::new())
                .await
                .unwrap();
        }

        let pending = oracle.pending().await;
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|p| p.hunt_id != first.hunt_id));
    }
}

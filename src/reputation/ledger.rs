//! Reputation Ledger
//!
//! Per-agent trust scores in [0, 1], nudged by two independent feedback
//! paths: immediate stake settlement against consensus (small step) and
//! delayed ground-truth settlement against real price movement (larger
//! step). Scores drive consensus weighting, competition resolution, and
//! dynamic per-agent pricing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::StakingConfig;
use crate::domain::{AgentDescriptor, AgentPricing, ReputationSnapshot};
use crate::persistence::Persist;
use crate::settlement::OutcomeFeedback;

pub const DEFAULT_SCORE: f64 = 0.5;

/// Which feedback path produced a score change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    Stake,
    GroundTruth,
}

/// One entry in an agent's bounded score-change ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreChange {
    pub delta: f64,
    pub score_after: f64,
    pub source: FeedbackSource,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReputationRecord {
    score: f64,
    hunts: u64,
    correct: u64,
    cumulative_pnl: Decimal,
    history: VecDeque<ScoreChange>,
}

impl ReputationRecord {
    fn new() -> Self {
        Self {
            score: DEFAULT_SCORE,
            hunts: 0,
            correct: 0,
            cumulative_pnl: Decimal::ZERO,
            history: VecDeque::new(),
        }
    }
}

pub struct ReputationLedger {
    cfg: StakingConfig,
    records: RwLock<HashMap<String, ReputationRecord>>,
    dirty: AtomicBool,
}

impl ReputationLedger {
    pub fn new(cfg: StakingConfig) -> Self {
        Self {
            cfg,
            records: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Current score, defaulting to 0.5 for unseen agents.
    pub async fn score(&self, agent_key: &str) -> f64 {
        self.records
            .read()
            .await
            .get(agent_key)
            .map(|r| r.score)
            .unwrap_or(DEFAULT_SCORE)
    }

    /// Count a hunt this agent participated in.
    pub async fn note_hunt(&self, agent_key: &str) {
        let mut records = self.records.write().await;
        records
            .entry(agent_key.to_string())
            .or_insert_with(ReputationRecord::new)
            .hunts += 1;
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Immediate feedback: stake agreement against consensus. Returns the
    /// score before and after the nudge.
    pub async fn apply_stake_outcome(
        &self,
        agent_key: &str,
        agreed: bool,
        pnl: Decimal,
    ) -> (f64, f64) {
        let step = if agreed {
            self.cfg.stake_step
        } else {
            -self.cfg.stake_step
        };
        self.nudge(agent_key, step, FeedbackSource::Stake, Some(pnl), false)
            .await
    }

    async fn nudge(
        &self,
        agent_key: &str,
        step: f64,
        source: FeedbackSource,
        pnl: Option<Decimal>,
        correct: bool,
    ) -> (f64, f64) {
        let mut records = self.records.write().await;
        let record = records
            .entry(agent_key.to_string())
            .or_insert_with(ReputationRecord::new);

        let before = record.score;
        record.score = (record.score + step).clamp(0.0, 1.0);
        if let Some(pnl) = pnl {
            record.cumulative_pnl += pnl;
        }
        if correct {
            record.correct += 1;
        }
        record.history.push_back(ScoreChange {
            delta: record.score - before,
            score_after: record.score,
            source,
            at: Utc::now(),
        });
        while record.history.len() > self.cfg.history_len {
            record.history.pop_front();
        }
        let after = record.score;
        drop(records);

        self.dirty.store(true, Ordering::SeqCst);
        debug!(
            agent = agent_key,
            before, after, ?source, "reputation nudged"
        );
        (before, after)
    }

    /// Reputation-adjusted price: proven agents command up to 1.5× list,
    /// distrusted ones discount toward 0.5×. A fresh agent (score 0.5)
    /// trades at list price.
    pub async fn effective_price(&self, agent: &AgentDescriptor) -> Decimal {
        let score = self.score(&agent.key).await;
        price_at(agent.base_price, score)
    }

    pub async fn pricing(&self, agents: &[AgentDescriptor]) -> BTreeMap<String, AgentPricing> {
        let mut out = BTreeMap::new();
        for agent in agents {
            let score = self.score(&agent.key).await;
            out.insert(
                agent.key.clone(),
                AgentPricing {
                    base_price: agent.base_price,
                    effective_price: price_at(agent.base_price, score),
                    reputation: score,
                },
            );
        }
        out
    }

    pub async fn snapshot(&self) -> BTreeMap<String, ReputationSnapshot> {
        let records = self.records.read().await;
        records
            .iter()
            .map(|(key, r)| {
                let accuracy = if r.hunts > 0 {
                    r.correct as f64 / r.hunts as f64
                } else {
                    0.0
                };
                (
                    key.clone(),
                    ReputationSnapshot {
                        score: r.score,
                        hunts: r.hunts,
                        correct: r.correct,
                        accuracy,
                        cumulative_pnl: r.cumulative_pnl,
                    },
                )
            })
            .collect()
    }
}

fn price_at(base: Decimal, score: f64) -> Decimal {
    let multiplier =
        Decimal::from_f64(0.5 + score).unwrap_or_else(|| Decimal::new(1, 0));
    base * multiplier
}

#[async_trait]
impl OutcomeFeedback for ReputationLedger {
    /// Delayed feedback: ground-truth settlement. Larger step than the
    /// self-referential stake nudge.
    async fn record_outcome(&self, agent_key: &str, correct: bool) {
        let step = if correct {
            self.cfg.truth_step
        } else {
            -self.cfg.truth_step
        };
        self.nudge(agent_key, step, FeedbackSource::GroundTruth, None, correct)
            .await;
    }
}

#[derive(Serialize, Deserialize)]
struct ReputationDocument {
    records: HashMap<String, ReputationRecord>,
}

#[async_trait]
impl Persist for ReputationLedger {
    fn document(&self) -> &'static str {
        "reputation"
    }

    async fn to_document(&self) -> Value {
        let doc = ReputationDocument {
            records: self.records.read().await.clone(),
        };
        serde_json::to_value(doc).unwrap_or(Value::Null)
    }

    async fn restore(&self, doc: &Value) -> std::result::Result<(), String> {
        let doc: ReputationDocument =
            serde_json::from_value(doc.clone()).map_err(|e| e.to_string())?;
        *self.records.write().await = doc.records;
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }
}

//! Fan-out Orchestrator
//!
//! Dispatches one guarded call per registered agent, all before any result
//! is awaited, and settles every call (success, failure, or timeout)
//! before producing a result. A single agent failing never aborts the
//! hunt: failures become `null` results plus a warning string. Competing
//! agent pairs are raced and resolved by reputation-per-dollar.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};

use crate::adapters::AgentCaller;
use crate::coordination::CircuitBreakerRegistry;
use crate::domain::{AgentDescriptor, AgentReply, CompetitionOutcome};
use crate::error::{QuarryError, Result};
use crate::hunt::events::{emit, HuntEvent};
use crate::reputation::ReputationLedger;
use crate::services::Metrics;

/// One agent's settled call within a hunt
#[derive(Debug)]
pub struct AgentOutcome {
    pub descriptor: AgentDescriptor,
    pub index: usize,
    /// `None` when the call failed; the hunt degrades instead of aborting
    pub reply: Option<AgentReply>,
    pub warning: Option<String>,
    pub latency_ms: u64,
    /// Lost a competition; excluded from synthesis input
    pub excluded: bool,
}

/// Everything a fan-out produced, before synthesis
#[derive(Debug, Default)]
pub struct FanOutResult {
    pub outcomes: Vec<AgentOutcome>,
    pub warnings: Vec<String>,
    pub competitions: Vec<CompetitionOutcome>,
}

pub struct HuntOrchestrator {
    registry: RwLock<Vec<AgentDescriptor>>,
    caller: Arc<dyn AgentCaller>,
    breakers: Arc<CircuitBreakerRegistry>,
    ledger: Arc<ReputationLedger>,
    call_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl HuntOrchestrator {
    pub fn new(
        registry: Vec<AgentDescriptor>,
        caller: Arc<dyn AgentCaller>,
        breakers: Arc<CircuitBreakerRegistry>,
        ledger: Arc<ReputationLedger>,
        call_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry: RwLock::new(registry),
            caller,
            breakers,
            ledger,
            call_timeout,
            metrics,
        }
    }

    pub async fn agents(&self) -> Vec<AgentDescriptor> {
        self.registry.read().await.clone()
    }

    /// Register an agent at runtime. Keys must stay unique; reputation and
    /// breaker state attach to the key on first use.
    pub async fn register(&self, descriptor: AgentDescriptor) -> Result<()> {
        let mut registry = self.registry.write().await;
        if registry.iter().any(|a| a.key == descriptor.key) {
            return Err(QuarryError::Validation(format!(
                "agent key already registered: {}",
                descriptor.key
            )));
        }
        registry.push(descriptor);
        Ok(())
    }

    /// Fan a topic out to every agent and settle all calls. The cancel
    /// channel is shared by every outstanding call of this hunt; dropping
    /// or triggering it cancels them without touching other hunts.
    pub async fn fan_out(
        &self,
        topic: &str,
        cancel: &broadcast::Sender<()>,
        events: Option<&mpsc::Sender<HuntEvent>>,
    ) -> FanOutResult {
        let agents = self.agents().await;
        let mut handles = Vec::with_capacity(agents.len());

        // Dispatch everything before awaiting anything.
        for (index, descriptor) in agents.into_iter().enumerate() {
            let caller = Arc::clone(&self.caller);
            let breakers = Arc::clone(&self.breakers);
            let cancel_rx = cancel.subscribe();
            let topic = topic.to_string();
            let timeout = self.call_timeout;
            let metrics = Arc::clone(&self.metrics);
            self.metrics.inc_agent_calls();
            handles.push(tokio::spawn(call_one(
                index, descriptor, topic, caller, breakers, timeout, cancel_rx, metrics,
            )));
        }

        let mut result = FanOutResult::default();
        for handle in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // A panicked task settles as a warning, not a crash.
                    warn!("agent call task failed: {e}");
                    continue;
                }
            };

            if let Some(reply) = &outcome.reply {
                if let Some(amount) = reply.payment {
                    self.metrics.inc_payments();
                    emit(
                        events,
                        HuntEvent::Paying {
                            agent: outcome.descriptor.key.clone(),
                            amount: Some(amount),
                        },
                    )
                    .await;
                }
            } else if let Some(warning) = &outcome.warning {
                self.metrics.inc_agent_failures();
                result.warnings.push(warning.clone());
            }

            emit(
                events,
                HuntEvent::Result {
                    agent: outcome.descriptor.key.clone(),
                    ok: outcome.reply.is_some(),
                    direction: outcome.reply.as_ref().map(|r| r.position.direction),
                    confidence: outcome.reply.as_ref().map(|r| r.position.confidence),
                    warning: outcome.warning.clone(),
                    latency_ms: outcome.latency_ms,
                },
            )
            .await;

            result.outcomes.push(outcome);
        }

        result.competitions = self.resolve_competitions(&mut result.outcomes).await;
        for competition in &result.competitions {
            emit(
                events,
                HuntEvent::Competition {
                    winner: competition.winner.clone(),
                    loser: competition.loser.clone(),
                    winner_ratio: competition.winner_ratio,
                    loser_ratio: competition.loser_ratio,
                },
            )
            .await;
        }

        result
    }

    /// Race declared rival pairs: higher reputation-per-dollar wins, ties
    /// favor the lower-index (primary) agent. Losers stay in the outcome
    /// list for transparency but are excluded from synthesis.
    async fn resolve_competitions(
        &self,
        outcomes: &mut [AgentOutcome],
    ) -> Vec<CompetitionOutcome> {
        let index_by_key: HashMap<String, usize> = outcomes
            .iter()
            .enumerate()
            .map(|(i, o)| (o.descriptor.key.clone(), i))
            .collect();

        let mut resolved = Vec::new();
        let mut seen: HashSet<(usize, usize)> = HashSet::new();

        for i in 0..outcomes.len() {
            let Some(rival_key) = outcomes[i].descriptor.competes_with.clone() else {
                continue;
            };
            let Some(&j) = index_by_key.get(&rival_key) else {
                debug!(
                    agent = %outcomes[i].descriptor.key,
                    rival = %rival_key,
                    "declared rival is not registered"
                );
                continue;
            };
            let (primary, rival) = (i.min(j), i.max(j));
            if primary == rival || !seen.insert((primary, rival)) {
                continue;
            }

            let primary_ratio = self.value_ratio(&outcomes[primary].descriptor).await;
            let rival_ratio = self.value_ratio(&outcomes[rival].descriptor).await;

            let (winner, loser, winner_ratio, loser_ratio) = if rival_ratio > primary_ratio {
                (rival, primary, rival_ratio, primary_ratio)
            } else {
                (primary, rival, primary_ratio, rival_ratio)
            };

            outcomes[loser].excluded = true;
            resolved.push(CompetitionOutcome {
                winner: outcomes[winner].descriptor.key.clone(),
                loser: outcomes[loser].descriptor.key.clone(),
                winner_ratio,
                loser_ratio,
            });
        }
        resolved
    }

    /// reputation / effective_price — trust per dollar spent
    async fn value_ratio(&self, descriptor: &AgentDescriptor) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        let score = self.ledger.score(&descriptor.key).await;
        let price = self
            .ledger
            .effective_price(descriptor)
            .await
            .to_f64()
            .unwrap_or(0.0)
            .max(f64::EPSILON);
        score / price
    }
}

#[allow(clippy::too_many_arguments)]
async fn call_one(
    index: usize,
    descriptor: AgentDescriptor,
    topic: String,
    caller: Arc<dyn AgentCaller>,
    breakers: Arc<CircuitBreakerRegistry>,
    timeout: Duration,
    mut cancel_rx: broadcast::Receiver<()>,
    metrics: Arc<Metrics>,
) -> AgentOutcome {
    let started = std::time::Instant::now();
    let key = descriptor.key.clone();
    let called = descriptor.clone();

    let result = breakers
        .guarded_call(&key, move || async move {
            tokio::select! {
                // Fires on an explicit cancel or the hunt context going away
                _ = cancel_rx.recv() => Err(QuarryError::Cancelled),
                outcome = tokio::time::timeout(timeout, caller.call(&called, &topic)) => {
                    match outcome {
                        Ok(inner) => inner,
                        Err(_) => Err(QuarryError::AgentUnavailable {
                            agent: called.key.clone(),
                            reason: format!("timeout after {}ms", timeout.as_millis()),
                        }),
                    }
                }
            }
        })
        .await;

    let latency_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(reply) => AgentOutcome {
            descriptor,
            index,
            reply: Some(reply),
            warning: None,
            latency_ms,
            excluded: false,
        },
        Err(err) => {
            if matches!(err, QuarryError::CircuitOpen { .. }) {
                metrics.inc_short_circuits();
            }
            AgentOutcome {
                warning: Some(err.as_warning(&descriptor.key)),
                descriptor,
                index,
                reply: None,
                latency_ms,
                excluded: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, StakingConfig};
    use crate::domain::{AgentCategory, DeclaredPosition, Direction};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted caller: per-agent behavior keyed by agent key
    struct ScriptedCaller {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AgentCaller for ScriptedCaller {
        async fn call(&self, agent: &AgentDescriptor, _topic: &str) -> Result<AgentReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match agent.key.as_str() {
                "dead" => Err(QuarryError::AgentUnavailable {
                    agent: agent.key.clone(),
                    reason: "connection refused".into(),
                }),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    unreachable!("slow agent should be timed out or cancelled")
                }
                _ => Ok(AgentReply {
                    payload: serde_json::json!({ "echo": agent.key }),
                    position: DeclaredPosition::new(Direction::Bullish, 0.8),
                    payment: None,
                }),
            }
        }
    }

    fn descriptor(key: &str, competes_with: Option<&str>) -> AgentDescriptor {
        AgentDescriptor {
            key: key.into(),
            name: key.into(),
            endpoint: format!("http://localhost/{key}"),
            base_price: dec!(0.05),
            category: AgentCategory::Sentiment,
            competes_with: competes_with.map(String::from),
        }
    }

    fn orchestrator(agents: Vec<AgentDescriptor>, timeout_ms: u64) -> HuntOrchestrator {
        HuntOrchestrator::new(
            agents,
            Arc::new(ScriptedCaller {
                calls: AtomicU32::new(0),
            }),
            Arc::new(CircuitBreakerRegistry::new(BreakerConfig::default())),
            Arc::new(ReputationLedger::new(StakingConfig::default())),
            Duration::from_millis(timeout_ms),
            Arc::new(Metrics::new()),
        )
    }

    #[tokio::test]
    async fn one_failing_agent_never_aborts_the_hunt() {
        let orch = orchestrator(
            vec![descriptor("good", None), descriptor("dead", None)],
            5_000,
        );
        let (cancel, _keep) = broadcast::channel(1);

        let result = orch.fan_out("bitcoin", &cancel, None).await;
        assert_eq!(result.outcomes.len(), 2);
        assert!(result.outcomes[0].reply.is_some());
        assert!(result.outcomes[1].reply.is_none());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("dead"));
    }

    #[tokio::test]
    async fn timeouts_settle_as_warnings() {
        let orch = orchestrator(
            vec![descriptor("good", None), descriptor("slow", None)],
            50,
        );
        let (cancel, _keep) = broadcast::channel(1);

        let result = orch.fan_out("bitcoin", &cancel, None).await;
        assert_eq!(result.outcomes.len(), 2);
        assert!(result.outcomes[1].reply.is_none());
        assert!(result.warnings[0].contains("timeout"));
    }

    #[tokio::test]
    async fn cancellation_settles_every_outstanding_call() {
        let orch = Arc::new(orchestrator(
            vec![descriptor("slow", None), descriptor("good", None)],
            60_000,
        ));
        let (cancel, _keep) = broadcast::channel(1);

        let fan = {
            let orch = Arc::clone(&orch);
            let cancel = cancel.clone();
            tokio::spawn(async move { orch.fan_out("bitcoin", &cancel, None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.send(()).unwrap();

        let result = fan.await.unwrap();
        assert_eq!(result.outcomes.len(), 2);
        // The slow agent's call was cancelled, not left outstanding
        assert!(result.outcomes[0].reply.is_none());
        assert!(result.outcomes[0]
            .warning
            .as_deref()
            .unwrap()
            .contains("cancelled"));
    }

    #[tokio::test]
    async fn higher_reputation_per_dollar_wins_the_race() {
        let orch = orchestrator(
            vec![
                descriptor("primary", Some("rival")),
                descriptor("rival", None),
            ],
            5_000,
        );
        // Equal prices; push the rival's reputation up
        for _ in 0..10 {
            orch.ledger
                .apply_stake_outcome("rival", true, dec!(0))
                .await;
        }
        let (cancel, _keep) = broadcast::channel(1);

        let result = orch.fan_out("bitcoin", &cancel, None).await;
        assert_eq!(result.competitions.len(), 1);
        let competition = &result.competitions[0];
        assert_eq!(competition.winner, "rival");
        assert_eq!(competition.loser, "primary");
        assert!(competition.winner_ratio > competition.loser_ratio);

        let loser = result
            .outcomes
            .iter()
            .find(|o| o.descriptor.key == "primary")
            .unwrap();
        assert!(loser.excluded);
        // Loser's result is still reported
        assert!(loser.reply.is_some());
    }

    #[tokio::test]
    async fn ties_favor_the_primary_agent() {
        let orch = orchestrator(
            vec![
                descriptor("primary", Some("rival")),
                descriptor("rival", None),
            ],
            5_000,
        );
        let (cancel, _keep) = broadcast::channel(1);

        let result = orch.fan_out("bitcoin", &cancel, None).await;
        assert_eq!(result.competitions.len(), 1);
        assert_eq!(result.competitions[0].winner, "primary");
    }

    #[tokio::test]
    async fn duplicate_agent_keys_are_rejected() {
        let orch = orchestrator(vec![descriptor("good", None)], 5_000);
        let err = orch.register(descriptor("good", None)).await.unwrap_err();
        assert!(matches!(err, QuarryError::Validation(_)));
    }
}

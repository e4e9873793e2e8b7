//! Synthesis
//!
//! Fuses a fan-out's surviving signals into the final confidence-scored
//! recommendation: weighted consensus, immediate stake settlement, pricing
//! and reputation snapshots. A hunt with zero successful agents still
//! yields a synthesis — degraded, near-zero confidence, warnings attached —
//! rather than an error.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    report_id, AgentSignal, Direction, Recommendation, Synthesis,
};
use crate::hunt::orchestrator::FanOutResult;
use crate::reputation::{ReputationLedger, StakeInput, StakingEngine};

/// Conviction needed before a directional consensus becomes an
/// actionable buy/sell rather than a hold.
const ACTION_CONFIDENCE: f64 = 60.0;

pub struct Synthesizer {
    engine: StakingEngine,
}

impl Synthesizer {
    pub fn new(engine: StakingEngine) -> Self {
        Self { engine }
    }

    pub async fn synthesize(
        &self,
        hunt_id: Uuid,
        topic: &str,
        fanout: &FanOutResult,
        ledger: &ReputationLedger,
    ) -> Synthesis {
        let timestamp = Utc::now();

        let mut signals = Vec::with_capacity(fanout.outcomes.len());
        let mut inputs = Vec::new();
        for outcome in &fanout.outcomes {
            let Some(reply) = &outcome.reply else {
                continue;
            };
            signals.push(AgentSignal {
                agent_key: outcome.descriptor.key.clone(),
                direction: reply.position.direction,
                confidence: reply.position.confidence,
                payload: reply.payload.clone(),
                latency_ms: outcome.latency_ms,
                excluded: outcome.excluded,
            });
            if outcome.excluded {
                continue;
            }
            ledger.note_hunt(&outcome.descriptor.key).await;
            inputs.push(StakeInput {
                agent_key: outcome.descriptor.key.clone(),
                direction: reply.position.direction,
                confidence: reply.position.confidence,
                reputation: ledger.score(&outcome.descriptor.key).await,
                suggested_stake: reply.position.suggested_stake,
            });
        }

        let consensus = self.engine.consensus(&inputs);
        let confidence = self.engine.conviction(&inputs, consensus);
        let staking = self.engine.settle(&inputs, consensus, ledger).await;

        let descriptors: Vec<_> = fanout
            .outcomes
            .iter()
            .map(|o| o.descriptor.clone())
            .collect();
        let degraded = fanout.outcomes.iter().all(|o| o.reply.is_none());

        let synthesis = Synthesis {
            hunt_id,
            topic: topic.to_string(),
            timestamp,
            confidence,
            recommendation: recommend(consensus, confidence),
            consensus,
            signals,
            staking,
            reputation: ledger.snapshot().await,
            pricing: ledger.pricing(&descriptors).await,
            competitions: fanout.competitions.clone(),
            warnings: fanout.warnings.clone(),
            degraded,
            report_id: report_id(topic, timestamp),
        };

        info!(
            hunt_id = %hunt_id,
            topic,
            consensus = %synthesis.consensus,
            confidence = synthesis.confidence,
            recommendation = %synthesis.recommendation,
            degraded,
            "synthesis complete"
        );
        synthesis
    }
}

fn recommend(consensus: Direction, confidence: f64) -> Recommendation {
    match consensus {
        Direction::Bullish if confidence >= ACTION_CONFIDENCE => Recommendation::Buy,
        Direction::Bearish if confidence >= ACTION_CONFIDENCE => Recommendation::Sell,
        _ => Recommendation::Hold,
    }
}

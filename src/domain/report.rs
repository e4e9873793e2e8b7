use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::signal::{AgentSignal, Direction};

/// Action the synthesis recommends to downstream consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recommendation::Buy => write!(f, "buy"),
            Recommendation::Sell => write!(f, "sell"),
            Recommendation::Hold => write!(f, "hold"),
        }
    }
}

/// One agent's settled bet in one hunt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeResult {
    pub agent_key: String,
    pub confidence: f64,
    pub declared: Direction,
    pub consensus: Direction,
    pub staked: Decimal,
    pub returned: Decimal,
    pub reputation_before: f64,
    pub reputation_after: f64,
}

/// Immediate staking outcome for a whole hunt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingSummary {
    pub consensus: Direction,
    pub total_staked: Decimal,
    pub total_returned: Decimal,
    pub stakes: Vec<StakeResult>,
}

/// Resolution of a competing-agent pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionOutcome {
    pub winner: String,
    pub loser: String,
    /// reputation / effective_price, the selection criterion
    pub winner_ratio: f64,
    pub loser_ratio: f64,
}

/// Reputation-adjusted price quote for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPricing {
    pub base_price: Decimal,
    pub effective_price: Decimal,
    pub reputation: f64,
}

/// Point-in-time view of one agent's trust record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationSnapshot {
    pub score: f64,
    pub hunts: u64,
    pub correct: u64,
    pub accuracy: f64,
    pub cumulative_pnl: Decimal,
}

/// Full synthesized result of one hunt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
    pub hunt_id: Uuid,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    /// Overall signal strength in [0, 100]
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub consensus: Direction,
    pub signals: Vec<AgentSignal>,
    pub staking: StakingSummary,
    pub reputation: BTreeMap<String, ReputationSnapshot>,
    pub pricing: BTreeMap<String, AgentPricing>,
    pub competitions: Vec<CompetitionOutcome>,
    pub warnings: Vec<String>,
    /// True when no agent answered and the synthesis is a placeholder
    pub degraded: bool,
    /// Cache handle for later lookup
    pub report_id: String,
}

/// Content-hash id for a report: identical inputs at different wall-clock
/// times never collide, and lookups are deterministic.
pub fn report_id(topic: &str, timestamp: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(topic.as_bytes());
    hasher.update(b":");
    hasher.update(timestamp.timestamp_millis().to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn report_id_is_deterministic_and_time_sensitive() {
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 1).unwrap();

        assert_eq!(report_id("bitcoin", t1), report_id("bitcoin", t1));
        assert_ne!(report_id("bitcoin", t1), report_id("bitcoin", t2));
        assert_ne!(report_id("bitcoin", t1), report_id("ethereum", t1));
        assert_eq!(report_id("bitcoin", t1).len(), 16);
    }
}

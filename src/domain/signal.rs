use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Directional call an agent (or the consensus) makes on a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Bearish => "bearish",
            Direction::Neutral => "neutral",
        }
    }

    /// Parse loose agent-supplied direction strings ("bull", "UP", "long"…)
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        match lowered.as_str() {
            "bullish" | "bull" | "up" | "long" | "buy" | "positive" => Some(Direction::Bullish),
            "bearish" | "bear" | "down" | "short" | "sell" | "negative" => {
                Some(Direction::Bearish)
            }
            "neutral" | "flat" | "hold" | "none" => Some(Direction::Neutral),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Position an agent declares alongside its payload, either via the
/// `X-Signal-*` header protocol or extracted heuristically from the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredPosition {
    pub direction: Direction,
    /// Self-reported confidence in [0, 1]
    pub confidence: f64,
    /// Stake amount the agent suggests putting at risk
    pub suggested_stake: Option<Decimal>,
}

impl DeclaredPosition {
    pub fn new(direction: Direction, confidence: f64) -> Self {
        Self {
            direction,
            confidence: confidence.clamp(0.0, 1.0),
            suggested_stake: None,
        }
    }
}

/// Raw reply from one agent call, before synthesis
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Agent-specific payload from the `result` field
    pub payload: serde_json::Value,
    pub position: DeclaredPosition,
    /// Whether a payment challenge was settled to obtain this reply
    pub payment: Option<Decimal>,
}

/// One agent's contribution to a synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSignal {
    pub agent_key: String,
    pub direction: Direction,
    pub confidence: f64,
    pub payload: serde_json::Value,
    pub latency_ms: u64,
    /// Lost a competition; reported for transparency, excluded from
    /// consensus and staking
    #[serde(default)]
    pub excluded: bool,
}

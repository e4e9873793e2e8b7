use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of data an agent produces; determines the request body shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCategory {
    Sentiment,
    Market,
    OnChain,
    News,
}

impl AgentCategory {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sentiment => "sentiment",
            Self::Market => "market",
            Self::OnChain => "on-chain",
            Self::News => "news",
        }
    }
}

impl std::fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A callable data agent registered with the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Stable key used for reputation, breaker state and pricing
    pub key: String,
    pub name: String,
    pub endpoint: String,
    /// List price per call before reputation adjustment
    pub base_price: Decimal,
    pub category: AgentCategory,
    /// Key of a rival agent offering the same capability; the pair is
    /// raced each hunt and only the winner feeds synthesis
    #[serde(default)]
    pub competes_with: Option<String>,
}

impl AgentDescriptor {
    /// JSON request body for this agent's category
    pub fn request_body(&self, topic: &str) -> serde_json::Value {
        match self.category {
            AgentCategory::Sentiment => serde_json::json!({ "text": topic }),
            AgentCategory::Market => serde_json::json!({ "query": topic }),
            AgentCategory::OnChain => serde_json::json!({ "asset": topic }),
            AgentCategory::News => serde_json::json!({ "topic": topic }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn descriptor(category: AgentCategory) -> AgentDescriptor {
        AgentDescriptor {
            key: "a".into(),
            name: "Agent A".into(),
            endpoint: "http://localhost:9000/score".into(),
            base_price: dec!(0.05),
            category,
            competes_with: None,
        }
    }

    #[test]
    fn request_body_shape_follows_category() {
        let body = descriptor(AgentCategory::Sentiment).request_body("bitcoin etf");
        assert_eq!(body["text"], "bitcoin etf");

        let body = descriptor(AgentCategory::OnChain).request_body("ethereum");
        assert_eq!(body["asset"], "ethereum");
    }
}

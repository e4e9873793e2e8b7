use thiserror::Error;

/// Main error type for the hunt coordinator
#[derive(Error, Debug)]
pub enum QuarryError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Agent call errors
    #[error("Agent unavailable: {agent}: {reason}")]
    AgentUnavailable { agent: String, reason: String },

    #[error("Circuit open for agent {agent}, retry in {retry_in_secs}s")]
    CircuitOpen { agent: String, retry_in_secs: u64 },

    #[error("Payment required by agent {agent}: {reason}")]
    PaymentRequired { agent: String, reason: String },

    // Settlement errors
    #[error("Price unavailable for asset {asset}: {reason}")]
    PriceUnavailable { asset: String, reason: String },

    // Persistence errors
    #[error("Persistence failure for document {document}: {reason}")]
    Persistence { document: String, reason: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl QuarryError {
    /// Warning string used when an agent outcome degrades a hunt instead of
    /// failing it.
    pub fn as_warning(&self, agent: &str) -> String {
        match self {
            QuarryError::CircuitOpen { retry_in_secs, .. } => {
                format!("{agent}: circuit open, retry in {retry_in_secs}s")
            }
            QuarryError::Cancelled => format!("{agent}: call cancelled"),
            other => format!("{agent}: {other}"),
        }
    }

    /// True when the error should count toward the agent's circuit-breaker
    /// failure threshold. Cancellation and short-circuits are not the
    /// agent's fault.
    pub fn is_agent_failure(&self) -> bool {
        !matches!(
            self,
            QuarryError::Cancelled | QuarryError::CircuitOpen { .. }
        )
    }
}

/// Result type alias for QuarryError
pub type Result<T> = std::result::Result<T, QuarryError>;

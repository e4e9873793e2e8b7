pub mod adapters;
pub mod api;
pub mod autopilot;
pub mod cache;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod hunt;
pub mod persistence;
pub mod reputation;
pub mod services;
pub mod settlement;

pub use adapters::{AgentCaller, HttpAgentClient, HttpPriceFeed, PaymentHandshake, PriceSource};
pub use autopilot::{Autopilot, AutopilotPhase, AutopilotStatus, HuntRunner};
pub use cache::ReportCache;
pub use config::AppConfig;
pub use coordination::{CircuitBreakerRegistry, CircuitState, Shutdown};
pub use coordinator::HuntCoordinator;
pub use domain::{
    AgentCategory, AgentDescriptor, AgentSignal, Direction, Recommendation, Synthesis,
};
pub use error::{QuarryError, Result};
pub use hunt::{HuntEvent, HuntOrchestrator, Synthesizer};
pub use persistence::{JsonStore, Persist};
pub use reputation::{ReputationLedger, StakingEngine};
pub use services::Metrics;
pub use settlement::{OutcomeFeedback, SettlementOracle};

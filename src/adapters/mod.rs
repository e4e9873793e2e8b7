pub mod agent_client;
pub mod price_feed;

pub use agent_client::{
    AgentCaller, DeclinePayments, HttpAgentClient, PaymentChallenge, PaymentHandshake,
    PaymentReceipt,
};
pub use price_feed::{HttpPriceFeed, PriceSource};

#[cfg(test)]
pub use price_feed::MockPriceSource;

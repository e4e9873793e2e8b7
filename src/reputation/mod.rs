pub mod ledger;
pub mod staking;

pub use ledger::{FeedbackSource, ReputationLedger, ScoreChange, DEFAULT_SCORE};
pub use staking::{StakeInput, StakingEngine};

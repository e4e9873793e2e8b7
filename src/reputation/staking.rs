//! Confidence-Staking Engine
//!
//! Turns each agent's self-reported confidence into an amount at risk,
//! settled immediately against the hunt's consensus. Consensus is a
//! weighted vote (confidence × reputation); agreement earns a
//! confidence-scaled bonus, disagreement is partially slashed, and each
//! outcome nudges reputation by a small bounded step. Whether the
//! consensus itself was *right* is judged later by the settlement oracle.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::config::StakingConfig;
use crate::domain::{Direction, StakeResult, StakingSummary};
use crate::reputation::ReputationLedger;

/// One agent's input to consensus and staking
#[derive(Debug, Clone)]
pub struct StakeInput {
    pub agent_key: String,
    pub direction: Direction,
    /// Self-reported confidence in [0, 1]
    pub confidence: f64,
    /// Reputation at vote time; weights the vote
    pub reputation: f64,
    pub suggested_stake: Option<Decimal>,
}

pub struct StakingEngine {
    cfg: StakingConfig,
}

impl StakingEngine {
    pub fn new(cfg: StakingConfig) -> Self {
        Self { cfg }
    }

    /// Weighted majority vote. Each vote counts confidence × reputation;
    /// ties (including an empty field) default to neutral.
    pub fn consensus(&self, inputs: &[StakeInput]) -> Direction {
        let mut bullish = 0.0;
        let mut bearish = 0.0;
        let mut neutral = 0.0;
        for input in inputs {
            let weight = input.confidence * input.reputation;
            match input.direction {
                Direction::Bullish => bullish += weight,
                Direction::Bearish => bearish += weight,
                Direction::Neutral => neutral += weight,
            }
        }

        let max = bullish.max(bearish).max(neutral);
        if max <= 0.0 {
            return Direction::Neutral;
        }
        const EPS: f64 = 1e-9;
        let contenders = [
            (Direction::Bullish, bullish),
            (Direction::Bearish, bearish),
            (Direction::Neutral, neutral),
        ];
        let at_max: Vec<Direction> = contenders
            .iter()
            .filter(|(_, w)| (max - w).abs() < EPS)
            .map(|(d, _)| *d)
            .collect();
        if at_max.len() > 1 {
            Direction::Neutral
        } else {
            at_max[0]
        }
    }

    /// How strongly the field backs the winning direction, in [0, 100]:
    /// the winning weight over the weight the field *could* have produced
    /// at full confidence. A lone hesitant agent therefore scores low,
    /// not 100. Zero when nothing was staked.
    pub fn conviction(&self, inputs: &[StakeInput], consensus: Direction) -> f64 {
        let achievable: f64 = inputs.iter().map(|i| i.reputation).sum();
        if achievable <= 0.0 {
            return 0.0;
        }
        let winning: f64 = inputs
            .iter()
            .filter(|i| i.direction == consensus)
            .map(|i| i.confidence * i.reputation)
            .sum();
        (winning / achievable * 100.0).clamp(0.0, 100.0)
    }

    /// Amount actually put at risk: the agent's suggestion capped at the
    /// maximum, else confidence-proportional.
    fn stake_amount(&self, input: &StakeInput) -> Decimal {
        let confidence =
            Decimal::from_f64(input.confidence.clamp(0.0, 1.0)).unwrap_or(Decimal::ZERO);
        match input.suggested_stake {
            Some(suggested) if suggested > Decimal::ZERO => suggested.min(self.cfg.max_stake),
            _ => confidence * self.cfg.max_stake,
        }
    }

    /// Settle every stake against the consensus and nudge reputations.
    pub async fn settle(
        &self,
        inputs: &[StakeInput],
        consensus: Direction,
        ledger: &ReputationLedger,
    ) -> StakingSummary {
        let mut stakes = Vec::with_capacity(inputs.len());
        let mut total_staked = Decimal::ZERO;
        let mut total_returned = Decimal::ZERO;

        for input in inputs {
            let staked = self.stake_amount(input);
            let agreed = input.direction == consensus;
            let returned = if agreed {
                let bonus = Decimal::from_f64(input.confidence).unwrap_or(Decimal::ZERO)
                    * self.cfg.bonus_rate;
                staked * (Decimal::ONE + bonus)
            } else {
                staked * (Decimal::ONE - self.cfg.slash_rate)
            };
            let pnl = returned - staked;

            let (before, after) = ledger
                .apply_stake_outcome(&input.agent_key, agreed, pnl)
                .await;

            total_staked += staked;
            total_returned += returned;
            stakes.push(StakeResult {
                agent_key: input.agent_key.clone(),
                confidence: input.confidence,
                declared: input.direction,
                consensus,
                staked,
                returned,
                reputation_before: before,
                reputation_after: after,
            });
        }

        StakingSummary {
            consensus,
            total_staked,
            total_returned,
            stakes,
        }
    }
}

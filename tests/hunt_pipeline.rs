//! End-to-end hunt pipeline tests against in-process stub agents:
//! fan-out → consensus → staking → settlement scheduling → cache, plus the
//! streaming event sequence and persistence across restarts.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use quarry::adapters::{AgentCaller, PriceSource};
use quarry::config::AppConfig;
use quarry::coordinator::HuntCoordinator;
use quarry::domain::{
    AgentCategory, AgentDescriptor, AgentReply, DeclaredPosition, Direction, Recommendation,
};
use quarry::error::{QuarryError, Result};
use quarry::hunt::HuntEvent;

/// Scripted agent fleet: direction and confidence keyed by agent key;
/// unknown keys fail as unavailable.
struct StubFleet;

#[async_trait]
impl AgentCaller for StubFleet {
    async fn call(&self, agent: &AgentDescriptor, topic: &str) -> Result<AgentReply> {
        let position = match agent.key.as_str() {
            "bull-strong" => DeclaredPosition::new(Direction::Bullish, 0.9),
            "bull-mild" => DeclaredPosition::new(Direction::Bullish, 0.7),
            "bear-lone" => DeclaredPosition::new(Direction::Bearish, 0.6),
            _ => {
                return Err(QuarryError::AgentUnavailable {
                    agent: agent.key.clone(),
                    reason: "connection refused".into(),
                })
            }
        };
        Ok(AgentReply {
            payload: serde_json::json!({ "topic": topic, "agent": agent.key }),
            position,
            payment: None,
        })
    }
}

/// Fixed-price oracle so settlement scheduling always succeeds.
struct FixedPrices(Decimal);

#[async_trait]
impl PriceSource for FixedPrices {
    async fn price_usd(&self, _asset_id: &str) -> Result<Decimal> {
        Ok(self.0)
    }
}

fn descriptor(key: &str) -> AgentDescriptor {
    AgentDescriptor {
        key: key.into(),
        name: key.into(),
        endpoint: format!("http://localhost/{key}"),
        base_price: dec!(0.05),
        category: AgentCategory::Sentiment,
        competes_with: None,
    }
}

fn test_config(tag: &str, agents: Vec<AgentDescriptor>) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.agents.registry = agents;
    cfg.agents.call_timeout_ms = 2_000;
    cfg.persistence.data_dir = Some(PathBuf::from(std::env::temp_dir().join(format!(
        "quarry-it-{tag}-{}",
        std::process::id()
    ))));
    cfg
}

async fn cleanup(cfg: &AppConfig) {
    if let Some(dir) = &cfg.persistence.data_dir {
        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}

#[tokio::test]
async fn full_hunt_produces_consensus_staking_and_settlement() {
    let cfg = test_config(
        "full",
        vec![
            descriptor("bull-strong"),
            descriptor("bull-mild"),
            descriptor("bear-lone"),
            descriptor("offline"),
        ],
    );
    let coordinator = HuntCoordinator::bootstrap_with(
        cfg.clone(),
        Arc::new(StubFleet),
        Arc::new(FixedPrices(dec!(65000))),
    )
    .await
    .unwrap();

    let synthesis = coordinator.run_hunt("bitcoin breakout").await.unwrap();

    // Two bulls outweigh one bear; the dead agent degrades, not aborts
    assert_eq!(synthesis.consensus, Direction::Bullish);
    assert!(!synthesis.degraded);
    assert_eq!(synthesis.signals.len(), 3);
    assert_eq!(synthesis.warnings.len(), 1);
    assert!(synthesis.warnings[0].contains("offline"));

    // Immediate staking settled against consensus
    assert_eq!(synthesis.staking.stakes.len(), 3);
    let bull = synthesis
        .staking
        .stakes
        .iter()
        .find(|s| s.agent_key == "bull-strong")
        .unwrap();
    assert!(bull.returned > bull.staked);
    assert!(bull.reputation_after > bull.reputation_before);
    let bear = synthesis
        .staking
        .stakes
        .iter()
        .find(|s| s.agent_key == "bear-lone")
        .unwrap();
    assert!(bear.returned < bear.staked);

    // Delayed ground-truth check enqueued with the declared directions
    let pending = coordinator.pending_settlements().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].consensus, Direction::Bullish);
    assert_eq!(pending[0].snapshot_price, dec!(65000));
    assert_eq!(pending[0].declared.len(), 3);
    assert_eq!(pending[0].declared["bear-lone"], Direction::Bearish);

    // Synthesis is retrievable through its cache handle
    let cached = coordinator.report(&synthesis.report_id).await.unwrap();
    assert_eq!(cached.hunt_id, synthesis.hunt_id);

    cleanup(&cfg).await;
}

#[tokio::test]
async fn zero_live_agents_still_return_a_degraded_synthesis() {
    let cfg = test_config("degraded", vec![descriptor("offline-a"), descriptor("offline-b")]);
    let coordinator = HuntCoordinator::bootstrap_with(
        cfg.clone(),
        Arc::new(StubFleet),
        Arc::new(FixedPrices(dec!(65000))),
    )
    .await
    .unwrap();

    let synthesis = coordinator.run_hunt("bitcoin").await.unwrap();
    assert!(synthesis.degraded);
    assert_eq!(synthesis.confidence, 0.0);
    assert_eq!(synthesis.recommendation, Recommendation::Hold);
    assert_eq!(synthesis.warnings.len(), 3);
    // Nothing staked, nothing scheduled
    assert!(coordinator.pending_settlements().await.is_empty());

    cleanup(&cfg).await;
}

#[tokio::test]
async fn streaming_hunt_emits_the_ordered_event_sequence() {
    let cfg = test_config(
        "stream",
        vec![descriptor("bull-strong"), descriptor("offline")],
    );
    let coordinator = HuntCoordinator::bootstrap_with(
        cfg.clone(),
        Arc::new(StubFleet),
        Arc::new(FixedPrices(dec!(65000))),
    )
    .await
    .unwrap();

    let (tx, mut rx) = mpsc::channel(64);
    let (cancel, _keep) = tokio::sync::broadcast::channel(1);
    coordinator
        .run_hunt_streaming("bitcoin", tx, cancel)
        .await;

    let mut names = Vec::new();
    while let Some(event) = rx.recv().await {
        names.push(event.name());
        if matches!(event, HuntEvent::Done { .. }) {
            break;
        }
    }

    assert_eq!(names.first(), Some(&"start"));
    assert_eq!(names.last(), Some(&"done"));
    assert_eq!(names.iter().filter(|n| **n == "result").count(), 2);
    let alpha = names.iter().position(|n| *n == "alpha").unwrap();
    let cached = names.iter().position(|n| *n == "cached").unwrap();
    assert!(alpha < cached);

    cleanup(&cfg).await;
}

#[tokio::test]
async fn invalid_topic_streams_error_then_done() {
    let cfg = test_config("invalid", vec![descriptor("bull-strong")]);
    let coordinator = HuntCoordinator::bootstrap_with(
        cfg.clone(),
        Arc::new(StubFleet),
        Arc::new(FixedPrices(dec!(65000))),
    )
    .await
    .unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let (cancel, _keep) = tokio::sync::broadcast::channel(1);
    coordinator.run_hunt_streaming("   ", tx, cancel).await;

    let mut names = Vec::new();
    while let Some(event) = rx.recv().await {
        names.push(event.name());
    }
    assert_eq!(names, vec!["error", "done"]);

    cleanup(&cfg).await;
}

#[tokio::test]
async fn reputation_survives_a_restart() {
    let cfg = test_config("restart", vec![descriptor("bull-strong"), descriptor("bull-mild")]);

    {
        let coordinator = HuntCoordinator::bootstrap_with(
            cfg.clone(),
            Arc::new(StubFleet),
            Arc::new(FixedPrices(dec!(65000))),
        )
        .await
        .unwrap();
        coordinator.run_hunt("bitcoin").await.unwrap();
        // Final synchronous flush
        coordinator.teardown().await;
    }

    let revived = HuntCoordinator::bootstrap_with(
        cfg.clone(),
        Arc::new(StubFleet),
        Arc::new(FixedPrices(dec!(65000))),
    )
    .await
    .unwrap();

    let reputation = revived.reputation().await;
    assert_eq!(reputation["bull-strong"].hunts, 1);
    assert!(reputation["bull-strong"].score > 0.5);
    // The pending settlement came back too
    assert_eq!(revived.pending_settlements().await.len(), 1);

    cleanup(&cfg).await;
}

#[tokio::test]
async fn repeated_failures_open_the_circuit_and_skip_the_network() {
    let mut cfg = test_config("breaker", vec![descriptor("offline")]);
    cfg.breaker.failure_threshold = 2;
    cfg.breaker.open_duration_ms = 60_000;

    let coordinator = HuntCoordinator::bootstrap_with(
        cfg.clone(),
        Arc::new(StubFleet),
        Arc::new(FixedPrices(dec!(65000))),
    )
    .await
    .unwrap();

    coordinator.run_hunt("bitcoin").await.unwrap();
    coordinator.run_hunt("bitcoin").await.unwrap();
    // Third hunt should short-circuit rather than re-attempt the call
    let synthesis = coordinator.run_hunt("bitcoin").await.unwrap();
    assert!(synthesis.warnings[0].contains("circuit open"));

    let circuits = coordinator.circuits().await;
    assert_eq!(circuits.len(), 1);
    assert_eq!(circuits[0].short_circuits, 1);

    cleanup(&cfg).await;
}

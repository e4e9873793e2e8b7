//! Autopilot Loop
//!
//! Self-rescheduling hunt controller. Each cycle runs a hunt for the next
//! topic in rotation, then adapts its own interval from the result's
//! confidence: strong signals slow the cadence (redundant calls cost
//! money), weak signals speed it up, and the middle band drifts back
//! toward the configured baseline. Start/stop are idempotent and phase
//! transitions are published on a broadcast channel the loop knows
//! nothing about the consumers of.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{info, warn};

use crate::config::AutopilotConfig;
use crate::domain::Synthesis;
use crate::error::Result;
use crate::persistence::Persist;

/// Where the loop currently is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutopilotPhase {
    Idle,
    Hunting,
    Adapting,
    Waiting,
}

impl std::fmt::Display for AutopilotPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutopilotPhase::Idle => write!(f, "idle"),
            AutopilotPhase::Hunting => write!(f, "hunting"),
            AutopilotPhase::Adapting => write!(f, "adapting"),
            AutopilotPhase::Waiting => write!(f, "waiting"),
        }
    }
}

/// One recorded interval change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adaptation {
    pub old_interval_ms: u64,
    pub new_interval_ms: u64,
    pub confidence: f64,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Published on every phase change and adaptation
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutopilotEvent {
    PhaseChanged {
        phase: AutopilotPhase,
        at: DateTime<Utc>,
    },
    Adapted(Adaptation),
}

#[derive(Debug, Clone, Serialize)]
pub struct AutopilotStatus {
    pub running: bool,
    pub phase: AutopilotPhase,
    pub interval_ms: u64,
    pub hunts_run: u64,
    pub topic_cursor: usize,
    pub recent_adaptations: Vec<Adaptation>,
}

/// The hunt entry point the loop drives; implemented by the coordinator
/// and wired in at start so the loop never depends on it directly.
#[async_trait]
pub trait HuntRunner: Send + Sync {
    async fn run_hunt(&self, topic: &str) -> Result<Synthesis>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoopState {
    phase: AutopilotPhase,
    interval_ms: u64,
    hunts_run: u64,
    topic_cursor: usize,
    history: VecDeque<Adaptation>,
}

pub struct Autopilot {
    cfg: AutopilotConfig,
    state: RwLock<LoopState>,
    running: AtomicBool,
    events: broadcast::Sender<AutopilotEvent>,
    /// Stop signal for the active loop task, if any
    stop: Mutex<Option<watch::Sender<bool>>>,
    dirty: AtomicBool,
}

impl Autopilot {
    pub fn new(cfg: AutopilotConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let interval_ms = cfg
            .base_interval_ms
            .clamp(cfg.min_interval_ms, cfg.max_interval_ms);
        Self {
            cfg,
            state: RwLock::new(LoopState {
                phase: AutopilotPhase::Idle,
                interval_ms,
                hunts_run: 0,
                topic_cursor: 0,
                history: VecDeque::new(),
            }),
            running: AtomicBool::new(false),
            events,
            stop: Mutex::new(None),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutopilotEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> AutopilotStatus {
        let state = self.state.read().await;
        AutopilotStatus {
            running: self.running.load(Ordering::SeqCst),
            phase: state.phase,
            interval_ms: state.interval_ms,
            hunts_run: state.hunts_run,
            topic_cursor: state.topic_cursor,
            recent_adaptations: state.history.iter().rev().take(10).cloned().collect(),
        }
    }

    /// Start the loop. A no-op returning current status when already
    /// running.
    pub async fn start(self: &Arc<Self>, runner: Arc<dyn HuntRunner>) -> AutopilotStatus {
        if self.running.swap(true, Ordering::SeqCst) {
            return self.status().await;
        }
        if self.cfg.topics.is_empty() {
            warn!("autopilot started with no topics configured; idling");
            self.running.store(false, Ordering::SeqCst);
            return self.status().await;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop.lock().await = Some(stop_tx);

        let pilot = Arc::clone(self);
        tokio::spawn(async move {
            pilot.run_loop(runner, stop_rx).await;
        });

        info!("autopilot started");
        self.status().await
    }

    /// Stop the loop, cancelling the pending wait. Idempotent.
    pub async fn stop(&self) -> AutopilotStatus {
        if self.running.swap(false, Ordering::SeqCst) {
            if let Some(stop_tx) = self.stop.lock().await.take() {
                let _ = stop_tx.send(true);
            }
            info!("autopilot stopped");
        }
        self.set_phase(AutopilotPhase::Idle).await;
        self.status().await
    }

    async fn run_loop(self: Arc<Self>, runner: Arc<dyn HuntRunner>, mut stop_rx: watch::Receiver<bool>) {
        while self.running.load(Ordering::SeqCst) {
            self.set_phase(AutopilotPhase::Hunting).await;
            let topic = {
                let mut state = self.state.write().await;
                let topic = self.cfg.topics[state.topic_cursor % self.cfg.topics.len()].clone();
                state.topic_cursor = (state.topic_cursor + 1) % self.cfg.topics.len();
                state.hunts_run += 1;
                topic
            };
            self.dirty.store(true, Ordering::SeqCst);

            let confidence = match runner.run_hunt(&topic).await {
                Ok(synthesis) => synthesis.confidence,
                Err(e) => {
                    warn!(topic, "autopilot hunt failed: {e}");
                    0.0
                }
            };

            self.set_phase(AutopilotPhase::Adapting).await;
            let wait_ms = self.adapt(confidence).await;

            self.set_phase(AutopilotPhase::Waiting).await;
            let wait = std::time::Duration::from_millis(wait_ms);
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        self.set_phase(AutopilotPhase::Idle).await;
    }

    /// Apply the adaptation policy and record it. Returns the new
    /// interval.
    async fn adapt(&self, confidence: f64) -> u64 {
        let mut state = self.state.write().await;
        let old = state.interval_ms;
        let (new, reason) = next_interval(old, confidence, &self.cfg);
        state.interval_ms = new;

        let adaptation = Adaptation {
            old_interval_ms: old,
            new_interval_ms: new,
            confidence,
            reason: reason.to_string(),
            at: Utc::now(),
        };
        state.history.push_back(adaptation.clone());
        while state.history.len() > self.cfg.history_cap {
            state.history.pop_front();
        }
        drop(state);

        self.dirty.store(true, Ordering::SeqCst);
        info!(
            old_interval_ms = old,
            new_interval_ms = new,
            confidence,
            reason,
            "autopilot adapted"
        );
        let _ = self.events.send(AutopilotEvent::Adapted(adaptation));
        new
    }

    async fn set_phase(&self, phase: AutopilotPhase) {
        let mut state = self.state.write().await;
        if state.phase == phase {
            return;
        }
        state.phase = phase;
        drop(state);
        let _ = self.events.send(AutopilotEvent::PhaseChanged {
            phase,
            at: Utc::now(),
        });
    }
}

/// Pure adaptation policy: slow down on strong signals, speed up on weak
/// ones, drift toward baseline in between. Always within [min, max].
pub fn next_interval(current_ms: u64, confidence: f64, cfg: &AutopilotConfig) -> (u64, &'static str) {
    if confidence >= cfg.high_confidence {
        let slowed = (current_ms as f64 * cfg.slowdown_factor) as u64;
        (slowed.min(cfg.max_interval_ms), "strong signal, slowing down")
    } else if confidence <= cfg.low_confidence {
        let sped = (current_ms as f64 * cfg.speedup_factor) as u64;
        (sped.max(cfg.min_interval_ms), "weak signal, speeding up")
    } else {
        let drifted = current_ms as f64
            + (cfg.base_interval_ms as f64 - current_ms as f64) * cfg.drift_rate;
        (
            (drifted as u64).clamp(cfg.min_interval_ms, cfg.max_interval_ms),
            "drifting toward baseline",
        )
    }
}

#[async_trait]
impl Persist for Autopilot {
    fn document(&self) -> &'static str {
        "autopilot"
    }

    async fn to_document(&self) -> Value {
        serde_json::to_value(&*self.state.read().await).unwrap_or(Value::Null)
    }

    async fn restore(&self, doc: &Value) -> std::result::Result<(), String> {
        let mut restored: LoopState =
            serde_json::from_value(doc.clone()).map_err(|e| e.to_string())?;
        // Persisted state never resumes mid-cycle
        restored.phase = AutopilotPhase::Idle;
        restored.interval_ms = restored
            .interval_ms
            .clamp(self.cfg.min_interval_ms, self.cfg.max_interval_ms);
        *self.state.write().await = restored;
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, Recommendation, StakingSummary};
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicU64;
    use uuid::Uuid;

    fn cfg() -> AutopilotConfig {
        AutopilotConfig {
            enabled: true,
            topics: vec!["bitcoin".into(), "ethereum".into()],
            base_interval_ms: 1_000,
            min_interval_ms: 100,
            max_interval_ms: 10_000,
            high_confidence: 75.0,
            low_confidence: 25.0,
            slowdown_factor: 1.5,
            speedup_factor: 0.5,
            drift_rate: 0.3,
            history_cap: 5,
        }
    }

    #[test]
    fn interval_stays_bounded_for_any_confidence_sequence() {
        let cfg = cfg();
        let mut interval = cfg.base_interval_ms;
        let sequence = [0.0, 100.0, 100.0, 100.0, 100.0, 10.0, 50.0, 0.0, 0.0, 0.0, 0.0, 90.0];
        for confidence in sequence {
            interval = next_interval(interval, confidence, &cfg).0;
            assert!(interval >= cfg.min_interval_ms);
            assert!(interval <= cfg.max_interval_ms);
        }
    }

    #[test]
    fn high_confidence_strictly_slows_until_the_cap() {
        let cfg = cfg();
        let (next, reason) = next_interval(1_000, 80.0, &cfg);
        assert_eq!(next, 1_500);
        assert!(reason.contains("slowing"));

        // Capped at max
        assert_eq!(next_interval(9_000, 80.0, &cfg).0, 10_000);
    }

    #[test]
    fn low_confidence_strictly_speeds_until_the_floor() {
        let cfg = cfg();
        let (next, reason) = next_interval(1_000, 10.0, &cfg);
        assert_eq!(next, 500);
        assert!(reason.contains("speeding"));

        // Floored at min
        assert_eq!(next_interval(150, 10.0, &cfg).0, 100);
    }

    #[test]
    fn middle_band_drifts_toward_baseline() {
        let cfg = cfg();
        // Above baseline drifts down
        let (down, _) = next_interval(2_000, 50.0, &cfg);
        assert!(down < 2_000 && down > cfg.base_interval_ms);
        // Below baseline drifts up
        let (up, _) = next_interval(400, 50.0, &cfg);
        assert!(up > 400 && up < cfg.base_interval_ms);
    }

    struct CountingRunner {
        hunts: AtomicU64,
        confidence: f64,
    }

    #[async_trait]
    impl HuntRunner for CountingRunner {
        async fn run_hunt(&self, topic: &str) -> Result<Synthesis> {
            self.hunts.fetch_add(1, Ordering::SeqCst);
            let timestamp = Utc::now();
            Ok(Synthesis {
                hunt_id: Uuid::new_v4(),
                topic: topic.to_string(),
                timestamp,
                confidence: self.confidence,
                recommendation: Recommendation::Hold,
                consensus: Direction::Neutral,
                signals: vec![],
                staking: StakingSummary {
                    consensus: Direction::Neutral,
                    total_staked: Decimal::ZERO,
                    total_returned: Decimal::ZERO,
                    stakes: vec![],
                },
                reputation: BTreeMap::new(),
                pricing: BTreeMap::new(),
                competitions: vec![],
                warnings: vec![],
                degraded: false,
                report_id: crate::domain::report_id(topic, timestamp),
            })
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_cancels_the_wait() {
        let pilot = Arc::new(Autopilot::new(cfg()));
        let runner = Arc::new(CountingRunner {
            hunts: AtomicU64::new(0),
            confidence: 50.0,
        });

        let status = pilot.start(runner.clone()).await;
        assert!(status.running);
        // Second start is a no-op
        let again = pilot.start(runner.clone()).await;
        assert!(again.running);

        // Give the loop a moment to run at least one hunt
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(runner.hunts.load(Ordering::SeqCst) >= 1);

        let stopped = pilot.stop().await;
        assert!(!stopped.running);
        assert_eq!(stopped.phase, AutopilotPhase::Idle);

        // Stop again: still idle, no panic
        let stopped_again = pilot.stop().await;
        assert!(!stopped_again.running);
    }

    #[tokio::test]
    async fn phases_and_adaptations_are_published() {
        let pilot = Arc::new(Autopilot::new(cfg()));
        let mut events = pilot.subscribe();
        let runner = Arc::new(CountingRunner {
            hunts: AtomicU64::new(0),
            confidence: 90.0,
        });

        pilot.start(runner).await;

        let mut saw_hunting = false;
        let mut saw_adaptation = false;
        for _ in 0..8 {
            match tokio::time::timeout(std::time::Duration::from_millis(500), events.recv()).await
            {
                Ok(Ok(AutopilotEvent::PhaseChanged { phase, .. })) => {
                    if phase == AutopilotPhase::Hunting {
                        saw_hunting = true;
                    }
                }
                Ok(Ok(AutopilotEvent::Adapted(adaptation))) => {
                    assert!(adaptation.new_interval_ms > adaptation.old_interval_ms);
                    saw_adaptation = true;
                }
                _ => break,
            }
            if saw_hunting && saw_adaptation {
                break;
            }
        }
        assert!(saw_hunting && saw_adaptation);

        pilot.stop().await;
    }

    #[tokio::test]
    async fn topics_rotate_with_a_wrapping_cursor() {
        let pilot = Arc::new(Autopilot::new(cfg()));
        let runner = Arc::new(CountingRunner {
            hunts: AtomicU64::new(0),
            confidence: 50.0,
        });

        pilot.start(runner.clone()).await;
        // base interval 1s: only the first hunt fires immediately
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        pilot.stop().await;

        let status = pilot.status().await;
        assert!(status.hunts_run >= 1);
        assert!(status.topic_cursor < 2);
    }

    #[tokio::test]
    async fn restore_clamps_interval_and_resets_phase() {
        let pilot = Autopilot::new(cfg());
        let doc = serde_json::json!({
            "phase": "waiting",
            "interval_ms": 999_999_999u64,
            "hunts_run": 12,
            "topic_cursor": 1,
            "history": [],
        });
        pilot.restore(&doc).await.unwrap();

        let status = pilot.status().await;
        assert_eq!(status.phase, AutopilotPhase::Idle);
        assert_eq!(status.interval_ms, 10_000);
        assert_eq!(status.hunts_run, 12);
    }
}

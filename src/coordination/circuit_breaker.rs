//! Per-Agent Circuit Breaker
//!
//! Implements the circuit breaker pattern around outbound agent calls so a
//! dead agent costs one timeout, not one timeout per hunt. Each agent key
//! gets its own closed/open/half-open state machine; open circuits
//! short-circuit with a distinguished error so callers can tell "agent
//! known-unhealthy" from "this one call failed".

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::error::{QuarryError, Result};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation - calls go through
    Closed,
    /// Failure threshold exceeded - calls short-circuit
    Open,
    /// Recovery period - a single probe call is allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Per-agent breaker bookkeeping
#[derive(Debug, Clone)]
struct AgentBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    /// Half-open admits exactly one probe at a time
    probe_in_flight: bool,
    total_trips: u64,
    short_circuits: u64,
}

impl AgentBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
            opened_at: None,
            probe_in_flight: false,
            total_trips: 0,
            short_circuits: 0,
        }
    }

    fn open_elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        self.opened_at
            .map(|t| now.signed_duration_since(t).num_milliseconds())
            .unwrap_or(i64::MAX)
    }
}

/// Observable state of one agent's breaker, for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub agent_key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub total_trips: u64,
    pub short_circuits: u64,
}

enum Permit {
    Execute,
    ShortCircuit { retry_in_secs: u64 },
}

/// Keyed registry of circuit breakers, one per agent
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, AgentBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Run `op` under this agent's breaker. Short-circuits with
    /// `QuarryError::CircuitOpen` when the agent is known-unhealthy; probes
    /// with a single call once the open window elapses. Cancelled
    /// operations release the breaker without counting as failures.
    pub async fn guarded_call<T, F, Fut>(&self, agent_key: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.acquire(agent_key).await {
            Permit::ShortCircuit { retry_in_secs } => Err(QuarryError::CircuitOpen {
                agent: agent_key.to_string(),
                retry_in_secs,
            }),
            Permit::Execute => match op().await {
                Ok(value) => {
                    self.record_success(agent_key).await;
                    Ok(value)
                }
                Err(QuarryError::Cancelled) => {
                    self.release(agent_key).await;
                    Err(QuarryError::Cancelled)
                }
                Err(err) => {
                    self.record_failure(agent_key).await;
                    Err(err)
                }
            },
        }
    }

    async fn acquire(&self, agent_key: &str) -> Permit {
        let now = Utc::now();
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(agent_key.to_string())
            .or_insert_with(AgentBreaker::new);

        match breaker.state {
            CircuitState::Closed => Permit::Execute,
            CircuitState::Open => {
                let elapsed = breaker.open_elapsed_ms(now);
                if elapsed >= self.config.open_duration_ms as i64 {
                    breaker.state = CircuitState::HalfOpen;
                    breaker.probe_in_flight = true;
                    info!(agent = agent_key, "circuit half-open, probing");
                    Permit::Execute
                } else {
                    breaker.short_circuits += 1;
                    let remaining_ms =
                        (self.config.open_duration_ms as i64 - elapsed).max(0) as u64;
                    Permit::ShortCircuit {
                        retry_in_secs: remaining_ms.div_ceil(1000),
                    }
                }
            }
            CircuitState::HalfOpen => {
                if breaker.probe_in_flight {
                    breaker.short_circuits += 1;
                    Permit::ShortCircuit {
                        retry_in_secs: self.config.open_duration_ms.div_ceil(1000),
                    }
                } else {
                    breaker.probe_in_flight = true;
                    Permit::Execute
                }
            }
        }
    }

    async fn record_success(&self, agent_key: &str) {
        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get_mut(agent_key) {
            let was = breaker.state;
            breaker.consecutive_failures = 0;
            breaker.last_success = Some(Utc::now());
            breaker.probe_in_flight = false;
            breaker.state = CircuitState::Closed;
            breaker.opened_at = None;
            if was != CircuitState::Closed {
                info!(agent = agent_key, "circuit closed after successful probe");
            }
        }
    }

    async fn record_failure(&self, agent_key: &str) {
        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get_mut(agent_key) {
            breaker.last_failure = Some(Utc::now());
            match breaker.state {
                CircuitState::HalfOpen => {
                    // Failed probe: back to open with a fresh window
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = Some(Utc::now());
                    breaker.probe_in_flight = false;
                    breaker.total_trips += 1;
                    warn!(agent = agent_key, "probe failed, circuit re-opened");
                }
                _ => {
                    breaker.consecutive_failures += 1;
                    debug!(
                        agent = agent_key,
                        failures = breaker.consecutive_failures,
                        "agent call failure recorded"
                    );
                    if breaker.consecutive_failures >= self.config.failure_threshold
                        && breaker.state == CircuitState::Closed
                    {
                        breaker.state = CircuitState::Open;
                        breaker.opened_at = Some(Utc::now());
                        breaker.total_trips += 1;
                        warn!(
                            agent = agent_key,
                            failures = breaker.consecutive_failures,
                            "circuit OPENED"
                        );
                    }
                }
            }
        }
    }

    /// Release a permit without recording an outcome (cancelled call)
    async fn release(&self, agent_key: &str) {
        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get_mut(agent_key) {
            breaker.probe_in_flight = false;
        }
    }

    pub async fn state(&self, agent_key: &str) -> CircuitState {
        self.breakers
            .read()
            .await
            .get(agent_key)
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub async fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.read().await;
        let mut out: Vec<BreakerSnapshot> = breakers
            .iter()
            .map(|(key, b)| BreakerSnapshot {
                agent_key: key.clone(),
                state: b.state,
                consecutive_failures: b.consecutive_failures,
                last_success: b.last_success,
                last_failure: b.last_failure,
                opened_at: b.opened_at,
                total_trips: b.total_trips,
                short_circuits: b.short_circuits,
            })
            .collect();
        out.sort_by(|a, b| a.agent_key.cmp(&b.agent_key));
        out
    }
}

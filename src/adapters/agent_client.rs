//! HTTP Agent Client
//!
//! Calls data agents over plain HTTP: small JSON request in, `{result}`
//! payload out. Agents may declare their position via the `X-Signal-*`
//! header protocol; when absent the client falls back to extracting a
//! direction and confidence heuristically from the payload. A 402 reply is
//! a priced-call challenge, forwarded once to the wired payment handshake
//! before a single retry.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{AgentDescriptor, AgentReply, DeclaredPosition, Direction};
use crate::error::{QuarryError, Result};

pub const HEADER_DIRECTION: &str = "x-signal-direction";
pub const HEADER_CONFIDENCE: &str = "x-signal-confidence";
pub const HEADER_STAKE: &str = "x-signal-stake";
pub const HEADER_PAYMENT_RECEIPT: &str = "x-payment-receipt";

/// Challenge body an agent returns with HTTP 402
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentChallenge {
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub pay_to: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Proof of settlement attached to the retried call
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub token: String,
    pub amount: Option<Decimal>,
}

/// Seam for the external payment-handshake collaborator.
#[async_trait]
pub trait PaymentHandshake: Send + Sync {
    async fn settle(
        &self,
        agent_key: &str,
        challenge: &PaymentChallenge,
    ) -> Result<PaymentReceipt>;
}

/// Default wiring: declines every challenge, so priced calls surface as
/// agent unavailability until a real handler is plugged in.
pub struct DeclinePayments;

#[async_trait]
impl PaymentHandshake for DeclinePayments {
    async fn settle(
        &self,
        agent_key: &str,
        _challenge: &PaymentChallenge,
    ) -> Result<PaymentReceipt> {
        Err(QuarryError::PaymentRequired {
            agent: agent_key.to_string(),
            reason: "no payment handler wired".into(),
        })
    }
}

/// Seam the orchestrator calls through; mocked in tests.
#[async_trait]
pub trait AgentCaller: Send + Sync {
    async fn call(&self, agent: &AgentDescriptor, topic: &str) -> Result<AgentReply>;
}

pub struct HttpAgentClient {
    http: Client,
    payments: Arc<dyn PaymentHandshake>,
}

impl HttpAgentClient {
    pub fn new(payments: Arc<dyn PaymentHandshake>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("quarry/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, payments })
    }

    async fn post_once(
        &self,
        agent: &AgentDescriptor,
        topic: &str,
        receipt: Option<&PaymentReceipt>,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .http
            .post(&agent.endpoint)
            .json(&agent.request_body(topic));
        if let Some(receipt) = receipt {
            req = req.header(HEADER_PAYMENT_RECEIPT, receipt.token.clone());
        }
        Ok(req.send().await?)
    }

    async fn into_reply(
        &self,
        agent: &AgentDescriptor,
        response: reqwest::Response,
        payment: Option<Decimal>,
    ) -> Result<AgentReply> {
        let status = response.status();
        if !status.is_success() {
            return Err(QuarryError::AgentUnavailable {
                agent: agent.key.clone(),
                reason: format!("HTTP {status}"),
            });
        }

        let header_position = position_from_headers(response.headers());
        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| QuarryError::AgentUnavailable {
                    agent: agent.key.clone(),
                    reason: format!("invalid JSON body: {e}"),
                })?;

        let payload = body.get("result").cloned().unwrap_or(body);
        let position = header_position
            .or_else(|| position_from_payload(&payload))
            .unwrap_or_else(|| DeclaredPosition::new(Direction::Neutral, 0.5));

        Ok(AgentReply {
            payload,
            position,
            payment,
        })
    }
}

#[async_trait]
impl AgentCaller for HttpAgentClient {
    async fn call(&self, agent: &AgentDescriptor, topic: &str) -> Result<AgentReply> {
        let response = self
            .post_once(agent, topic, None)
            .await
            .map_err(|e| unavailable(agent, e))?;

        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return self.into_reply(agent, response, None).await;
        }

        // Priced call: hand the challenge to the payment collaborator,
        // then retry exactly once with the receipt.
        let challenge: PaymentChallenge =
            response
                .json()
                .await
                .map_err(|e| QuarryError::AgentUnavailable {
                    agent: agent.key.clone(),
                    reason: format!("invalid payment challenge: {e}"),
                })?;
        debug!(agent = %agent.key, amount = ?challenge.amount, "payment challenge received");

        let receipt = self
            .payments
            .settle(&agent.key, &challenge)
            .await
            .map_err(|e| {
                warn!(agent = %agent.key, "payment handshake failed: {e}");
                QuarryError::AgentUnavailable {
                    agent: agent.key.clone(),
                    reason: format!("payment declined: {e}"),
                }
            })?;
        let paid = receipt.amount.or(challenge.amount);

        let retried = self
            .post_once(agent, topic, Some(&receipt))
            .await
            .map_err(|e| unavailable(agent, e))?;
        if retried.status() == StatusCode::PAYMENT_REQUIRED {
            return Err(QuarryError::AgentUnavailable {
                agent: agent.key.clone(),
                reason: "challenge repeated after settlement".into(),
            });
        }
        self.into_reply(agent, retried, paid).await
    }
}

fn unavailable(agent: &AgentDescriptor, err: QuarryError) -> QuarryError {
    match err {
        QuarryError::Http(e) => QuarryError::AgentUnavailable {
            agent: agent.key.clone(),
            reason: e.to_string(),
        },
        other => other,
    }
}

/// Parse the compact header protocol. Direction is required for the
/// header position to count; confidence defaults to 0.5 when absent.
fn position_from_headers(headers: &HeaderMap) -> Option<DeclaredPosition> {
    let direction = headers
        .get(HEADER_DIRECTION)
        .and_then(|v| v.to_str().ok())
        .and_then(Direction::parse_loose)?;

    let confidence = headers
        .get(HEADER_CONFIDENCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| f64::from_str(s.trim()).ok())
        .map(normalize_confidence)
        .unwrap_or(0.5);

    let suggested_stake = headers
        .get(HEADER_STAKE)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Decimal::from_str(s.trim()).ok());

    Some(DeclaredPosition {
        direction,
        confidence,
        suggested_stake,
    })
}

/// Best-effort extraction from a payload that did not use the header
/// protocol: a loose direction string, or the sign of a numeric score.
fn position_from_payload(payload: &serde_json::Value) -> Option<DeclaredPosition> {
    let direction = ["direction", "signal", "stance", "sentiment"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(|v| v.as_str()))
        .and_then(Direction::parse_loose)
        .or_else(|| {
            ["sentiment", "score"]
                .iter()
                .find_map(|key| payload.get(*key).and_then(|v| v.as_f64()))
                .map(|score| {
                    if score > 0.15 {
                        Direction::Bullish
                    } else if score < -0.15 {
                        Direction::Bearish
                    } else {
                        Direction::Neutral
                    }
                })
        })?;

    let confidence = ["confidence", "certainty"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(|v| v.as_f64()))
        .map(normalize_confidence)
        .unwrap_or(0.5);

    Some(DeclaredPosition {
        direction,
        confidence,
        suggested_stake: None,
    })
}

/// Accept both [0,1] and percentage scales from sloppy agents.
fn normalize_confidence(raw: f64) -> f64 {
    let value = if raw > 1.0 { raw / 100.0 } else { raw };
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn header_protocol_parses_full_position() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_DIRECTION, HeaderValue::from_static("bullish"));
        headers.insert(HEADER_CONFIDENCE, HeaderValue::from_static("0.8"));
        headers.insert(HEADER_STAKE, HeaderValue::from_static("2.5"));

        let pos = position_from_headers(&headers).unwrap();
        assert_eq!(pos.direction, Direction::Bullish);
        assert_eq!(pos.confidence, 0.8);
        assert_eq!(pos.suggested_stake, Some(Decimal::from_str("2.5").unwrap()));
    }

    #[test]
    fn header_protocol_requires_direction() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_CONFIDENCE, HeaderValue::from_static("0.9"));
        assert!(position_from_headers(&headers).is_none());
    }

    #[test]
    fn payload_fallback_reads_direction_string() {
        let payload = serde_json::json!({ "direction": "bearish", "confidence": 72 });
        let pos = position_from_payload(&payload).unwrap();
        assert_eq!(pos.direction, Direction::Bearish);
        assert!((pos.confidence - 0.72).abs() < 1e-9);
    }

    #[test]
    fn payload_fallback_reads_numeric_sentiment() {
        let payload = serde_json::json!({ "sentiment": -0.6 });
        let pos = position_from_payload(&payload).unwrap();
        assert_eq!(pos.direction, Direction::Bearish);

        let payload = serde_json::json!({ "sentiment": 0.05 });
        assert_eq!(
            position_from_payload(&payload).unwrap().direction,
            Direction::Neutral
        );
    }

    #[test]
    fn confidence_scales_are_normalized() {
        assert_eq!(normalize_confidence(85.0), 0.85);
        assert_eq!(normalize_confidence(0.85), 0.85);
        assert_eq!(normalize_confidence(250.0), 1.0);
    }
}

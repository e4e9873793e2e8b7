//! Incremental Hunt Events
//!
//! Ordered event sequence emitted while a hunt progresses, consumed by the
//! streaming API. The sequence always terminates with `done`, even after
//! an error or cancellation, so stream consumers never hang.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{Direction, Synthesis};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HuntEvent {
    Start {
        hunt_id: Uuid,
        topic: String,
        agents: Vec<String>,
        at: DateTime<Utc>,
    },
    /// A priced-call challenge was settled for this agent
    Paying {
        agent: String,
        amount: Option<Decimal>,
    },
    Result {
        agent: String,
        ok: bool,
        direction: Option<Direction>,
        confidence: Option<f64>,
        warning: Option<String>,
        latency_ms: u64,
    },
    Competition {
        winner: String,
        loser: String,
        winner_ratio: f64,
        loser_ratio: f64,
    },
    /// The full synthesis
    Alpha { synthesis: Box<Synthesis> },
    Cached { report_id: String },
    Error { message: String },
    Done { hunt_id: Uuid },
}

impl HuntEvent {
    /// Stream event name for SSE framing
    pub fn name(&self) -> &'static str {
        match self {
            HuntEvent::Start { .. } => "start",
            HuntEvent::Paying { .. } => "paying",
            HuntEvent::Result { .. } => "result",
            HuntEvent::Competition { .. } => "competition",
            HuntEvent::Alpha { .. } => "alpha",
            HuntEvent::Cached { .. } => "cached",
            HuntEvent::Error { .. } => "error",
            HuntEvent::Done { .. } => "done",
        }
    }
}

/// Fire-and-forget emit: a gone subscriber never stalls the hunt.
pub async fn emit(events: Option<&mpsc::Sender<HuntEvent>>, event: HuntEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tags() {
        let event = HuntEvent::Cached {
            report_id: "abc123".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cached");
        assert_eq!(json["report_id"], "abc123");
        assert_eq!(event.name(), "cached");
    }
}

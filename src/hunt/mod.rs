pub mod events;
pub mod orchestrator;
pub mod synthesis;

pub use events::HuntEvent;
pub use orchestrator::{AgentOutcome, FanOutResult, HuntOrchestrator};
pub use synthesis::Synthesizer;

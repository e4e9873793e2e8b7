use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::coordinator::HuntCoordinator;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<HuntCoordinator>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(coordinator: Arc<HuntCoordinator>) -> Self {
        Self {
            coordinator,
            started_at: Utc::now(),
        }
    }
}

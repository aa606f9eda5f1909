//! Server state

use std::sync::Arc;
use std::time::Instant;

use crate::deploy::orchestrator::Orchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub version: String,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>, version: String, started_at: Instant) -> Self {
        Self {
            orchestrator,
            version,
            started_at,
        }
    }
}

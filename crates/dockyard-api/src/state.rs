//! Application state.

use dockyard_config::BuilderConfig;
use dockyard_scheduler::Scheduler;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub config: Arc<BuilderConfig>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>, config: BuilderConfig) -> Self {
        Self {
            scheduler,
            config: Arc::new(config),
        }
    }
}

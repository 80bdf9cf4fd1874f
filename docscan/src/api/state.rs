use std::sync::Arc;

use crate::config::Config;
use crate::ocr::OcrOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Shared by every request so the local worker is built once per process.
    pub orchestrator: Arc<OcrOrchestrator>,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Arc<OcrOrchestrator>) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
        }
    }
}

use axum::{extract::State, Json};
use serde::Serialize;

use crate::api::state::AppState;
use crate::ocr::{EngineId, EngineMode};

#[derive(Debug, Clone, Serialize)]
pub struct HealthData {
    pub status: String,
    pub version: String,
    pub pipeline_enabled: bool,
    pub default_mode: EngineMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_engine: Option<EngineId>,
    pub remote_configured: bool,
    pub local_worker_loaded: bool,
}

/// `GET /api/v1/health`
pub async fn health_check(State(state): State<AppState>) -> Json<HealthData> {
    let pipeline = &state.config.pipeline;

    Json(HealthData {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pipeline_enabled: pipeline.enabled,
        default_mode: pipeline.default_mode,
        fixed_engine: (!pipeline.enabled).then_some(pipeline.fixed_engine),
        remote_configured: state.config.remote.api_key.is_some(),
        local_worker_loaded: state.orchestrator.local_worker_loaded(),
    })
}

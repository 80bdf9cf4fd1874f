use axum::{
    routing::{get, post},
    Router,
};

use crate::api::state::AppState;

use super::handlers;

pub fn v1_router() -> Router<AppState> {
    let ocr = Router::new()
        .route("/", post(handlers::ocr::recognize))
        .route("/batch", post(handlers::ocr::recognize_batch))
        .route("/worker/release", post(handlers::ocr::release_worker));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/ocr", ocr)
}

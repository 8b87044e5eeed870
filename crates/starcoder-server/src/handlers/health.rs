//! Health check handler.

use axum::{extract::State, Json};

use crate::{
    models::{HealthResponse, ModelInfo},
    state::AppState,
};

/// Report liveness and the loaded model's shape.
pub async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let hparams = state.service.model().hyperparameters();
    Json(HealthResponse {
        status: "ok".to_string(),
        model: ModelInfo {
            family: state.config.family.clone(),
            context_length: hparams.context_length(),
            vocab_size: hparams.vocab_size(),
            layer_count: hparams.layer_count(),
        },
    })
}

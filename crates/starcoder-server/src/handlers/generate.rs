//! Generation handler.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use starcoder_runtime::GenerationRequest;

use crate::{
    error::ServerError,
    models::{GenerateRequest, GenerateResponse},
    state::AppState,
};

/// Handle `POST /v1/<family>/generate`.
///
/// The decode loop blocks its thread for the whole generation, so it runs on
/// the blocking pool: one worker thread per in-flight request.
pub async fn handle_generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ServerError> {
    let Json(req) = body.map_err(|rejection| ServerError::InvalidBody(rejection.body_text()))?;
    let request = GenerationRequest::try_from(req)?;

    let service = state.service.clone();
    let response = tokio::task::spawn_blocking(move || service.generate(&request))
        .await
        .map_err(|err| ServerError::Internal(err.to_string()))??;

    Ok(Json(GenerateResponse {
        text: response.text,
    }))
}

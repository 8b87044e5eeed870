//! HTTP error handling and response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use starcoder_engine::StarcoderError;

/// Every failure a request can end in. Rendered as a plain-text body.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Starcoder(#[from] StarcoderError),

    #[error("missing {0} field")]
    MissingField(&'static str),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("generation task failed: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Starcoder(StarcoderError::LoadFailure(_)) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

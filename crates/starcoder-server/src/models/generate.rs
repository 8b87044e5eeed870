//! `POST /v1/<family>/generate` body types.

use serde::{Deserialize, Serialize};
use starcoder_runtime::GenerationRequest;

use crate::error::ServerError;

fn default_n_predict() -> i64 {
    GenerationRequest::DEFAULT_N_PREDICT
}

fn default_top_k() -> i64 {
    GenerationRequest::DEFAULT_TOP_K
}

fn default_top_p() -> f32 {
    GenerationRequest::DEFAULT_TOP_P
}

fn default_temp() -> f32 {
    GenerationRequest::DEFAULT_TEMP
}

/// Generation request. `prompt` is required; it is optional here so a
/// missing field gets a specific error instead of a generic parse failure.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_n_predict")]
    pub n_predict: i64,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_temp")]
    pub temp: f32,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl TryFrom<GenerateRequest> for GenerationRequest {
    type Error = ServerError;

    fn try_from(req: GenerateRequest) -> Result<Self, Self::Error> {
        let prompt = req.prompt.ok_or(ServerError::MissingField("prompt"))?;
        Ok(GenerationRequest {
            prompt,
            n_predict: req.n_predict,
            top_k: req.top_k,
            top_p: req.top_p,
            temp: req.temp,
            seed: req.seed,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
}

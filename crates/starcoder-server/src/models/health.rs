//! `GET /health` body types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: ModelInfo,
}

/// What the loaded model can do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub family: String,
    pub context_length: usize,
    pub vocab_size: usize,
    pub layer_count: usize,
}

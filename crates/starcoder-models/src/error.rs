//! Error types for model loading and the reference forward pass.

use starcoder_engine::StarcoderError;

/// Errors while reading a ggml model file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bad magic {0:#010x}, not a ggml file")]
    BadMagic(u32),

    #[error("invalid hyperparameter {name} = {value}")]
    InvalidHyperparameter { name: &'static str, value: i32 },

    #[error("vocabulary has {found} entries, hyperparameters say {expected}")]
    VocabMismatch { expected: usize, found: i64 },

    #[error("file truncated while reading {0}")]
    Truncated(String),

    #[error("tensor '{name}' has unknown type {ttype}")]
    UnknownTensorType { name: String, ttype: i32 },

    #[error("tensor '{name}' is malformed: {reason}")]
    BadTensor { name: String, reason: String },
}

impl From<LoadError> for StarcoderError {
    fn from(err: LoadError) -> Self {
        StarcoderError::LoadFailure(err.to_string())
    }
}

/// Errors from the reference kernels and engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("token {token} outside vocabulary of {n_vocab}")]
    TokenOutOfRange { token: i32, n_vocab: usize },

    #[error("position {position} + batch {batch} exceeds context {n_ctx}")]
    ContextOverflow {
        position: usize,
        batch: usize,
        n_ctx: usize,
    },

    #[error("position {position} skips past {cached} cached tokens")]
    PositionGap { position: usize, cached: usize },
}

impl From<ModelError> for StarcoderError {
    fn from(err: ModelError) -> Self {
        StarcoderError::EngineFailure(err.to_string())
    }
}

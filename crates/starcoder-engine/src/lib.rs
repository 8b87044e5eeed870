//! # starcoder-engine
//!
//! The "narrow waist" of the starcoder.rs stack. Defines the error taxonomy,
//! the model hyperparameters, and the evaluation-port traits ([`Engine`],
//! [`EvalContext`]) that every other crate depends on. A tensor backend plugs in
//! by implementing these two traits; nothing above this crate knows how a
//! forward pass is computed.
//!
//! ## Design Notes
//!
//! ### Shared engine, private contexts
//! `Engine` methods take `&self` so one loaded engine can be shared by every
//! in-flight request. Each request asks for its own [`EvalContext`], which owns
//! the scratch memory and KV-cache region for that request. Engines that only
//! have a single cache region report it through [`Engine::shares_cache`], and the
//! caller must then run one generation at a time.
//!
//! ### Token Type
//! `TokenId` is `i32` to match the on-disk vocabulary indices of ggml model files,
//! though ids are logically non-negative.

pub type Result<T> = std::result::Result<T, StarcoderError>;

/// Token ID type (i32 for file-format compat; logically non-negative).
pub type TokenId = i32;

/// Top-level error type for all per-request and load-time operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StarcoderError {
    /// Bad request parameters or a prompt that leaves no room to generate.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A sampled or prompt id has no vocabulary entry.
    #[error("failed to decode token: {0}")]
    UnknownToken(TokenId),
    /// The evaluation port reported a failure. Never retried.
    #[error("failed to predict: {0}")]
    EngineFailure(String),
    /// The model file is missing or malformed.
    #[error("failed to load model: {0}")]
    LoadFailure(String),
}

/// Model hyperparameters, fixed at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hyperparameters {
    /// Vocabulary size (logits per position).
    pub n_vocab: usize,
    /// Maximum number of tokens the engine can address in one request.
    pub n_ctx: usize,
    /// Embedding width.
    pub n_embd: usize,
    /// Attention heads.
    pub n_head: usize,
    /// Transformer layers.
    pub n_layer: usize,
    /// Weight storage type, with the quantization version already stripped.
    pub ftype: u32,
}

impl Hyperparameters {
    pub fn context_length(&self) -> usize {
        self.n_ctx
    }

    pub fn vocab_size(&self) -> usize {
        self.n_vocab
    }

    pub fn layer_count(&self) -> usize {
        self.n_layer
    }
}

impl Default for Hyperparameters {
    /// gpt_bigcode-santacoder defaults.
    fn default() -> Self {
        Self {
            n_vocab: 49280,
            n_ctx: 2048,
            n_embd: 2048,
            n_head: 16,
            n_layer: 24,
            ftype: 1,
        }
    }
}

/// Per-request evaluation state: scratch buffers plus the KV-cache region.
///
/// Contexts are intentionally not `Clone`. Duplicating one would duplicate
/// the attention state, which is not a cheap or well-defined operation.
pub trait EvalContext: Send {
    /// Run the forward pass for `tokens`, placed at `position..position + tokens.len()`.
    ///
    /// Returns a flat logits buffer of at least `n_vocab` floats; the last
    /// `n_vocab` entries are the distribution for the final position. Calling
    /// again with a smaller `position` overwrites the cache from that point on.
    fn evaluate(&mut self, position: usize, tokens: &[TokenId]) -> Result<Vec<f32>>;
}

/// The evaluation port: a loaded tensor engine that hands out contexts.
pub trait Engine: Send + Sync {
    /// Hyperparameters of the loaded weights.
    fn hyperparameters(&self) -> &Hyperparameters;

    /// Allocate working memory and a cache region for one request.
    fn context(&self) -> Result<Box<dyn EvalContext + '_>>;

    /// Whether every context aliases one shared cache region.
    fn shares_cache(&self) -> bool {
        false
    }
}

//! Transport-agnostic request handling: validate, tokenize, generate, detokenize.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use starcoder_engine::{Result, StarcoderError, TokenId};
use starcoder_sampling::{derive_seed, Sampler};
use starcoder_tokenizer::Tokenizer;
use uuid::Uuid;

use crate::driver::{DriverConfig, GenerationDriver};
use crate::model::Model;
use crate::telemetry::{GenerationStats, TelemetryHook, TracingTelemetry};

/// One generation request with its sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub n_predict: i64,
    pub top_k: i64,
    pub top_p: f32,
    pub temp: f32,
    /// Fixed seed for reproducible sampling; otherwise one is derived per request.
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub const DEFAULT_N_PREDICT: i64 = 200;
    pub const DEFAULT_TOP_K: i64 = 40;
    pub const DEFAULT_TOP_P: f32 = 0.9;
    pub const DEFAULT_TEMP: f32 = 0.9;

    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            n_predict: Self::DEFAULT_N_PREDICT,
            top_k: Self::DEFAULT_TOP_K,
            top_p: Self::DEFAULT_TOP_P,
            temp: Self::DEFAULT_TEMP,
            seed: None,
        }
    }

    pub fn with_n_predict(mut self, n_predict: i64) -> Self {
        self.n_predict = n_predict;
        self
    }

    pub fn with_top_k(mut self, top_k: i64) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_temp(mut self, temp: f32) -> Self {
        self.temp = temp;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check every sampling parameter before any evaluation happens.
    pub fn validate(&self) -> Result<()> {
        if self.n_predict < 0 {
            return Err(invalid(format!("n_predict must be >= 0, got {}", self.n_predict)));
        }
        if self.top_k < 1 {
            return Err(invalid(format!("top_k must be >= 1, got {}", self.top_k)));
        }
        if self.top_p.is_nan() || self.top_p <= 0.0 || self.top_p > 1.0 {
            return Err(invalid(format!("top_p must be in (0, 1], got {}", self.top_p)));
        }
        if self.temp.is_nan() || self.temp <= 0.0 {
            return Err(invalid(format!("temp must be > 0, got {}", self.temp)));
        }
        Ok(())
    }
}

fn invalid(message: String) -> StarcoderError {
    StarcoderError::InvalidInput(message)
}

/// Generated text plus the ids it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens: Vec<TokenId>,
    pub stats: GenerationStats,
}

/// Bridges one request to one generation against the shared [`Model`].
pub struct RequestService {
    model: Arc<Model>,
    driver: GenerationDriver,
    base_seed: u64,
    requests: AtomicU64,
    telemetry: Arc<dyn TelemetryHook>,
}

impl RequestService {
    pub fn new(model: Arc<Model>, config: DriverConfig) -> Self {
        let driver = GenerationDriver::new(*model.hyperparameters(), config);
        Self {
            model,
            driver,
            base_seed: 0,
            requests: AtomicU64::new(0),
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    /// Base seed mixed with the request counter when a request brings no seed.
    pub fn with_base_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    pub fn with_telemetry(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = hook;
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Run one request to completion. Blocks the calling thread.
    pub fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let span = tracing::info_span!("generate", request_id = %Uuid::new_v4());
        let _enter = span.enter();

        request.validate()?;

        let vocab = self.model.vocabulary();
        let prompt_ids = vocab.encode(&request.prompt)?;
        let n_ctx = self.model.hyperparameters().context_length();
        if prompt_ids.len() >= n_ctx {
            return Err(invalid(format!(
                "prompt is {} tokens but the context holds {n_ctx}; no room to generate",
                prompt_ids.len()
            )));
        }

        let seed = request.seed.unwrap_or_else(|| {
            derive_seed(self.base_seed, self.requests.fetch_add(1, Ordering::Relaxed))
        });
        let mut sampler = Sampler::new()
            .with_top_k(request.top_k as usize)
            .with_top_p(request.top_p)
            .with_temperature(request.temp)
            .with_seed(seed);

        let generation = {
            let mut session = self.model.session()?;
            self.driver
                .run(
                    session.context(),
                    &prompt_ids,
                    request.n_predict as usize,
                    &mut sampler,
                    self.model.stop_policy(),
                    self.telemetry.as_ref(),
                )
                .inspect_err(|err| tracing::error!(error = %err, "generation failed"))?
        };

        let text = vocab.decode(&generation.tokens).map_err(|err| {
            tracing::warn!(error = %err, "emitted id has no vocabulary entry");
            StarcoderError::from(err)
        })?;

        Ok(GenerationResponse {
            text,
            tokens: generation.tokens,
            stats: generation.stats,
        })
    }
}

impl std::fmt::Debug for RequestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestService")
            .field("model", &self.model)
            .field("driver", &self.driver)
            .field("base_seed", &self.base_seed)
            .finish_non_exhaustive()
    }
}

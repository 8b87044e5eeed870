//! # starcoder-cli
//!
//! One-shot generation from the command line.
//!
//! Wires: ggml loader → reference engine → request service, then runs a
//! single request and hands back the text.

use std::path::PathBuf;
use std::sync::Arc;

use starcoder_engine::{StarcoderError, TokenId};
use starcoder_models::{ReferenceEngine, WeightIndex};
use starcoder_runtime::{
    DriverConfig, GenerationRequest, GenerationResponse, Model, RequestService, StopPolicy,
};

/// Errors from the command-line pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Starcoder(#[from] StarcoderError),
    #[error("batch size must be >= 1")]
    ZeroBatch,
}

/// How to load a model.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub model: PathBuf,
    pub batch_size: usize,
    pub eos_token_ids: Vec<TokenId>,
    pub base_seed: u64,
}

impl LoadOptions {
    pub fn new(model: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            batch_size: DriverConfig::default().batch_size,
            eos_token_ids: Vec::new(),
            base_seed: 0,
        }
    }
}

/// A loaded model ready to serve requests.
///
/// Holds the weight map so it stays alive as long as the service.
pub struct LoadedService {
    pub service: RequestService,
    weights: WeightIndex,
}

impl LoadedService {
    pub fn weights(&self) -> &WeightIndex {
        &self.weights
    }
}

pub fn load_service(options: &LoadOptions) -> Result<LoadedService, CliError> {
    if options.batch_size == 0 {
        return Err(CliError::ZeroBatch);
    }
    let loaded = starcoder_models::load(&options.model).map_err(StarcoderError::from)?;
    let stop = StopPolicy::resolve(&loaded.vocab, &options.eos_token_ids)?;
    let engine = ReferenceEngine::for_model(loaded.hparams)?;

    let model = Model::new(Box::new(engine), loaded.vocab, stop);
    let service = RequestService::new(
        Arc::new(model),
        DriverConfig::default().with_batch_size(options.batch_size),
    )
    .with_base_seed(options.base_seed);

    Ok(LoadedService {
        service,
        weights: loaded.weights,
    })
}

/// Load the model and run one request against it.
pub fn generate(
    options: &LoadOptions,
    request: &GenerationRequest,
) -> Result<GenerationResponse, CliError> {
    let loaded = load_service(options)?;
    tracing::debug!(tensors = loaded.weights().len(), "weights mapped");
    Ok(loaded.service.generate(request)?)
}

//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use starcoder_engine::{Result, StarcoderError, TokenId};
use starcoder_models::{ReferenceEngine, WeightIndex};
use starcoder_runtime::{DriverConfig, Model, RequestService, StopPolicy};

use crate::state::{AppState, ServerConfig};

/// starcoder.rs HTTP server
#[derive(Debug, Clone, Parser)]
#[command(name = "starcoder-server", version)]
pub struct ServerArgs {
    /// Path to a ggml starcoder model file.
    #[arg(
        short,
        long,
        env = "STARCODER_MODEL",
        default_value = "models/bigcode/gpt_bigcode-santacoder-ggml.bin"
    )]
    pub model: PathBuf,

    /// Address to bind.
    #[arg(long, env = "STARCODER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "STARCODER_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Model family; requests go to `/v1/<family>/generate`.
    #[arg(long, env = "STARCODER_FAMILY", default_value = "starcoder")]
    pub family: String,

    /// Prompt tokens per evaluation call.
    #[arg(long, env = "STARCODER_BATCH_SIZE", default_value_t = 8)]
    pub batch_size: usize,

    /// Base sampling seed; negative picks one from the clock.
    #[arg(short, long, env = "STARCODER_SEED", default_value_t = -1, allow_hyphen_values = true)]
    pub seed: i64,

    /// End-of-sequence token id. Repeatable; defaults to the vocabulary's `<|endoftext|>`.
    #[arg(long = "eos-token-id", env = "STARCODER_EOS_TOKEN_ID", value_delimiter = ',')]
    pub eos_token_ids: Vec<TokenId>,
}

impl ServerArgs {
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|err| StarcoderError::InvalidInput(format!("bad listen address: {err}")))
    }

    pub fn base_seed(&self) -> u64 {
        if self.seed >= 0 {
            return self.seed as u64;
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    }

    /// Load the model and build the shared state.
    ///
    /// The returned weight index owns the memory map and must outlive the server.
    pub fn build_state(&self) -> Result<(AppState, WeightIndex)> {
        if self.batch_size == 0 {
            return Err(StarcoderError::InvalidInput("batch size must be >= 1".to_string()));
        }

        let loaded = starcoder_models::load(&self.model)?;
        let stop = StopPolicy::resolve(&loaded.vocab, &self.eos_token_ids)?;
        tracing::info!(end_ids = ?stop.end_ids().collect::<Vec<_>>(), "stop policy");

        let engine = ReferenceEngine::for_model(loaded.hparams)?;
        let model = Arc::new(Model::new(Box::new(engine), loaded.vocab, stop));

        let base_seed = self.base_seed();
        tracing::info!(base_seed, batch_size = self.batch_size, "sampling configured");
        let service = RequestService::new(
            model,
            DriverConfig::default().with_batch_size(self.batch_size),
        )
        .with_base_seed(base_seed);

        let config = ServerConfig {
            family: self.family.clone(),
        };
        Ok((AppState::new(service, config), loaded.weights))
    }
}

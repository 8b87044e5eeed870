//! The autoregressive decode loop.
//!
//! One [`GenerationDriver::run`] call owns a request's decode state: the
//! running `position` already folded into the context's cache, the pending
//! batch for the next evaluate call, and the emitted ids. Prompt tokens are fed
//! in batches of at most [`DriverConfig::batch_size`]; every new token is sampled
//! from the logits of the last evaluated position and fed back on its own.
//!
//! ```text
//!   warm-up ──► [prompt batch]* ──► sample ─► [token] ─► sample ─► ...
//!   pos 0        pos 0, 8, 16 ...            pos n      pos n+1
//! ```
//!
//! The final emitted token is never evaluated, so `position + batch` stays
//! within the context length for every call as long as the budget was
//! computed with [`token_budget`].

use std::time::Instant;

use starcoder_engine::{EvalContext, Hyperparameters, Result, StarcoderError, TokenId};
use starcoder_sampling::Sampler;

use crate::stop::StopPolicy;
use crate::telemetry::{GenerationStats, GenerationTimer, StopReason, TelemetryHook};

/// Sentinel batch evaluated once before the prompt so the engine can size its
/// scratch buffers. Its logits seed the first sample when the prompt is empty.
pub const WARMUP_TOKENS: [TokenId; 4] = [0, 1, 2, 3];

/// Prompt ids echoed at debug level.
const PROMPT_LOG_HEAD: usize = 8;

/// Runtime knobs for the decode loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Maximum number of prompt tokens submitted in one evaluate call.
    pub batch_size: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { batch_size: 8 }
    }
}

impl DriverConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Number of tokens a request may generate: `min(max_new, n_ctx - prompt_len)`,
/// zero once the prompt fills the context.
pub fn token_budget(max_new_tokens: usize, context_length: usize, prompt_len: usize) -> usize {
    max_new_tokens.min(context_length.saturating_sub(prompt_len))
}

/// Output of one generation: emitted ids (a terminating end id included) and stats.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub tokens: Vec<TokenId>,
    pub stats: GenerationStats,
}

/// Drives the evaluate/sample loop for a model with the given hyperparameters.
#[derive(Debug, Clone)]
pub struct GenerationDriver {
    config: DriverConfig,
    hparams: Hyperparameters,
}

impl GenerationDriver {
    pub fn new(hparams: Hyperparameters, config: DriverConfig) -> Self {
        Self { config, hparams }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Generate up to `max_new_tokens` ids after `prompt`.
    ///
    /// Any evaluate failure aborts the run; nothing is retried because the
    /// context's cache no longer matches `position`.
    pub fn run(
        &self,
        ctx: &mut dyn EvalContext,
        prompt: &[TokenId],
        max_new_tokens: usize,
        sampler: &mut Sampler,
        stop: &StopPolicy,
        hook: &dyn TelemetryHook,
    ) -> Result<Generation> {
        let n_ctx = self.hparams.context_length();
        let n_vocab = self.hparams.vocab_size();
        let batch_size = self.config.batch_size.max(1);
        let budget = token_budget(max_new_tokens, n_ctx, prompt.len());

        tracing::debug!(
            prompt_tokens = prompt.len(),
            head = ?&prompt[..prompt.len().min(PROMPT_LOG_HEAD)],
            budget,
            "starting generation"
        );

        let mut timer = GenerationTimer::new(prompt.len(), hook);
        let mut emitted = Vec::with_capacity(budget);
        if budget == 0 {
            return Ok(Generation {
                tokens: emitted,
                stats: timer.finish(StopReason::Budget),
            });
        }

        let warmup_len = WARMUP_TOKENS.len().min(n_ctx).min(n_vocab);
        let mut logits = timed_eval(ctx, &mut timer, 0, &WARMUP_TOKENS[..warmup_len])?;

        let mut position = 0;
        let mut pending: Vec<TokenId> = Vec::with_capacity(batch_size);
        let mut stop_reason = StopReason::Budget;
        let total = prompt.len() + budget;
        let mut i = 0;

        while i < total {
            if !pending.is_empty() {
                debug_assert!(position + pending.len() <= n_ctx);
                logits = timed_eval(ctx, &mut timer, position, &pending)?;
                position += pending.len();
                pending.clear();
            }

            if i >= prompt.len() {
                let last = last_position(&logits, n_vocab)?;
                let started = Instant::now();
                let id = sampler.sample(last)?;
                let token = TokenId::try_from(id).map_err(|_| {
                    StarcoderError::EngineFailure(format!("sampled id {id} out of range"))
                })?;
                timer.record_sample(token, started.elapsed());

                pending.push(token);
                emitted.push(token);
                i += 1;

                if stop.should_stop(token) {
                    stop_reason = StopReason::EndOfSequence;
                    break;
                }
            } else {
                let end = (i + batch_size).min(prompt.len());
                pending.extend_from_slice(&prompt[i..end]);
                i = end;
            }
        }

        Ok(Generation {
            tokens: emitted,
            stats: timer.finish(stop_reason),
        })
    }
}

fn timed_eval(
    ctx: &mut dyn EvalContext,
    timer: &mut GenerationTimer<'_>,
    position: usize,
    tokens: &[TokenId],
) -> Result<Vec<f32>> {
    let started = Instant::now();
    let logits = ctx.evaluate(position, tokens)?;
    timer.record_eval(position, tokens.len(), started.elapsed());
    Ok(logits)
}

/// The distribution for the final evaluated position: the last `n_vocab` floats.
fn last_position(logits: &[f32], n_vocab: usize) -> Result<&[f32]> {
    if n_vocab == 0 || logits.len() < n_vocab {
        return Err(StarcoderError::EngineFailure(format!(
            "engine returned {} logits, expected at least {n_vocab}",
            logits.len()
        )));
    }
    Ok(&logits[logits.len() - n_vocab..])
}

//! Telemetry hooks for generation performance measurement.
//!
//! Provides:
//! - [`GenerationStats`]: evaluation/sampling time split and a generation summary
//! - [`TelemetryHook`] trait: callback interface for per-step and summary reporting
//! - [`GenerationTimer`]: accumulates step timings and produces the stats
//! - [`NoopTelemetry`] / [`TracingTelemetry`] / [`RecordingTelemetry`]: built-in hooks

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use starcoder_engine::TokenId;

/// Why a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A configured end-of-sequence id was emitted.
    EndOfSequence,
    /// The new-token budget ran out (including a budget of zero).
    Budget,
}

/// Aggregate metrics from one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationStats {
    /// Number of prompt tokens fed to the engine.
    pub prompt_tokens: usize,
    /// Number of tokens emitted, including a terminating end id.
    pub generated_tokens: usize,
    /// Evaluate calls made, warm-up included.
    pub eval_calls: usize,
    /// Wall-clock time spent inside the evaluation port, in milliseconds.
    pub eval_time_ms: f64,
    /// Wall-clock time spent sampling, in milliseconds.
    pub sample_time_ms: f64,
    pub stop_reason: StopReason,
}

impl GenerationStats {
    /// Mean evaluation time per evaluated token position.
    pub fn eval_ms_per_token(&self) -> f64 {
        let evaluated = self.prompt_tokens + self.generated_tokens.saturating_sub(1);
        if evaluated == 0 {
            0.0
        } else {
            self.eval_time_ms / evaluated as f64
        }
    }

    /// Mean sampling time per emitted token.
    pub fn sample_ms_per_token(&self) -> f64 {
        if self.generated_tokens == 0 {
            0.0
        } else {
            self.sample_time_ms / self.generated_tokens as f64
        }
    }
}

/// Callback trait for generation telemetry.
///
/// All methods have default no-op implementations so hooks can be selective.
pub trait TelemetryHook: Send + Sync {
    /// Called after each evaluate call returns successfully.
    fn on_evaluate(&self, _position: usize, _batch_len: usize, _elapsed_ms: f64) {}

    /// Called after each token is sampled. `index` counts from 1.
    fn on_token_sampled(&self, _index: usize, _token: TokenId) {}

    /// Called when generation finishes with the summary.
    fn on_generation_complete(&self, _stats: &GenerationStats) {}
}

/// No-op telemetry hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Logs the completion summary at `info` and each step at `trace`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryHook for TracingTelemetry {
    fn on_evaluate(&self, position: usize, batch_len: usize, elapsed_ms: f64) {
        tracing::trace!(position, batch_len, elapsed_ms, "evaluated batch");
    }

    fn on_token_sampled(&self, index: usize, token: TokenId) {
        tracing::trace!(index, token, "sampled token");
    }

    fn on_generation_complete(&self, stats: &GenerationStats) {
        tracing::info!(
            prompt_tokens = stats.prompt_tokens,
            generated_tokens = stats.generated_tokens,
            eval_calls = stats.eval_calls,
            eval_ms_per_token = stats.eval_ms_per_token(),
            sample_ms_per_token = stats.sample_ms_per_token(),
            stop_reason = ?stats.stop_reason,
            "generation complete"
        );
    }
}

/// Keeps the last completed generation's stats for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    last_report: Arc<Mutex<Option<GenerationStats>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_stats(&self) -> Option<GenerationStats> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetryHook for RecordingTelemetry {
    fn on_generation_complete(&self, stats: &GenerationStats) {
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(stats.clone());
    }
}

/// Accumulates timings during one generation to compute [`GenerationStats`].
///
/// Usage:
/// 1. [`GenerationTimer::new`] at generation start
/// 2. [`record_eval`] after each evaluate call
/// 3. [`record_sample`] after each sampled token
/// 4. [`finish`] to compute the stats and fire the summary hook
///
/// [`record_eval`]: GenerationTimer::record_eval
/// [`record_sample`]: GenerationTimer::record_sample
/// [`finish`]: GenerationTimer::finish
pub struct GenerationTimer<'h> {
    prompt_tokens: usize,
    eval_calls: usize,
    eval_time: Duration,
    sample_time: Duration,
    generated: usize,
    hook: &'h dyn TelemetryHook,
}

impl<'h> GenerationTimer<'h> {
    pub fn new(prompt_tokens: usize, hook: &'h dyn TelemetryHook) -> Self {
        Self {
            prompt_tokens,
            eval_calls: 0,
            eval_time: Duration::ZERO,
            sample_time: Duration::ZERO,
            generated: 0,
            hook,
        }
    }

    pub fn record_eval(&mut self, position: usize, batch_len: usize, elapsed: Duration) {
        self.eval_calls += 1;
        self.eval_time += elapsed;
        self.hook
            .on_evaluate(position, batch_len, elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_sample(&mut self, token: TokenId, elapsed: Duration) {
        self.generated += 1;
        self.sample_time += elapsed;
        self.hook.on_token_sampled(self.generated, token);
    }

    pub fn finish(self, stop_reason: StopReason) -> GenerationStats {
        let stats = GenerationStats {
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.generated,
            eval_calls: self.eval_calls,
            eval_time_ms: self.eval_time.as_secs_f64() * 1000.0,
            sample_time_ms: self.sample_time.as_secs_f64() * 1000.0,
            stop_reason,
        };
        self.hook.on_generation_complete(&stats);
        stats
    }
}

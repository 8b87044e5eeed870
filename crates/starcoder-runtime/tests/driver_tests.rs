//! Integration tests for the generation driver.
//!
//! Validates:
//! - Warm-up, prompt batching and position bookkeeping against a recording engine
//! - `position + batch <= n_ctx` for every evaluate call
//! - Budget clamping (no evaluate calls at all for a zero budget)
//! - Stop-token handling (end id kept, nothing evaluated after it)
//! - Engine failures propagate without retries
//! - Generation stats match what happened

mod common;

use common::{Call, RecordingEngine};
use starcoder_engine::*;
use starcoder_runtime::*;
use starcoder_sampling::Sampler;

fn greedy() -> Sampler {
    Sampler::new().with_top_k(1)
}

fn call(position: usize, tokens: &[TokenId]) -> Call {
    Call {
        position,
        tokens: tokens.to_vec(),
    }
}

fn run(
    engine: &RecordingEngine,
    config: DriverConfig,
    prompt: &[TokenId],
    max_new: usize,
    stop: &StopPolicy,
) -> Result<Generation> {
    let driver = GenerationDriver::new(*engine.hyperparameters(), config);
    let mut ctx = engine.context()?;
    driver.run(
        ctx.as_mut(),
        prompt,
        max_new,
        &mut greedy(),
        stop,
        &NoopTelemetry,
    )
}

// ===========================================================================
// Bookkeeping
// ===========================================================================

#[test]
fn warmup_then_prompt_then_one_token_per_step() {
    let engine = RecordingEngine::new(32, 64);
    let out = run(&engine, DriverConfig::default(), &[5, 6, 7], 4, &StopPolicy::never()).unwrap();

    assert_eq!(out.tokens, vec![8, 9, 10, 11]);
    assert_eq!(
        engine.recorded(),
        vec![
            call(0, &[0, 1, 2, 3]),
            call(0, &[5, 6, 7]),
            call(3, &[8]),
            call(4, &[9]),
            call(5, &[10]),
        ]
    );
}

#[test]
fn prompt_is_split_into_batches() {
    let engine = RecordingEngine::new(32, 64);
    let prompt: Vec<TokenId> = (1..=20).collect();
    let out = run(&engine, DriverConfig::default(), &prompt, 1, &StopPolicy::never()).unwrap();

    assert_eq!(out.tokens, vec![21]);
    assert_eq!(
        engine.recorded(),
        vec![
            call(0, &[0, 1, 2, 3]),
            call(0, &prompt[0..8]),
            call(8, &prompt[8..16]),
            call(16, &prompt[16..20]),
        ]
    );
}

#[test]
fn batch_size_one_feeds_prompt_token_by_token() {
    let engine = RecordingEngine::new(32, 64);
    let config = DriverConfig::default().with_batch_size(1);
    run(&engine, config, &[4, 5, 6], 1, &StopPolicy::never()).unwrap();

    let positions: Vec<usize> = engine.recorded().iter().skip(1).map(|c| c.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
}

#[test]
fn full_logits_buffer_reads_last_position() {
    let last_only = RecordingEngine::new(32, 64);
    let full = RecordingEngine::new(32, 64).with_full_logits();
    let prompt = [3, 9, 14];

    let a = run(&last_only, DriverConfig::default(), &prompt, 5, &StopPolicy::never()).unwrap();
    let b = run(&full, DriverConfig::default(), &prompt, 5, &StopPolicy::never()).unwrap();
    assert_eq!(a.tokens, b.tokens);
    assert_eq!(b.tokens, vec![15, 16, 17, 18, 19]);
}

#[test]
fn empty_prompt_samples_from_warmup_logits() {
    let engine = RecordingEngine::new(32, 64);
    let out = run(&engine, DriverConfig::default(), &[], 2, &StopPolicy::never()).unwrap();

    assert_eq!(out.tokens, vec![4, 5]);
    assert_eq!(engine.recorded(), vec![call(0, &[0, 1, 2, 3]), call(0, &[4])]);
}

// ===========================================================================
// Context limits
// ===========================================================================

#[test]
fn prompt_filling_context_makes_no_calls() {
    let engine = RecordingEngine::new(32, 4);
    for prompt in [vec![1, 2, 3, 4], vec![1, 2, 3, 4, 5]] {
        let out = run(&engine, DriverConfig::default(), &prompt, 10, &StopPolicy::never()).unwrap();
        assert!(out.tokens.is_empty());
        assert_eq!(out.stats.stop_reason, StopReason::Budget);
        assert_eq!(out.stats.eval_calls, 0);
    }
    assert!(engine.recorded().is_empty());
}

#[test]
fn zero_budget_makes_no_calls() {
    let engine = RecordingEngine::new(32, 64);
    let out = run(&engine, DriverConfig::default(), &[], 0, &StopPolicy::never()).unwrap();
    assert!(out.tokens.is_empty());
    assert!(engine.recorded().is_empty());
}

#[test]
fn budget_is_clamped_to_remaining_context() {
    let engine = RecordingEngine::new(32, 6);
    let out = run(&engine, DriverConfig::default(), &[1, 2, 3], 100, &StopPolicy::never()).unwrap();

    assert_eq!(out.tokens, vec![4, 5, 6]);
    for c in engine.recorded() {
        assert!(c.position + c.tokens.len() <= 6, "{c:?} overflows the context");
    }
}

#[test]
fn positions_never_exceed_context_across_shapes() {
    for n_ctx in [1usize, 2, 5, 9, 17] {
        for prompt_len in 0..n_ctx + 2 {
            for batch in [1usize, 3, 8] {
                let engine = RecordingEngine::new(64, n_ctx);
                let prompt: Vec<TokenId> = (0..prompt_len as TokenId).collect();
                let out = run(
                    &engine,
                    DriverConfig::default().with_batch_size(batch),
                    &prompt,
                    usize::MAX,
                    &StopPolicy::never(),
                )
                .unwrap();

                assert_eq!(out.tokens.len(), token_budget(usize::MAX, n_ctx, prompt_len));
                for c in engine.recorded() {
                    assert!(c.position + c.tokens.len() <= n_ctx);
                    assert!(c.tokens.len() <= batch.max(WARMUP_TOKENS.len()));
                }
            }
        }
    }
}

#[test]
fn warmup_is_clamped_to_tiny_context() {
    let engine = RecordingEngine::new(32, 2);
    let out = run(&engine, DriverConfig::default(), &[], 5, &StopPolicy::never()).unwrap();

    assert_eq!(out.tokens, vec![2, 3]);
    assert_eq!(engine.recorded()[0], call(0, &[0, 1]));
}

// ===========================================================================
// Stop policy
// ===========================================================================

#[test]
fn stop_token_ends_generation_and_is_kept() {
    let engine = RecordingEngine::new(32, 64);
    let out = run(&engine, DriverConfig::default(), &[7], 10, &StopPolicy::new([10])).unwrap();

    assert_eq!(out.tokens, vec![8, 9, 10]);
    assert_eq!(out.stats.stop_reason, StopReason::EndOfSequence);
    // The end id itself is never evaluated.
    assert_eq!(engine.recorded().last(), Some(&call(2, &[9])));
}

#[test]
fn stop_token_as_first_sample() {
    let engine = RecordingEngine::new(32, 64);
    let out = run(&engine, DriverConfig::default(), &[0], 10, &StopPolicy::new([1])).unwrap();
    assert_eq!(out.tokens, vec![1]);
    assert_eq!(out.stats.stop_reason, StopReason::EndOfSequence);
}

#[test]
fn end_id_in_prompt_does_not_stop() {
    let engine = RecordingEngine::new(32, 64);
    let out = run(&engine, DriverConfig::default(), &[10, 3], 2, &StopPolicy::new([10])).unwrap();
    assert_eq!(out.tokens, vec![4, 5]);
    assert_eq!(out.stats.stop_reason, StopReason::Budget);
}

// ===========================================================================
// Failures
// ===========================================================================

#[test]
fn engine_failure_aborts_without_retry() {
    let engine = RecordingEngine::new(32, 64).failing_on(2);
    let err = run(&engine, DriverConfig::default(), &[1, 2], 5, &StopPolicy::never()).unwrap_err();

    assert!(matches!(err, StarcoderError::EngineFailure(_)));
    assert_eq!(engine.recorded().len(), 3);
}

#[test]
fn warmup_failure_aborts() {
    let engine = RecordingEngine::new(32, 64).failing_on(0);
    let err = run(&engine, DriverConfig::default(), &[1], 1, &StopPolicy::never()).unwrap_err();
    assert!(matches!(err, StarcoderError::EngineFailure(_)));
    assert_eq!(engine.recorded().len(), 1);
}

#[test]
fn invalid_sampler_surfaces_as_invalid_input() {
    let engine = RecordingEngine::new(32, 64);
    let driver = GenerationDriver::new(*engine.hyperparameters(), DriverConfig::default());
    let mut ctx = engine.context().unwrap();
    let mut sampler = Sampler::new().with_top_k(0);

    let err = driver
        .run(ctx.as_mut(), &[1], 1, &mut sampler, &StopPolicy::never(), &NoopTelemetry)
        .unwrap_err();
    assert!(matches!(err, StarcoderError::InvalidInput(_)));
}

// ===========================================================================
// Telemetry
// ===========================================================================

#[test]
fn stats_describe_the_run() {
    let engine = RecordingEngine::new(32, 64);
    let driver = GenerationDriver::new(*engine.hyperparameters(), DriverConfig::default());
    let mut ctx = engine.context().unwrap();
    let log = RecordingTelemetry::new();

    let out = driver
        .run(ctx.as_mut(), &[5, 6, 7], 4, &mut greedy(), &StopPolicy::never(), &log)
        .unwrap();

    assert_eq!(out.stats.prompt_tokens, 3);
    assert_eq!(out.stats.generated_tokens, 4);
    assert_eq!(out.stats.eval_calls, 5);
    assert_eq!(out.stats.stop_reason, StopReason::Budget);
    assert!(out.stats.eval_time_ms >= 0.0);
    assert_eq!(log.last_stats(), Some(out.stats));
}

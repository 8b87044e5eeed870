//! Mock evaluation port shared by the runtime integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use starcoder_engine::*;

/// One recorded `evaluate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub position: usize,
    pub tokens: Vec<TokenId>,
}

/// Mock engine whose logits put all mass on `(last token + 1) % n_vocab`.
///
/// Records every evaluate call across all contexts and tracks how many
/// contexts are alive at once.
pub struct RecordingEngine {
    hparams: Hyperparameters,
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub live: Arc<AtomicUsize>,
    pub max_live: Arc<AtomicUsize>,
    shares_cache: bool,
    fail_on_call: Option<usize>,
    full_logits: bool,
    step_delay: Option<Duration>,
}

impl RecordingEngine {
    pub fn new(n_vocab: usize, n_ctx: usize) -> Self {
        Self {
            hparams: Hyperparameters {
                n_vocab,
                n_ctx,
                n_embd: 8,
                n_head: 1,
                n_layer: 1,
                ftype: 0,
            },
            calls: Arc::default(),
            live: Arc::default(),
            max_live: Arc::default(),
            shares_cache: false,
            fail_on_call: None,
            full_logits: false,
            step_delay: None,
        }
    }

    /// Fail the `n`th evaluate call (0-based, warm-up included).
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    pub fn sharing_cache(mut self) -> Self {
        self.shares_cache = true;
        self
    }

    /// Return logits for every position of the batch, not just the last.
    pub fn with_full_logits(mut self) -> Self {
        self.full_logits = true;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    pub fn recorded(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

pub struct RecordingContext<'e> {
    engine: &'e RecordingEngine,
    cached: Vec<TokenId>,
}

impl EvalContext for RecordingContext<'_> {
    fn evaluate(&mut self, position: usize, tokens: &[TokenId]) -> Result<Vec<f32>> {
        let engine = self.engine;
        let index = {
            let mut calls = engine.calls.lock().unwrap();
            calls.push(Call {
                position,
                tokens: tokens.to_vec(),
            });
            calls.len() - 1
        };
        if engine.fail_on_call == Some(index) {
            return Err(StarcoderError::EngineFailure("mock failure".to_string()));
        }
        if position + tokens.len() > engine.hparams.n_ctx {
            return Err(StarcoderError::EngineFailure("context overflow".to_string()));
        }
        if let Some(delay) = engine.step_delay {
            std::thread::sleep(delay);
        }

        self.cached.truncate(position);
        self.cached.extend_from_slice(tokens);

        let n_vocab = engine.hparams.n_vocab;
        let rows = if engine.full_logits { tokens.len() } else { 1 };
        let mut logits = vec![0.0; rows * n_vocab];
        for (row, &tok) in tokens[tokens.len() - rows..].iter().enumerate() {
            logits[row * n_vocab + (tok as usize + 1) % n_vocab] = 10.0;
        }
        Ok(logits)
    }
}

impl Drop for RecordingContext<'_> {
    fn drop(&mut self) {
        self.engine.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Engine for RecordingEngine {
    fn hyperparameters(&self) -> &Hyperparameters {
        &self.hparams
    }

    fn context(&self) -> Result<Box<dyn EvalContext + '_>> {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(RecordingContext {
            engine: self,
            cached: Vec::new(),
        }))
    }

    fn shares_cache(&self) -> bool {
        self.shares_cache
    }
}

/// Forwarding wrapper so a test can keep a handle on an engine it hands to a `Model`.
pub struct SharedEngine(pub Arc<RecordingEngine>);

impl Engine for SharedEngine {
    fn hyperparameters(&self) -> &Hyperparameters {
        self.0.hyperparameters()
    }

    fn context(&self) -> Result<Box<dyn EvalContext + '_>> {
        self.0.context()
    }

    fn shares_cache(&self) -> bool {
        self.0.shares_cache()
    }
}

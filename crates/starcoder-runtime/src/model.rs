//! The loaded model shared by every request.

use std::sync::{Mutex, MutexGuard, PoisonError};

use starcoder_engine::{Engine, EvalContext, Hyperparameters, Result};
use starcoder_tokenizer::Vocabulary;

use crate::stop::StopPolicy;

/// Engine, vocabulary and stop policy, immutable after load.
///
/// Shared by `Arc` across requests. The only interior state is the lock that
/// serializes generations when the engine has a single cache region.
pub struct Model {
    engine: Box<dyn Engine>,
    vocab: Vocabulary,
    stop: StopPolicy,
    exclusive: Mutex<()>,
}

impl Model {
    pub fn new(engine: Box<dyn Engine>, vocab: Vocabulary, stop: StopPolicy) -> Self {
        Self {
            engine,
            vocab,
            stop,
            exclusive: Mutex::new(()),
        }
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        self.engine.hyperparameters()
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn stop_policy(&self) -> &StopPolicy {
        &self.stop
    }

    /// Open an evaluation session for one request.
    ///
    /// For shared-cache engines this blocks until no other session is alive.
    pub fn session(&self) -> Result<Session<'_>> {
        let guard = if self.engine.shares_cache() {
            Some(self.exclusive.lock().unwrap_or_else(PoisonError::into_inner))
        } else {
            None
        };
        let ctx = self.engine.context()?;
        Ok(Session { ctx, _guard: guard })
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("hparams", self.hyperparameters())
            .field("vocab_len", &self.vocab.len())
            .field("stop", &self.stop)
            .field("shares_cache", &self.engine.shares_cache())
            .finish()
    }
}

/// A request's evaluation context, plus the model lock when one is needed.
pub struct Session<'m> {
    // Declared first so the context is dropped before the lock is released.
    ctx: Box<dyn EvalContext + 'm>,
    _guard: Option<MutexGuard<'m, ()>>,
}

impl<'m> Session<'m> {
    pub fn context(&mut self) -> &mut dyn EvalContext {
        self.ctx.as_mut()
    }
}

//! Deterministic reference engine.
//!
//! A single-block GPT-BigCode-shaped network with seeded weights, sized from
//! a model's hyperparameters: learned token and position embeddings, layer
//! norm, multi-query causal attention over a per-context KV cache, GELU MLP,
//! and an output head tied to the token embeddings. It implements the
//! evaluation port exactly (positions, cache overwrite, context bounds) so
//! the rest of the stack runs end to end without a tensor backend.
//!
//! Token: embed(id) + pos(p) → LN → Q (n_heads) / K,V (1 head) → attend → proj
//! → residual → LN → fc → GELU → proj → residual → LN → · embeddingsᵀ → logits

use starcoder_engine::{Engine, EvalContext, Hyperparameters, Result, StarcoderError, TokenId};

use crate::error::ModelError;
use crate::kernels::{attention_mqa, gelu, layer_norm, linear, KernelResult};

/// Shape and seed of the reference network.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceConfig {
    pub d_model: usize,
    pub n_heads: usize,
    /// MLP hidden width.
    pub d_ff: usize,
    pub norm_eps: f32,
    pub seed: u64,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            d_model: 32,
            n_heads: 4,
            d_ff: 128,
            norm_eps: 1e-5,
            seed: 12345,
        }
    }
}

impl ReferenceConfig {
    pub fn with_d_model(mut self, d_model: usize) -> Self {
        self.d_model = d_model;
        self
    }

    pub fn with_n_heads(mut self, n_heads: usize) -> Self {
        self.n_heads = n_heads;
        self
    }

    pub fn with_d_ff(mut self, d_ff: usize) -> Self {
        self.d_ff = d_ff;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads
    }

    fn validate(&self) -> KernelResult<()> {
        if self.d_model == 0 || self.n_heads == 0 || self.d_ff == 0 {
            return Err(ModelError::InvalidConfig(
                "d_model, n_heads and d_ff must be non-zero".into(),
            ));
        }
        if self.d_model % self.n_heads != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "d_model {} is not divisible by n_heads {}",
                self.d_model, self.n_heads
            )));
        }
        Ok(())
    }
}

/// Seeded weight initializer (xorshift64), small symmetric values.
struct WeightRng {
    state: u64,
}

impl WeightRng {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        ((self.state >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 0.2
    }

    fn fill(&mut self, n: usize) -> Vec<f32> {
        (0..n).map(|_| self.next_f32()).collect()
    }
}

struct Norm {
    weight: Vec<f32>,
    bias: Vec<f32>,
}

impl Norm {
    fn identity(d: usize) -> Self {
        Self {
            weight: vec![1.0; d],
            bias: vec![0.0; d],
        }
    }
}

struct Weights {
    wte: Vec<f32>, // [n_vocab, d]
    wpe: Vec<f32>, // [n_ctx, d]
    ln_1: Norm,
    w_q: Vec<f32>,  // [d, d]
    w_kv: Vec<f32>, // [d, 2 * head_dim]
    w_o: Vec<f32>,  // [d, d]
    ln_2: Norm,
    w_fc: Vec<f32>,   // [d, d_ff]
    w_proj: Vec<f32>, // [d_ff, d]
    ln_f: Norm,
    b_d: Vec<f32>,
    b_kv: Vec<f32>,
    b_ff: Vec<f32>,
}

/// Engine backed by the reference network.
pub struct ReferenceEngine {
    hparams: Hyperparameters,
    config: ReferenceConfig,
    weights: Weights,
}

impl ReferenceEngine {
    /// Build the network for `hparams` (vocabulary and context sizes are
    /// taken from there; the width comes from `config`).
    pub fn new(
        hparams: Hyperparameters,
        config: ReferenceConfig,
    ) -> std::result::Result<Self, ModelError> {
        config.validate()?;
        if hparams.n_vocab == 0 || hparams.n_ctx == 0 {
            return Err(ModelError::InvalidConfig(
                "n_vocab and n_ctx must be non-zero".into(),
            ));
        }

        let d = config.d_model;
        let kv = 2 * config.head_dim();
        let mut rng = WeightRng::new(config.seed);
        let weights = Weights {
            wte: rng.fill(hparams.n_vocab * d),
            wpe: rng.fill(hparams.n_ctx * d),
            ln_1: Norm::identity(d),
            w_q: rng.fill(d * d),
            w_kv: rng.fill(d * kv),
            w_o: rng.fill(d * d),
            ln_2: Norm::identity(d),
            w_fc: rng.fill(d * config.d_ff),
            w_proj: rng.fill(config.d_ff * d),
            ln_f: Norm::identity(d),
            b_d: vec![0.0; d],
            b_kv: vec![0.0; kv],
            b_ff: vec![0.0; config.d_ff],
        };

        tracing::debug!(
            d_model = d,
            n_heads = config.n_heads,
            n_vocab = hparams.n_vocab,
            n_ctx = hparams.n_ctx,
            "built reference engine"
        );
        Ok(Self {
            hparams,
            config,
            weights,
        })
    }

    /// Build the default network for a model being loaded at startup.
    ///
    /// Failing here means the model cannot be served, so it is a `LoadFailure`.
    pub fn for_model(hparams: Hyperparameters) -> Result<Self> {
        Self::new(hparams, ReferenceConfig::default())
            .map_err(|err| StarcoderError::LoadFailure(err.to_string()))
    }

    pub fn config(&self) -> &ReferenceConfig {
        &self.config
    }

    /// Forward one token at `pos`, writing its K/V into the cache and
    /// attending over `0..=pos`.
    fn forward_token(
        &self,
        cache: &mut KvCache,
        token: TokenId,
        pos: usize,
    ) -> KernelResult<Vec<f32>> {
        let c = &self.config;
        let w = &self.weights;
        let d = c.d_model;
        let hd = c.head_dim();

        let id = usize::try_from(token)
            .ok()
            .filter(|&id| id < self.hparams.n_vocab)
            .ok_or(ModelError::TokenOutOfRange {
                token,
                n_vocab: self.hparams.n_vocab,
            })?;

        let x: Vec<f32> = w.wte[id * d..(id + 1) * d]
            .iter()
            .zip(&w.wpe[pos * d..(pos + 1) * d])
            .map(|(e, p)| e + p)
            .collect();

        let h = layer_norm(&x, &w.ln_1.weight, &w.ln_1.bias, c.norm_eps)?;
        let q = linear(&h, &w.w_q, &w.b_d, d, d)?;
        let kv = linear(&h, &w.w_kv, &w.b_kv, d, 2 * hd)?;
        cache.write(pos, &kv[..hd], &kv[hd..]);

        let seq_len = pos + 1;
        let attn = attention_mqa(
            &q,
            &cache.keys[..seq_len * hd],
            &cache.values[..seq_len * hd],
            seq_len,
            c.n_heads,
            hd,
        )?;
        let attn = linear(&attn, &w.w_o, &w.b_d, d, d)?;
        let x: Vec<f32> = x.iter().zip(&attn).map(|(a, b)| a + b).collect();

        let h = layer_norm(&x, &w.ln_2.weight, &w.ln_2.bias, c.norm_eps)?;
        let mut ff = linear(&h, &w.w_fc, &w.b_ff, d, c.d_ff)?;
        ff.iter_mut().for_each(|v| *v = gelu(*v));
        let ff = linear(&ff, &w.w_proj, &w.b_d, c.d_ff, d)?;
        let x: Vec<f32> = x.iter().zip(&ff).map(|(a, b)| a + b).collect();

        let h = layer_norm(&x, &w.ln_f.weight, &w.ln_f.bias, c.norm_eps)?;
        Ok(w.wte
            .chunks_exact(d)
            .map(|row| row.iter().zip(&h).map(|(a, b)| a * b).sum())
            .collect())
    }
}

impl Engine for ReferenceEngine {
    fn hyperparameters(&self) -> &Hyperparameters {
        &self.hparams
    }

    fn context(&self) -> Result<Box<dyn EvalContext + '_>> {
        Ok(Box::new(ReferenceContext {
            engine: self,
            cache: KvCache::new(self.hparams.n_ctx, self.config.head_dim()),
        }))
    }
}

impl std::fmt::Debug for ReferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceEngine")
            .field("hparams", &self.hparams)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Single-head key/value cache, `[n_ctx, head_dim]` each.
struct KvCache {
    keys: Vec<f32>,
    values: Vec<f32>,
    head_dim: usize,
    /// Number of valid positions.
    len: usize,
}

impl KvCache {
    fn new(n_ctx: usize, head_dim: usize) -> Self {
        Self {
            keys: vec![0.0; n_ctx * head_dim],
            values: vec![0.0; n_ctx * head_dim],
            head_dim,
            len: 0,
        }
    }

    fn write(&mut self, pos: usize, k: &[f32], v: &[f32]) {
        let at = pos * self.head_dim..(pos + 1) * self.head_dim;
        self.keys[at.clone()].copy_from_slice(k);
        self.values[at].copy_from_slice(v);
        self.len = pos + 1;
    }
}

struct ReferenceContext<'e> {
    engine: &'e ReferenceEngine,
    cache: KvCache,
}

impl EvalContext for ReferenceContext<'_> {
    fn evaluate(&mut self, position: usize, tokens: &[TokenId]) -> Result<Vec<f32>> {
        let n_ctx = self.engine.hparams.n_ctx;
        if tokens.is_empty() || position + tokens.len() > n_ctx {
            return Err(ModelError::ContextOverflow {
                position,
                batch: tokens.len(),
                n_ctx,
            }
            .into());
        }
        if position > self.cache.len {
            return Err(ModelError::PositionGap {
                position,
                cached: self.cache.len,
            }
            .into());
        }

        let mut logits = Vec::new();
        for (i, &token) in tokens.iter().enumerate() {
            logits = self.engine.forward_token(&mut self.cache, token, position + i)?;
        }
        Ok(logits)
    }
}

//! # starcoder-sampling
//!
//! Next-token selection for starcoder.rs.
//!
//! One strategy, applied in a fixed order so a fixed seed always reproduces
//! the same token:
//! 1. Temperature scaling
//! 2. Top-k selection (ties broken by lowest id)
//! 3. Numerically stable softmax over the survivors
//! 4. Top-p (nucleus) truncation, keeping at least one candidate
//! 5. Renormalization and a draw from a deterministic seeded RNG

use std::cmp::Ordering;

use starcoder_engine::StarcoderError;

/// Sampling error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SamplingError {
    #[error("Invalid logits array")]
    InvalidLogits,
    #[error("Temperature must be > 0")]
    InvalidTemperature,
    #[error("top_k must be >= 1")]
    InvalidTopK,
    #[error("top_p must be in (0, 1]")]
    InvalidTopP,
}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

impl From<SamplingError> for StarcoderError {
    fn from(err: SamplingError) -> Self {
        match err {
            SamplingError::InvalidLogits => StarcoderError::EngineFailure(err.to_string()),
            _ => StarcoderError::InvalidInput(err.to_string()),
        }
    }
}

/// Deterministic RNG for reproducible sampling.
///
/// Uses a simple xorshift64 algorithm for fast, reproducible random numbers.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Avoid zero state which would produce all zeros
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Generate next random float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        // xorshift64
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Mix a base seed with a stream index (splitmix64), giving well-separated
/// seeds for consecutive requests.
pub fn derive_seed(base: u64, stream: u64) -> u64 {
    let mut z = base.wrapping_add(stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// A candidate token and its weight (scaled logit, then probability).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    id: usize,
    weight: f32,
}

/// Descending by weight, ascending by id on ties.
fn by_weight_then_id(a: &Candidate, b: &Candidate) -> Ordering {
    b.weight
        .partial_cmp(&a.weight)
        .unwrap_or(Ordering::Equal)
        .then(a.id.cmp(&b.id))
}

/// Sampling configuration plus the request's random stream.
#[derive(Debug, Clone)]
pub struct Sampler {
    /// Temperature for softmax scaling. > 1.0 = more random, < 1.0 = more deterministic.
    pub temperature: f32,

    /// Top-k: only sample from the k highest logits.
    pub top_k: usize,

    /// Top-p (nucleus sampling): smallest prefix with cumulative prob >= p.
    pub top_p: f32,

    /// RNG state for reproducible sampling. Mutated on each call.
    rng: SeededRng,
}

impl Sampler {
    /// Sampler with the request defaults (`top_k` 40, `top_p` 0.9, `temp` 0.9).
    pub fn new() -> Self {
        Self {
            temperature: 0.9,
            top_k: 40,
            top_p: 0.9,
            rng: SeededRng::new(42),
        }
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_top_p(mut self, p: f32) -> Self {
        self.top_p = p;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SeededRng::new(seed);
        self
    }

    /// Check the configuration without drawing.
    pub fn validate(&self) -> SamplingResult<()> {
        if self.temperature.is_nan() || self.temperature <= 0.0 {
            return Err(SamplingError::InvalidTemperature);
        }
        if self.top_k == 0 {
            return Err(SamplingError::InvalidTopK);
        }
        if self.top_p.is_nan() || self.top_p <= 0.0 || self.top_p > 1.0 {
            return Err(SamplingError::InvalidTopP);
        }
        Ok(())
    }

    /// Sample a token index from logits.
    ///
    /// Degenerate logits (all equal, NaN) still yield a valid index.
    pub fn sample(&mut self, logits: &[f32]) -> SamplingResult<usize> {
        if logits.is_empty() {
            return Err(SamplingError::InvalidLogits);
        }
        self.validate()?;

        let scaled = Self::apply_temperature(logits, self.temperature);
        let mut candidates = Self::apply_top_k(scaled, self.top_k);
        Self::softmax(&mut candidates);
        Self::apply_top_p(&mut candidates, self.top_p);
        Self::renormalize(&mut candidates);

        Ok(self.sample_from_distribution(&candidates))
    }

    /// Scale logits by `1 / temperature`. NaN ranks below every real logit.
    fn apply_temperature(logits: &[f32], temperature: f32) -> Vec<Candidate> {
        logits
            .iter()
            .enumerate()
            .map(|(id, &l)| Candidate {
                id,
                weight: if l.is_nan() {
                    f32::NEG_INFINITY
                } else {
                    l / temperature
                },
            })
            .collect()
    }

    /// Keep the `k` largest, ordered descending with lowest id first on ties.
    ///
    /// Partitions around the k-th candidate first, so only the survivors are sorted.
    fn apply_top_k(mut candidates: Vec<Candidate>, k: usize) -> Vec<Candidate> {
        let k = k.max(1);
        if k < candidates.len() {
            candidates.select_nth_unstable_by(k - 1, by_weight_then_id);
            candidates.truncate(k);
        }
        candidates.sort_by(by_weight_then_id);
        candidates
    }

    /// In-place softmax over candidate weights, subtracting the max first.
    fn softmax(candidates: &mut [Candidate]) {
        let max = candidates
            .iter()
            .map(|c| c.weight)
            .fold(f32::NEG_INFINITY, f32::max);

        if !max.is_finite() {
            // All -inf (or +inf): treat the tied maxima as equally likely.
            let tied = candidates.iter().filter(|c| c.weight == max).count().max(1);
            for c in candidates.iter_mut() {
                c.weight = if c.weight == max { 1.0 / tied as f32 } else { 0.0 };
            }
            return;
        }

        let mut sum = 0.0;
        for c in candidates.iter_mut() {
            c.weight = (c.weight - max).exp();
            sum += c.weight;
        }
        for c in candidates.iter_mut() {
            c.weight /= sum;
        }
    }

    /// Truncate to the shortest prefix whose cumulative probability reaches `p`.
    fn apply_top_p(candidates: &mut Vec<Candidate>, p: f32) {
        if p >= 1.0 {
            return;
        }
        candidates.sort_by(by_weight_then_id);

        let mut cumsum = 0.0;
        let mut keep = candidates.len();
        for (idx, c) in candidates.iter().enumerate() {
            cumsum += c.weight;
            if cumsum >= p {
                keep = idx + 1;
                break;
            }
        }
        candidates.truncate(keep.max(1));
    }

    /// Drop zero-probability candidates and rescale the rest to sum to 1.
    fn renormalize(candidates: &mut Vec<Candidate>) {
        if candidates.iter().any(|c| c.weight > 0.0) {
            candidates.retain(|c| c.weight > 0.0);
        }
        let sum: f32 = candidates.iter().map(|c| c.weight).sum();
        if sum > 0.0 {
            for c in candidates.iter_mut() {
                c.weight /= sum;
            }
        } else {
            let uniform = 1.0 / candidates.len() as f32;
            for c in candidates.iter_mut() {
                c.weight = uniform;
            }
        }
    }

    fn sample_from_distribution(&mut self, candidates: &[Candidate]) -> usize {
        let r = self.rng.next_f32();
        let mut cumsum = 0.0;

        for c in candidates {
            cumsum += c.weight;
            if r < cumsum {
                return c.id;
            }
        }

        // Rounding left the cumulative sum just under r: take the last survivor.
        candidates.last().map(|c| c.id).unwrap_or(0)
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

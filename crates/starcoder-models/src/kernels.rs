//! Scalar f32 kernels for the reference forward pass.
//!
//! Matrices are row-major `[in_dim, out_dim]`, vectors are plain slices.

use crate::error::ModelError;

pub type KernelResult<T> = std::result::Result<T, ModelError>;

fn check_len(what: &str, got: usize, want: usize) -> KernelResult<()> {
    if got != want {
        return Err(ModelError::ShapeMismatch(format!(
            "{what}: expected {want} values, got {got}"
        )));
    }
    Ok(())
}

/// Layer normalization: `(x - mean) / sqrt(var + eps) * weight + bias`.
pub fn layer_norm(x: &[f32], weight: &[f32], bias: &[f32], eps: f32) -> KernelResult<Vec<f32>> {
    check_len("layer_norm weight", weight.len(), x.len())?;
    check_len("layer_norm bias", bias.len(), x.len())?;
    if x.is_empty() {
        return Ok(Vec::new());
    }

    let n = x.len() as f32;
    let mean = x.iter().sum::<f32>() / n;
    let var = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let inv_std = 1.0 / (var + eps).sqrt();

    Ok(x.iter()
        .zip(weight.iter().zip(bias))
        .map(|(v, (w, b))| (v - mean) * inv_std * w + b)
        .collect())
}

/// GELU, tanh approximation (as in GPT-2).
pub fn gelu(x: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + 0.044_715 * x * x * x)).tanh())
}

/// `x @ W + b` where `W` is `[in_dim, out_dim]`.
pub fn linear(
    x: &[f32],
    w: &[f32],
    b: &[f32],
    in_dim: usize,
    out_dim: usize,
) -> KernelResult<Vec<f32>> {
    check_len("linear input", x.len(), in_dim)?;
    check_len("linear weight", w.len(), in_dim * out_dim)?;
    check_len("linear bias", b.len(), out_dim)?;

    let mut out = b.to_vec();
    for (j, &xj) in x.iter().enumerate() {
        let row = &w[j * out_dim..(j + 1) * out_dim];
        for (o, &wij) in out.iter_mut().zip(row) {
            *o += xj * wij;
        }
    }
    Ok(out)
}

/// Multi-query causal attention for one query position.
///
/// `q` is `[n_heads, head_dim]`; every head attends over the single shared
/// key/value head, `keys` and `values` being `[seq_len, head_dim]`.
pub fn attention_mqa(
    q: &[f32],
    keys: &[f32],
    values: &[f32],
    seq_len: usize,
    n_heads: usize,
    head_dim: usize,
) -> KernelResult<Vec<f32>> {
    check_len("attention query", q.len(), n_heads * head_dim)?;
    check_len("attention keys", keys.len(), seq_len * head_dim)?;
    check_len("attention values", values.len(), seq_len * head_dim)?;
    if seq_len == 0 {
        return Err(ModelError::ShapeMismatch("attention over an empty cache".into()));
    }

    let scale = 1.0 / (head_dim as f32).sqrt();
    let mut out = vec![0.0; n_heads * head_dim];
    let mut scores = vec![0.0; seq_len];

    for h in 0..n_heads {
        let qh = &q[h * head_dim..(h + 1) * head_dim];

        let mut max = f32::NEG_INFINITY;
        for (t, s) in scores.iter_mut().enumerate() {
            let kt = &keys[t * head_dim..(t + 1) * head_dim];
            *s = qh.iter().zip(kt).map(|(a, b)| a * b).sum::<f32>() * scale;
            max = max.max(*s);
        }

        let mut sum = 0.0;
        for s in scores.iter_mut() {
            *s = (*s - max).exp();
            sum += *s;
        }

        let oh = &mut out[h * head_dim..(h + 1) * head_dim];
        for (t, s) in scores.iter().enumerate() {
            let weight = s / sum;
            let vt = &values[t * head_dim..(t + 1) * head_dim];
            for (o, v) in oh.iter_mut().zip(vt) {
                *o += weight * v;
            }
        }
    }

    Ok(out)
}

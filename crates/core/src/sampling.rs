//! Token selection for autoregressive decoding.

use anyhow::{ensure, Context, Result};
use candle_core::{DType, Tensor};
use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
    SeedableRng,
};

/// Decoding knobs shared by greedy and sampled generation.
#[derive(Debug, Clone)]
pub struct DecodeParameters {
    pub do_sample: bool,
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub repetition_penalty: f32,
    pub seed: Option<u64>,
}

impl Default for DecodeParameters {
    fn default() -> Self {
        Self {
            do_sample: false,
            temperature: 0.0,
            top_p: None,
            top_k: None,
            repetition_penalty: 1.0,
            seed: None,
        }
    }
}

/// Create a deterministic RNG when a seed is provided.
pub fn init_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(value) => StdRng::seed_from_u64(value),
        None => StdRng::from_entropy(),
    }
}

/// Select the next token id from a 1-D logits tensor.
pub fn select_token_id(
    logits: &Tensor,
    params: &DecodeParameters,
    context: &[i64],
    rng: &mut StdRng,
) -> Result<i64> {
    let mut logits = logits
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()
        .context("failed to extract logits for token selection")?;
    ensure!(!logits.is_empty(), "logits tensor is empty");

    apply_repetition_penalty(&mut logits, context, params.repetition_penalty);

    if params.do_sample && params.temperature > 0.0 {
        let mut scaled: Vec<f64> = logits
            .iter()
            .map(|&v| v as f64 / params.temperature)
            .collect();
        if let Some(k) = params.top_k {
            if k > 0 && k < scaled.len() {
                mask_below_top_k(&mut scaled, k);
            }
        }
        if let Some(top_p) = params.top_p {
            if (0.0..1.0).contains(&top_p) {
                mask_nucleus(&mut scaled, top_p);
            }
        }
        if let Some(sampled) = sample_index(&scaled, rng) {
            return Ok(sampled as i64);
        }
    }

    let best = logits
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(index, _)| index)
        .context("no finite logit to select")?;
    Ok(best as i64)
}

fn apply_repetition_penalty(logits: &mut [f32], context: &[i64], penalty: f32) {
    if penalty == 1.0 || penalty <= 0.0 {
        return;
    }
    for &token in context {
        let Ok(index) = usize::try_from(token) else {
            continue;
        };
        if let Some(value) = logits.get_mut(index) {
            *value = if *value > 0.0 {
                *value / penalty
            } else {
                *value * penalty
            };
        }
    }
}

fn mask_below_top_k(logits: &mut [f64], k: usize) {
    let mut sorted: Vec<f64> = logits.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let threshold = sorted[k - 1];
    for value in logits.iter_mut() {
        if *value < threshold {
            *value = f64::NEG_INFINITY;
        }
    }
}

fn mask_nucleus(logits: &mut [f64], top_p: f64) {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return;
    }
    let mut indexed: Vec<(usize, f64)> = logits
        .iter()
        .enumerate()
        .map(|(i, &l)| (i, (l - max).exp()))
        .collect();
    let total: f64 = indexed.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return;
    }
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut cumulative = 0.0;
    let mut keep = vec![false; logits.len()];
    for (index, weight) in indexed {
        if cumulative / total >= top_p {
            break;
        }
        cumulative += weight;
        keep[index] = true;
    }
    for (index, value) in logits.iter_mut().enumerate() {
        if !keep[index] {
            *value = f64::NEG_INFINITY;
        }
    }
}

fn sample_index(logits: &[f64], rng: &mut StdRng) -> Option<usize> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return None;
    }
    let weights: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let dist = WeightedIndex::new(&weights).ok()?;
    Some(dist.sample(rng))
}

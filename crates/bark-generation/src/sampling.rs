//! Sampling strategies for token generation.
//!
//! Filters run on raw logits in a fixed order: nucleus (top-p) first, then
//! top-k, then temperature scaling and a multinomial draw.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use bark_core::{BarkError, BarkResult};

/// Sampling configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    /// Temperature for scaling logits (`<= 0` = argmax).
    pub temperature: f32,
    /// Keep only the `k` largest logits.
    pub top_k: Option<usize>,
    /// Keep the smallest prefix of sorted tokens whose mass reaches `p`.
    pub top_p: Option<f32>,
    /// Random seed (None = random).
    pub seed: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: None,
            top_p: None,
            seed: None,
        }
    }
}

impl SamplingConfig {
    /// Create greedy sampling configuration (argmax, no randomness).
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            seed: Some(0),
            ..Default::default()
        }
    }

    /// Per-stage parameters without a seed.
    pub fn stage(temperature: f32, top_k: Option<usize>, top_p: Option<f32>) -> Self {
        Self {
            temperature,
            top_k,
            top_p,
            seed: None,
        }
    }
}

/// A drawn token together with the distribution it was drawn from.
#[derive(Debug, Clone)]
pub struct Sample {
    pub token: usize,
    pub probs: Vec<f32>,
}

/// Token sampler for autoregressive generation.
///
/// The random state lives in the sampler and carries over between stages,
/// so one seeded sampler reproduces a whole pipeline run.
#[derive(Debug)]
pub struct Sampler {
    config: SamplingConfig,
    rng: StdRng,
}

impl Sampler {
    /// Create a new sampler with the given configuration.
    pub fn new(config: SamplingConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    /// Create a sampler with default parameters and an optional seed.
    pub fn seeded(seed: Option<u64>) -> Self {
        Self::new(SamplingConfig {
            seed,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Sample with the sampler's own parameters.
    pub fn sample(&mut self, logits: &[f32]) -> BarkResult<Sample> {
        let params = self.config.clone();
        self.sample_with(logits, &params)
    }

    /// Sample with explicit parameters; `params.seed` is ignored.
    pub fn sample_with(&mut self, logits: &[f32], params: &SamplingConfig) -> BarkResult<Sample> {
        if logits.is_empty() {
            return Err(BarkError::inference("cannot sample from empty logits"));
        }

        let mut logits = logits.to_vec();
        if let Some(p) = params.top_p {
            apply_top_p(&mut logits, p);
        }
        if let Some(k) = params.top_k {
            apply_top_k(&mut logits, k);
        }

        if params.temperature <= 0.0 {
            let token = argmax(&logits);
            let mut probs = vec![0.0; logits.len()];
            probs[token] = 1.0;
            return Ok(Sample { token, probs });
        }

        let scaled: Vec<f32> = logits.iter().map(|&x| x / params.temperature).collect();
        let probs = softmax(&scaled);
        let dist = WeightedIndex::new(&probs)
            .map_err(|e| BarkError::inference(format!("degenerate sampling distribution: {e}")))?;
        let token = dist.sample(&mut self.rng);
        Ok(Sample { token, probs })
    }

    /// Greedy decoding (argmax).
    pub fn greedy(&self, logits: &[f32]) -> usize {
        argmax(logits)
    }
}

/// Mask everything outside the nucleus of mass `p` with `-inf`.
///
/// The most likely token always survives, so `p = 0` is greedy.
pub fn apply_top_p(logits: &mut [f32], p: f32) {
    let mut order: Vec<usize> = (0..logits.len()).collect();
    order.sort_by(|&a, &b| logits[b].total_cmp(&logits[a]));

    let sorted: Vec<f32> = order.iter().map(|&i| logits[i]).collect();
    let probs = softmax(&sorted);

    // removal is shifted right by one: entry i goes when the mass before it exceeds p
    let mut cumulative = 0.0f32;
    let mut remove = Vec::with_capacity(order.len());
    for prob in probs {
        remove.push(cumulative > p);
        cumulative += prob;
    }
    for (&idx, removed) in order.iter().zip(remove) {
        if removed {
            logits[idx] = f32::NEG_INFINITY;
        }
    }
}

/// Mask every logit strictly below the `k`-th largest with `-inf`.
pub fn apply_top_k(logits: &mut [f32], k: usize) {
    if k == 0 || logits.is_empty() {
        return;
    }
    let k = k.min(logits.len());
    let mut sorted = logits.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let threshold = sorted[k - 1];
    for x in logits.iter_mut() {
        if *x < threshold {
            *x = f32::NEG_INFINITY;
        }
    }
}

/// Index of the largest value (first on ties).
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_v), (i, &v)| {
            if v > best_v {
                (i, v)
            } else {
                (best, best_v)
            }
        })
        .0
}

/// Compute softmax of a slice of values.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }

    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![1.0 / logits.len() as f32; logits.len()];
    }
    let exp: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exp.iter().sum();

    if sum > 0.0 {
        exp.iter().map(|&x| x / sum).collect()
    } else {
        vec![1.0 / logits.len() as f32; logits.len()]
    }
}

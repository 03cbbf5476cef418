//! Deterministic stand-ins for the pretrained GPT models.
//!
//! Logits are a pure function of the sequence position and the previous
//! token, so runs with and without cache reuse produce identical output.

use candle_core::Device;

use bark_core::constants::{CODEBOOK_SIZE, FINE_CONTEXT_LEN, SEMANTIC_PAD_TOKEN};
use bark_core::{BarkError, BarkResult, CausalLm, CodebookMatrix, DevicePlaced, FineLm, KvCache};

/// Output vocabulary of the text-to-semantic model.
pub const SEMANTIC_OUTPUT_VOCAB: usize = 10_048;

/// Output vocabulary of the coarse model.
pub const COARSE_OUTPUT_VOCAB: usize = 12_096;

/// Output vocabulary of the fine model.
pub const FINE_OUTPUT_VOCAB: usize = 1_056;

fn mix(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^ (x >> 33)
}

/// Pseudo-random logit in `[-4, 4)`.
fn logit(seed: u64, a: u64, b: u64, idx: u64) -> f32 {
    let h = mix(seed ^ mix(a ^ mix(b ^ mix(idx))));
    (h >> 40) as f32 / (1u64 << 24) as f32 * 8.0 - 4.0
}

/// Mock causal LM for the semantic and coarse stages.
#[derive(Debug, Clone)]
pub struct MockCausalLm {
    vocab_size: usize,
    seed: u64,
    eos_slot: Option<usize>,
    eos_after: Option<usize>,
    device: Device,
    calls: usize,
    moves: usize,
}

impl MockCausalLm {
    /// Create a mock with the given output vocabulary.
    pub fn new(vocab_size: usize, seed: u64) -> Self {
        Self {
            vocab_size,
            seed,
            eos_slot: None,
            eos_after: None,
            device: Device::Cpu,
            calls: 0,
            moves: 0,
        }
    }

    /// Mock text-to-semantic model; it never ends a sequence unless told to.
    pub fn semantic(seed: u64) -> Self {
        Self {
            eos_slot: Some(SEMANTIC_PAD_TOKEN as usize),
            ..Self::new(SEMANTIC_OUTPUT_VOCAB, seed)
        }
    }

    /// Mock semantic-to-coarse model.
    pub fn coarse(seed: u64) -> Self {
        Self::new(COARSE_OUTPUT_VOCAB, seed)
    }

    /// Make the end-of-sequence slot dominant once `n` tokens follow the prompt.
    pub fn with_eos_after(mut self, prompt_len: usize, n: usize) -> Self {
        self.eos_after = Some(prompt_len + n);
        self
    }

    /// Number of forward calls so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Number of device moves so far.
    pub fn moves(&self) -> usize {
        self.moves
    }
}

impl DevicePlaced for MockCausalLm {
    fn device(&self) -> Device {
        self.device.clone()
    }

    fn to_device(&mut self, device: &Device) -> BarkResult<()> {
        self.device = device.clone();
        self.moves += 1;
        Ok(())
    }
}

impl CausalLm for MockCausalLm {
    fn forward(&mut self, input: &[u32], cache: Option<&mut KvCache>) -> BarkResult<Vec<f32>> {
        let last = *input
            .last()
            .ok_or_else(|| BarkError::inference("empty input to causal model"))?;
        let position = match cache {
            Some(cache) => {
                cache.advance(input.len());
                cache.positions()
            }
            None => input.len(),
        };
        self.calls += 1;

        let mut logits: Vec<f32> = (0..self.vocab_size)
            .map(|i| logit(self.seed, position as u64, last as u64, i as u64))
            .collect();
        if let Some(slot) = self.eos_slot.and_then(|i| logits.get_mut(i)) {
            *slot = if self.eos_after.is_some_and(|n| position >= n) {
                100.0
            } else {
                -100.0
            };
        }
        Ok(logits)
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

/// Mock non-causal fine model.
#[derive(Debug, Clone)]
pub struct MockFineLm {
    seed: u64,
    device: Device,
    calls: usize,
}

impl MockFineLm {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            device: Device::Cpu,
            calls: 0,
        }
    }

    /// Number of forward calls so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl DevicePlaced for MockFineLm {
    fn device(&self) -> Device {
        self.device.clone()
    }

    fn to_device(&mut self, device: &Device) -> BarkResult<()> {
        self.device = device.clone();
        Ok(())
    }
}

impl FineLm for MockFineLm {
    fn forward(&mut self, codebook: usize, buffer: &CodebookMatrix) -> BarkResult<Vec<Vec<f32>>> {
        if buffer.frames() != FINE_CONTEXT_LEN {
            return Err(BarkError::inference(format!(
                "fine buffer must have {FINE_CONTEXT_LEN} frames, got {}",
                buffer.frames()
            )));
        }
        self.calls += 1;
        let out = (0..buffer.frames())
            .map(|t| {
                let anchor = buffer.get(0, t) as u64;
                (0..FINE_OUTPUT_VOCAB)
                    .map(|i| {
                        // keep the placeholder column unattractive
                        if i >= CODEBOOK_SIZE {
                            -10.0
                        } else {
                            logit(self.seed, codebook as u64, anchor, i as u64)
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(out)
    }
}

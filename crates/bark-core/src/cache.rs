//! Key/value cache handed to causal models when cache reuse is enabled.
//!
//! The decoders own the cache for the duration of one loop (or one coarse
//! window) and pass it back on every step; the model appends to it and
//! only needs the newest token as input once it is non-empty.

use candle_core::{Result, Tensor};

/// Cached keys and values of a single attention layer.
#[derive(Debug, Clone, Default)]
pub struct LayerKvCache {
    k: Option<Tensor>,
    v: Option<Tensor>,
}

impl LayerKvCache {
    /// Append new K, V tokens along the sequence axis.
    ///
    /// Shapes are `[batch, heads, seq_len, head_dim]`.
    pub fn append(&mut self, k: &Tensor, v: &Tensor) -> Result<()> {
        self.k = Some(match self.k.take() {
            Some(prev) => Tensor::cat(&[&prev, k], 2)?,
            None => k.clone(),
        });
        self.v = Some(match self.v.take() {
            Some(prev) => Tensor::cat(&[&prev, v], 2)?,
            None => v.clone(),
        });
        Ok(())
    }

    /// Cached keys, if any.
    pub fn keys(&self) -> Option<&Tensor> {
        self.k.as_ref()
    }

    /// Cached values, if any.
    pub fn values(&self) -> Option<&Tensor> {
        self.v.as_ref()
    }

    /// Cached sequence length.
    pub fn seq_len(&self) -> usize {
        self.k.as_ref().and_then(|k| k.dim(2).ok()).unwrap_or(0)
    }
}

/// Per-model cache: one entry per layer plus the number of positions consumed.
#[derive(Debug, Clone, Default)]
pub struct KvCache {
    layers: Vec<LayerKvCache>,
    positions: usize,
}

impl KvCache {
    /// Create an empty cache for `num_layers` layers.
    pub fn new(num_layers: usize) -> Self {
        Self {
            layers: vec![LayerKvCache::default(); num_layers],
            positions: 0,
        }
    }

    /// Mutable access to a layer's cache, growing the layer list as needed.
    pub fn layer_mut(&mut self, idx: usize) -> &mut LayerKvCache {
        if idx >= self.layers.len() {
            self.layers.resize_with(idx + 1, LayerKvCache::default);
        }
        &mut self.layers[idx]
    }

    /// Record that the model consumed `n` more positions.
    pub fn advance(&mut self, n: usize) {
        self.positions += n;
    }

    /// Number of positions consumed so far.
    pub fn positions(&self) -> usize {
        self.positions
    }

    /// Check if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.positions == 0
    }

    /// Drop all cached state.
    pub fn clear(&mut self) {
        self.layers.clear();
        self.positions = 0;
    }
}

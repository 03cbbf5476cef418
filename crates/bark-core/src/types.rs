//! Token containers and audio types passed between pipeline stages.

use serde::{Deserialize, Serialize};

use crate::constants::{CODEBOOK_SIZE, N_COARSE_CODEBOOKS, N_FINE_CODEBOOKS, SEMANTIC_VOCAB_SIZE};
use crate::error::{BarkError, BarkResult};

/// 1-D sequence of semantic tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticTokens(pub Vec<u32>);

impl SemanticTokens {
    /// Wrap raw token ids.
    pub fn new(ids: Vec<u32>) -> Self {
        Self(ids)
    }

    /// Get the token ids.
    pub fn ids(&self) -> &[u32] {
        &self.0
    }

    /// Get the number of tokens.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the raw ids.
    pub fn into_inner(self) -> Vec<u32> {
        self.0
    }

    /// Check that the sequence is non-empty and within the semantic vocabulary.
    pub fn validate(&self, what: &str) -> BarkResult<()> {
        if self.0.is_empty() {
            return Err(BarkError::invalid_input(format!("{what} is empty")));
        }
        if let Some(&bad) = self.0.iter().find(|&&t| t as usize >= SEMANTIC_VOCAB_SIZE) {
            return Err(BarkError::invalid_input(format!(
                "{what} contains token {bad}, outside [0, {SEMANTIC_VOCAB_SIZE})"
            )));
        }
        Ok(())
    }
}

impl From<Vec<u32>> for SemanticTokens {
    fn from(ids: Vec<u32>) -> Self {
        Self(ids)
    }
}

/// Row-major `(rows, frames)` matrix of codebook tokens.
///
/// Each row is one codebook's token stream over time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCodebookMatrix")]
pub struct CodebookMatrix {
    rows: usize,
    frames: usize,
    data: Vec<u32>,
}

/// Unchecked wire form; deserializing goes through [`CodebookMatrix::from_flat`].
#[derive(Deserialize)]
struct RawCodebookMatrix {
    rows: usize,
    frames: usize,
    data: Vec<u32>,
}

impl TryFrom<RawCodebookMatrix> for CodebookMatrix {
    type Error = BarkError;

    fn try_from(raw: RawCodebookMatrix) -> BarkResult<Self> {
        Self::from_flat(raw.rows, raw.frames, raw.data)
    }
}

impl CodebookMatrix {
    /// Create a matrix with every entry set to `value`.
    pub fn filled(rows: usize, frames: usize, value: u32) -> Self {
        Self {
            rows,
            frames,
            data: vec![value; rows * frames],
        }
    }

    /// Build from row-major data.
    pub fn from_flat(rows: usize, frames: usize, data: Vec<u32>) -> BarkResult<Self> {
        if data.len() != rows * frames {
            return Err(BarkError::invalid_input(format!(
                "expected {} values for a {rows}x{frames} matrix, got {}",
                rows * frames,
                data.len()
            )));
        }
        Ok(Self { rows, frames, data })
    }

    /// Build from a list of equally long rows.
    pub fn from_rows(rows: Vec<Vec<u32>>) -> BarkResult<Self> {
        let frames = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != frames) {
            return Err(BarkError::invalid_input("ragged codebook rows"));
        }
        let n_rows = rows.len();
        let data = rows.into_iter().flatten().collect();
        Ok(Self {
            rows: n_rows,
            frames,
            data,
        })
    }

    /// Rebuild from frame-major interleaved values `[c0t0, c1t0, .., c0t1, ..]`.
    pub fn from_interleaved(rows: usize, values: &[u32]) -> BarkResult<Self> {
        if rows == 0 || values.len() % rows != 0 {
            return Err(BarkError::invalid_input(format!(
                "{} interleaved values do not divide into {rows} codebooks",
                values.len()
            )));
        }
        let frames = values.len() / rows;
        let mut out = Self::filled(rows, frames, 0);
        for (i, &v) in values.iter().enumerate() {
            out.set(i % rows, i / rows, v);
        }
        Ok(out)
    }

    /// Number of codebooks.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of time frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Shape as `(rows, frames)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.frames)
    }

    /// Row-major backing slice.
    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }

    /// One codebook's stream.
    pub fn row(&self, r: usize) -> &[u32] {
        &self.data[r * self.frames..(r + 1) * self.frames]
    }

    /// Mutable access to one codebook's stream.
    pub fn row_mut(&mut self, r: usize) -> &mut [u32] {
        &mut self.data[r * self.frames..(r + 1) * self.frames]
    }

    /// Value at `(row, frame)`.
    pub fn get(&self, r: usize, t: usize) -> u32 {
        self.data[r * self.frames + t]
    }

    /// Set the value at `(row, frame)`.
    pub fn set(&mut self, r: usize, t: usize, value: u32) {
        self.data[r * self.frames + t] = value;
    }

    /// Frames `[start, end)` of every row.
    pub fn slice_frames(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.frames);
        let start = start.min(end);
        let frames = end - start;
        let mut data = Vec::with_capacity(self.rows * frames);
        for r in 0..self.rows {
            data.extend_from_slice(&self.row(r)[start..end]);
        }
        Self {
            rows: self.rows,
            frames,
            data,
        }
    }

    /// The last `n` frames (all frames if fewer).
    pub fn last_frames(&self, n: usize) -> Self {
        self.slice_frames(self.frames.saturating_sub(n), self.frames)
    }

    /// Concatenate along the time axis.
    pub fn hstack(&self, other: &Self) -> BarkResult<Self> {
        if self.rows != other.rows {
            return Err(BarkError::invalid_input(format!(
                "cannot stack {} rows onto {} rows",
                other.rows, self.rows
            )));
        }
        let frames = self.frames + other.frames;
        let mut data = Vec::with_capacity(self.rows * frames);
        for r in 0..self.rows {
            data.extend_from_slice(self.row(r));
            data.extend_from_slice(other.row(r));
        }
        Ok(Self {
            rows: self.rows,
            frames,
            data,
        })
    }

    /// Concatenate along the codebook axis.
    pub fn vstack(&self, other: &Self) -> BarkResult<Self> {
        if self.frames != other.frames {
            return Err(BarkError::invalid_input(format!(
                "cannot stack rows of {} frames onto rows of {} frames",
                other.frames, self.frames
            )));
        }
        let mut data = self.data.clone();
        data.extend_from_slice(&other.data);
        Ok(Self {
            rows: self.rows + other.rows,
            frames: self.frames,
            data,
        })
    }

    /// Flatten frame-major with each codebook shifted by `row * offset`.
    pub fn interleaved_with_offset(&self, offset: u32) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.data.len());
        for t in 0..self.frames {
            for r in 0..self.rows {
                out.push(self.get(r, t) + r as u32 * offset);
            }
        }
        out
    }

    /// Largest token value, if any.
    pub fn max_value(&self) -> Option<u32> {
        self.data.iter().copied().max()
    }

    /// Check the row count (when given) and that values fit a codebook.
    pub fn validate_codebooks(&self, expected_rows: Option<usize>, what: &str) -> BarkResult<()> {
        if let Some(rows) = expected_rows {
            if self.rows != rows {
                return Err(BarkError::invalid_input(format!(
                    "{what} must have {rows} codebooks, got {}",
                    self.rows
                )));
            }
        }
        if let Some(max) = self.max_value() {
            if max as usize >= CODEBOOK_SIZE {
                return Err(BarkError::invalid_input(format!(
                    "{what} contains token {max}, outside [0, {CODEBOOK_SIZE})"
                )));
            }
        }
        Ok(())
    }
}

/// Prior token context used to condition generation on a voice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPrompt {
    /// Semantic history (`semantic_prompt`).
    pub semantic: Option<SemanticTokens>,
    /// Coarse history, 2 codebooks (`coarse_prompt`).
    pub coarse: Option<CodebookMatrix>,
    /// Fine history, 8 codebooks (`fine_prompt`).
    pub fine: Option<CodebookMatrix>,
}

impl HistoryPrompt {
    /// Check every present array against its shape and range invariants.
    pub fn validate(&self) -> BarkResult<()> {
        let as_history = |e: BarkError| match e {
            BarkError::InvalidInput(msg) => BarkError::InvalidHistory(msg),
            other => other,
        };
        if let Some(semantic) = &self.semantic {
            semantic.validate("semantic_prompt").map_err(as_history)?;
        }
        if let Some(coarse) = &self.coarse {
            coarse
                .validate_codebooks(Some(N_COARSE_CODEBOOKS), "coarse_prompt")
                .map_err(as_history)?;
        }
        if let Some(fine) = &self.fine {
            fine.validate_codebooks(Some(N_FINE_CODEBOOKS), "fine_prompt")
                .map_err(as_history)?;
        }
        Ok(())
    }

    /// Check if no array is present.
    pub fn is_empty(&self) -> bool {
        self.semantic.is_none() && self.coarse.is_none() && self.fine.is_none()
    }
}

/// Every intermediate of one text-to-speech run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullGeneration {
    pub semantic: SemanticTokens,
    pub coarse: CodebookMatrix,
    pub fine: CodebookMatrix,
}

impl From<FullGeneration> for HistoryPrompt {
    fn from(full: FullGeneration) -> Self {
        Self {
            semantic: Some(full.semantic),
            coarse: Some(full.coarse),
            fine: Some(full.fine),
        }
    }
}

/// Mono floating point audio at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    /// Create a new waveform.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Get the number of samples.
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Get the duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

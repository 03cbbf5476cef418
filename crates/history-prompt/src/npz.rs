//! Reading and writing token arrays as `.npy` files and `.npz` archives.
//!
//! Archives use the array names `semantic_prompt`, `coarse_prompt` and
//! `fine_prompt`. Token arrays are stored as `int64`.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, instrument};

use bark_core::{BarkError, BarkResult, CodebookMatrix, HistoryPrompt, SemanticTokens};

use crate::npy::{read_npy, read_npz, write_npy, write_npz, NpyArray, NpyValues};

pub const SEMANTIC_KEY: &str = "semantic_prompt";
pub const COARSE_KEY: &str = "coarse_prompt";
pub const FINE_KEY: &str = "fine_prompt";

/// Name, shape and dtype of one array in an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayInfo {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
}

impl std::fmt::Display for ArrayInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: shape {:?}, dtype {}", self.name, self.shape, self.dtype)
    }
}

/// Non-negative integer values of an array, flattened row-major.
fn integer_values(array: &NpyArray, name: &str) -> BarkResult<Vec<u32>> {
    let NpyValues::Int(values) = &array.values else {
        return Err(BarkError::invalid_history(format!(
            "{name} must be integer-valued, got {}",
            array.dtype.name()
        )));
    };
    values
        .iter()
        .map(|&v| {
            u32::try_from(v).map_err(|_| {
                BarkError::invalid_history(format!("{name} contains out-of-range value {v}"))
            })
        })
        .collect()
}

fn array_to_semantic(array: &NpyArray, name: &str) -> BarkResult<SemanticTokens> {
    if array.shape.len() != 1 {
        return Err(BarkError::invalid_history(format!(
            "{name} must be 1-D, got shape {:?}",
            array.shape
        )));
    }
    Ok(SemanticTokens::new(integer_values(array, name)?))
}

fn array_to_codebooks(array: &NpyArray, name: &str) -> BarkResult<CodebookMatrix> {
    let (rows, frames) = match array.shape.as_slice() {
        [rows, frames] => (*rows, *frames),
        other => {
            return Err(BarkError::invalid_history(format!(
                "{name} must be 2-D, got shape {other:?}"
            )))
        }
    };
    CodebookMatrix::from_flat(rows, frames, integer_values(array, name)?)
}

fn semantic_array(tokens: &SemanticTokens) -> NpyArray {
    NpyArray::from_i64(
        vec![tokens.len()],
        tokens.ids().iter().map(|&t| i64::from(t)).collect(),
    )
}

fn codebook_array(matrix: &CodebookMatrix) -> NpyArray {
    let (rows, frames) = matrix.shape();
    NpyArray::from_i64(
        vec![rows, frames],
        matrix.as_slice().iter().map(|&t| i64::from(t)).collect(),
    )
}

fn as_input_error(e: BarkError) -> BarkError {
    match e {
        BarkError::InvalidHistory(msg) => BarkError::InvalidInput(msg),
        other => other,
    }
}

/// Load a history archive and validate every array it contains.
#[instrument(skip(path), fields(path = %path.as_ref().display()))]
pub fn load_history_npz(path: impl AsRef<Path>) -> BarkResult<HistoryPrompt> {
    let path = path.as_ref();
    let mut history = HistoryPrompt::default();
    for (name, array) in read_npz(path)? {
        match name.as_str() {
            SEMANTIC_KEY => history.semantic = Some(array_to_semantic(&array, SEMANTIC_KEY)?),
            COARSE_KEY => history.coarse = Some(array_to_codebooks(&array, COARSE_KEY)?),
            FINE_KEY => history.fine = Some(array_to_codebooks(&array, FINE_KEY)?),
            other => debug!(array = other, "Ignoring unknown array in history archive"),
        }
    }
    history.validate()?;
    Ok(history)
}

/// Read only the `fine_prompt` of an archive. The other arrays are not
/// interpreted, so a token matrix can be decoded from an archive whose
/// semantic or coarse arrays would not pass validation.
#[instrument(skip(path), fields(path = %path.as_ref().display()))]
pub fn load_fine_prompt(path: impl AsRef<Path>) -> BarkResult<CodebookMatrix> {
    let path = path.as_ref();
    let array = read_npz(path)?
        .into_iter()
        .find_map(|(name, array)| (name == FINE_KEY).then_some(array))
        .ok_or_else(|| {
            BarkError::invalid_input(format!("{} has no {FINE_KEY}", path.display()))
        })?;
    let matrix = array_to_codebooks(&array, FINE_KEY).map_err(as_input_error)?;
    matrix.validate_codebooks(None, FINE_KEY)?;
    Ok(matrix)
}

/// Save every present array of `history` into one archive.
pub fn save_history_npz(path: impl AsRef<Path>, history: &HistoryPrompt) -> BarkResult<()> {
    let mut arrays: Vec<(&str, NpyArray)> = Vec::new();
    if let Some(semantic) = &history.semantic {
        arrays.push((SEMANTIC_KEY, semantic_array(semantic)));
    }
    if let Some(coarse) = &history.coarse {
        arrays.push((COARSE_KEY, codebook_array(coarse)));
    }
    if let Some(fine) = &history.fine {
        arrays.push((FINE_KEY, codebook_array(fine)));
    }
    if arrays.is_empty() {
        return Err(BarkError::invalid_input("history prompt has no arrays to save"));
    }
    let refs: Vec<(&str, &NpyArray)> = arrays.iter().map(|(n, a)| (*n, a)).collect();
    write_npz(path, &refs)
}

/// Decode semantic tokens from raw `.npy` bytes.
pub(crate) fn parse_semantic_npy(bytes: &[u8], what: &str) -> BarkResult<SemanticTokens> {
    let tokens = array_to_semantic(&NpyArray::parse(bytes)?, what).map_err(as_input_error)?;
    tokens.validate(what)?;
    Ok(tokens)
}

/// Load semantic tokens from a bare `.npy` array or an archive's `semantic_prompt`.
pub fn load_semantic_file(path: impl AsRef<Path>) -> BarkResult<SemanticTokens> {
    let path = path.as_ref();
    let tokens = match path.extension().and_then(|e| e.to_str()) {
        Some("npy") => array_to_semantic(&read_npy(path)?, "semantic array")?,
        Some("npz") => load_history_npz(path)?.semantic.ok_or_else(|| {
            BarkError::invalid_input(format!("{} has no {SEMANTIC_KEY}", path.display()))
        })?,
        _ => {
            return Err(BarkError::invalid_input(format!(
                "unsupported semantic file {}, expected .npy or .npz",
                path.display()
            )))
        }
    };
    tokens.validate("semantic array")?;
    Ok(tokens)
}

/// Write semantic tokens as a single 1-D `.npy` array.
pub fn write_semantic_npy(path: impl AsRef<Path>, tokens: &SemanticTokens) -> BarkResult<()> {
    write_npy(path, &semantic_array(tokens))
}

/// Write a coarse or fine token matrix as a single 2-D `.npy` array.
pub fn write_codebooks_npy(path: impl AsRef<Path>, matrix: &CodebookMatrix) -> BarkResult<()> {
    write_npy(path, &codebook_array(matrix))
}

/// Read a 2-D token matrix from a `.npy` array.
pub fn read_codebooks_npy(path: impl AsRef<Path>) -> BarkResult<CodebookMatrix> {
    let matrix =
        array_to_codebooks(&read_npy(path.as_ref())?, "codebook array").map_err(as_input_error)?;
    matrix.validate_codebooks(None, "codebook array")?;
    Ok(matrix)
}

/// List the arrays of an archive without interpreting them.
pub fn inspect_archive(path: impl AsRef<Path>) -> BarkResult<Vec<ArrayInfo>> {
    let mut infos: Vec<ArrayInfo> = read_npz(path)?
        .into_iter()
        .map(|(name, array)| ArrayInfo {
            name,
            shape: array.shape,
            dtype: array.dtype.name().to_string(),
        })
        .collect();
    infos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(infos)
}

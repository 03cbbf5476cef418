//! Zip bundles of per-utterance files.
//!
//! A bundle going in holds one semantic `.npy` array per utterance; a bundle
//! coming out collects the files produced for each of them.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use bark_core::{BarkError, BarkResult, SemanticTokens};

use crate::npy::zip_err;
use crate::npz::parse_semantic_npy;

/// Semantic arrays of a bundle, keyed by entry stem, in archive order.
#[instrument(skip(path), fields(path = %path.as_ref().display()))]
pub fn read_semantic_bundle(path: impl AsRef<Path>) -> BarkResult<Vec<(String, SemanticTokens)>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| BarkError::FileLoad {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(zip_err)?;

    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_err)?;
        let entry_name = entry.name().to_string();
        let Some(stem) = Path::new(&entry_name)
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".npy"))
            .map(str::to_string)
        else {
            debug!(entry = %entry_name, "Skipping non-npy bundle entry");
            continue;
        };
        let mut raw = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut raw)?;
        let tokens = parse_semantic_npy(&raw, &entry_name)?;
        entries.push((stem, tokens));
    }

    if entries.is_empty() {
        return Err(BarkError::invalid_input(format!(
            "{} contains no .npy arrays",
            path.display()
        )));
    }
    Ok(entries)
}

/// Pack `files` into a deflated zip at `path`, flattened to their file names.
pub fn write_bundle(path: impl AsRef<Path>, files: &[PathBuf]) -> BarkResult<()> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(path.as_ref())?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for file in files {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BarkError::invalid_input(format!("bad file name {}", file.display())))?;
        zip.start_file(name, options).map_err(zip_err)?;
        zip.write_all(&std::fs::read(file)?)?;
    }
    zip.finish().map_err(zip_err)?.flush()?;
    Ok(())
}

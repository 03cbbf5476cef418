//! Minimal `.npy` / `.npz` codec covering every numpy integer and float dtype.
//!
//! Integer arrays of any width (and `bool`) widen to `i64`; floats widen to
//! `f64`. Fortran-ordered payloads are reordered to row-major on read.
//! Arrays are always written as little-endian, row-major `<i8` or `<f8`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use bark_core::{BarkError, BarkResult};

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Upper bound on a single decompressed archive entry.
const MAX_NPY_ENTRY_BYTES: u64 = 512 * 1024 * 1024;

/// Element type of an array on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpyDtype {
    Bool,
    Int(usize),
    UInt(usize),
    Float(usize),
}

impl NpyDtype {
    /// numpy name of the dtype, e.g. `int32`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int(1) => "int8",
            Self::Int(2) => "int16",
            Self::Int(4) => "int32",
            Self::Int(_) => "int64",
            Self::UInt(1) => "uint8",
            Self::UInt(2) => "uint16",
            Self::UInt(4) => "uint32",
            Self::UInt(_) => "uint64",
            Self::Float(2) => "float16",
            Self::Float(4) => "float32",
            Self::Float(_) => "float64",
        }
    }

    fn size(self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int(n) | Self::UInt(n) | Self::Float(n) => n,
        }
    }

    /// Parse a descr such as `<i4`, `|u1` or `>f8`. Returns the dtype and
    /// whether the payload is big-endian.
    fn parse(descr: &str) -> Option<(Self, bool)> {
        let mut chars = descr.chars();
        let (big_endian, rest) = match chars.next()? {
            '<' | '|' | '=' => (false, chars.as_str()),
            '>' => (true, chars.as_str()),
            _ => (false, descr),
        };
        let kind = rest.chars().next()?;
        let size: usize = rest[1..].parse().ok()?;
        let dtype = match (kind, size) {
            ('b', 1) | ('?', 1) => Self::Bool,
            ('i', 1 | 2 | 4 | 8) => Self::Int(size),
            ('u', 1 | 2 | 4 | 8) => Self::UInt(size),
            ('f', 2 | 4 | 8) => Self::Float(size),
            _ => return None,
        };
        Some((dtype, big_endian))
    }
}

/// Element values, widened.
#[derive(Debug, Clone, PartialEq)]
pub enum NpyValues {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

/// One decoded array in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub dtype: NpyDtype,
    pub values: NpyValues,
}

impl NpyArray {
    /// `int64` array.
    pub fn from_i64(shape: Vec<usize>, values: Vec<i64>) -> Self {
        Self {
            shape,
            dtype: NpyDtype::Int(8),
            values: NpyValues::Int(values),
        }
    }

    /// `float64` array.
    pub fn from_f64(shape: Vec<usize>, values: Vec<f64>) -> Self {
        Self {
            shape,
            dtype: NpyDtype::Float(8),
            values: NpyValues::Float(values),
        }
    }

    pub fn len(&self) -> usize {
        match &self.values {
            NpyValues::Int(v) => v.len(),
            NpyValues::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode a complete `.npy` payload.
    pub fn parse(bytes: &[u8]) -> BarkResult<Self> {
        if bytes.len() < 10 || &bytes[..6] != MAGIC {
            return Err(format_err("invalid npy magic header"));
        }
        let (header_len, header_offset) = match bytes[6] {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 if bytes.len() >= 12 => (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            ),
            other => return Err(format_err(format!("unsupported npy version {other}"))),
        };
        let header_end = header_offset + header_len;
        if bytes.len() < header_end {
            return Err(format_err("npy header length exceeds payload size"));
        }
        let header = std::str::from_utf8(&bytes[header_offset..header_end])
            .map_err(|_| format_err("npy header is not valid utf-8"))?;

        let descr = header_field(header, "descr")
            .ok_or_else(|| format_err("npy header missing 'descr'"))?;
        let fortran = header_field(header, "fortran_order")
            .ok_or_else(|| format_err("npy header missing 'fortran_order'"))?
            == "True";
        let shape = header_shape(header).ok_or_else(|| format_err("npy header missing 'shape'"))?;
        let (dtype, big_endian) = NpyDtype::parse(descr)
            .ok_or_else(|| format_err(format!("unsupported npy dtype '{descr}'")))?;

        let count = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| format_err(format!("npy shape overflow for {shape:?}")))?;
        let data = &bytes[header_end..];
        if data.len() != count * dtype.size() {
            return Err(format_err(format!(
                "npy data size mismatch: expected {} bytes, got {}",
                count * dtype.size(),
                data.len()
            )));
        }

        let mut values = decode_values(dtype, big_endian, data)?;
        if fortran && shape.len() > 1 {
            values = match values {
                NpyValues::Int(v) => NpyValues::Int(fortran_to_c(&v, &shape)),
                NpyValues::Float(v) => NpyValues::Float(fortran_to_c(&v, &shape)),
            };
        }
        Ok(Self {
            shape,
            dtype,
            values,
        })
    }

    /// Encode as a version 1.0 `.npy` payload (`<i8` or `<f8`).
    pub fn to_bytes(&self) -> Vec<u8> {
        let descr = match self.values {
            NpyValues::Int(_) => "<i8",
            NpyValues::Float(_) => "<f8",
        };
        let shape = match self.shape.as_slice() {
            [n] => format!("({n},)"),
            dims => format!(
                "({})",
                dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
            ),
        };
        let mut header =
            format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape}, }}");
        // magic + version + length + header + newline is a multiple of 64
        let unpadded = MAGIC.len() + 4 + header.len() + 1;
        header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
        header.push('\n');

        let mut out = Vec::with_capacity(10 + header.len() + self.len() * 8);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        match &self.values {
            NpyValues::Int(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            NpyValues::Float(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        }
        out
    }
}

fn format_err(msg: impl Into<String>) -> BarkError {
    BarkError::invalid_input(msg)
}

pub(crate) fn zip_err(e: zip::result::ZipError) -> BarkError {
    BarkError::Io(io::Error::other(e))
}

fn decode_values(dtype: NpyDtype, big_endian: bool, data: &[u8]) -> BarkResult<NpyValues> {
    let size = dtype.size();
    let words = data.chunks_exact(size).map(|chunk| {
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(chunk);
        if big_endian {
            buf[..size].reverse();
        }
        buf
    });

    Ok(match dtype {
        NpyDtype::Bool => NpyValues::Int(words.map(|b| i64::from(b[0] != 0)).collect()),
        NpyDtype::Int(n) => NpyValues::Int(
            words
                .map(|b| match n {
                    1 => i64::from(i8::from_le_bytes([b[0]])),
                    2 => i64::from(i16::from_le_bytes([b[0], b[1]])),
                    4 => i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                    _ => i64::from_le_bytes(b),
                })
                .collect(),
        ),
        NpyDtype::UInt(n) => NpyValues::Int(
            words
                .map(|b| match n {
                    1 => Ok(i64::from(b[0])),
                    2 => Ok(i64::from(u16::from_le_bytes([b[0], b[1]]))),
                    4 => Ok(i64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
                    _ => {
                        let v = u64::from_le_bytes(b);
                        i64::try_from(v)
                            .map_err(|_| format_err(format!("uint64 value {v} out of range")))
                    }
                })
                .collect::<BarkResult<_>>()?,
        ),
        NpyDtype::Float(n) => NpyValues::Float(
            words
                .map(|b| match n {
                    2 => half::f16::from_le_bytes([b[0], b[1]]).to_f64(),
                    4 => f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                    _ => f64::from_le_bytes(b),
                })
                .collect(),
        ),
    })
}

fn fortran_to_c<T: Copy>(values: &[T], shape: &[usize]) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    let mut index = vec![0usize; shape.len()];
    for _ in 0..values.len() {
        let mut offset = 0;
        let mut stride = 1;
        for (&i, &dim) in index.iter().zip(shape) {
            offset += i * stride;
            stride *= dim;
        }
        out.push(values[offset]);
        for k in (0..shape.len()).rev() {
            index[k] += 1;
            if index[k] < shape[k] {
                break;
            }
            index[k] = 0;
        }
    }
    out
}

fn header_field<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{key}':");
    let start = header.find(&pattern)? + pattern.len();
    let rest = header[start..].trim_start();

    if let Some(stripped) = rest.strip_prefix('\'') {
        let end = stripped.find('\'')?;
        return Some(&stripped[..end]);
    }
    if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        return Some(&stripped[..end]);
    }
    let end = rest.find([',', '}']).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn header_shape(header: &str) -> Option<Vec<usize>> {
    let marker = "'shape':";
    let start = header.find(marker)? + marker.len();
    let rest = header[start..].trim_start().strip_prefix('(')?;
    let end = rest.find(')')?;
    rest[..end]
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect()
}

fn open(path: &Path) -> BarkResult<File> {
    File::open(path).map_err(|source| BarkError::FileLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a single `.npy` file.
pub fn read_npy(path: impl AsRef<Path>) -> BarkResult<NpyArray> {
    let mut bytes = Vec::new();
    BufReader::new(open(path.as_ref())?).read_to_end(&mut bytes)?;
    NpyArray::parse(&bytes)
}

/// Write a single `.npy` file.
pub fn write_npy(path: impl AsRef<Path>, array: &NpyArray) -> BarkResult<()> {
    std::fs::write(path.as_ref(), array.to_bytes())?;
    Ok(())
}

/// Read every `.npy` entry of an archive, keyed by name without extension.
pub fn read_npz(path: impl AsRef<Path>) -> BarkResult<Vec<(String, NpyArray)>> {
    let path = path.as_ref();
    let mut archive = ZipArchive::new(BufReader::new(open(path)?)).map_err(zip_err)?;
    let mut arrays = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_err)?;
        let Some(name) = entry.name().strip_suffix(".npy").map(str::to_string) else {
            continue;
        };
        let mut raw = Vec::new();
        (&mut entry)
            .take(MAX_NPY_ENTRY_BYTES + 1)
            .read_to_end(&mut raw)?;
        if raw.len() as u64 > MAX_NPY_ENTRY_BYTES {
            return Err(format_err(format!(
                "npy entry '{name}' exceeds {MAX_NPY_ENTRY_BYTES} bytes"
            )));
        }
        let array = NpyArray::parse(&raw)
            .map_err(|e| format_err(format!("{}: entry '{name}': {e}", path.display())))?;
        arrays.push((name, array));
    }
    Ok(arrays)
}

/// Write arrays into an uncompressed archive, as `numpy.savez` does.
pub fn write_npz(path: impl AsRef<Path>, arrays: &[(&str, &NpyArray)]) -> BarkResult<()> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(path.as_ref())?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, array) in arrays {
        zip.start_file(format!("{name}.npy"), options)
            .map_err(zip_err)?;
        zip.write_all(&array.to_bytes())?;
    }
    zip.finish().map_err(zip_err)?.flush()?;
    Ok(())
}

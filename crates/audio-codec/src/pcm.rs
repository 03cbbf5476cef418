//! Conversion of arbitrary sample encodings to signed 16-bit PCM.

use candle_core::{DType, Tensor};
use half::f16;

use bark_core::{BarkError, BarkResult};

/// Divisor mapping the int64 range onto int16.
const I64_DIVISOR: f64 = 4_295_229_444.0;

/// Divisor mapping the int32 range onto int16.
const I32_DIVISOR: f64 = 65_538.0;

/// A waveform in one of the supported sample encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum PcmBuffer {
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl PcmBuffer {
    /// Name of the encoding, numpy style.
    pub fn dtype_name(&self) -> &'static str {
        match self {
            Self::U8(_) => "uint8",
            Self::I16(_) => "int16",
            Self::U16(_) => "uint16",
            Self::I32(_) => "int32",
            Self::I64(_) => "int64",
            Self::F16(_) => "float16",
            Self::F32(_) => "float32",
            Self::F64(_) => "float64",
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::F16(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten a tensor into a buffer of the matching encoding.
    ///
    /// Fails with `UnsupportedEncoding` for dtypes outside the supported set.
    pub fn try_from_tensor(tensor: &Tensor) -> BarkResult<Self> {
        let flat = tensor.flatten_all()?;
        Ok(match flat.dtype() {
            DType::U8 => Self::U8(flat.to_vec1()?),
            DType::I64 => Self::I64(flat.to_vec1()?),
            DType::F16 => Self::F16(flat.to_vec1()?),
            DType::F32 => Self::F32(flat.to_vec1()?),
            DType::F64 => Self::F64(flat.to_vec1()?),
            other => return Err(BarkError::UnsupportedEncoding(format!("{other:?}").to_lowercase())),
        })
    }

    /// Samples as floats in roughly `[-1, 1]`.
    ///
    /// 16- and 32-bit integers are scaled by their positive full scale; float
    /// data passes through unchanged.
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            Self::I16(v) => v.iter().map(|&s| s as f32 / 32_767.0).collect(),
            Self::I32(v) => v.iter().map(|&s| (s as f64 / 2_147_483_647.0) as f32).collect(),
            Self::F16(v) => v.iter().map(|s| s.to_f32()).collect(),
            Self::F32(v) => v.clone(),
            Self::F64(v) => v.iter().map(|&s| s as f32).collect(),
            other => to_i16_pcm(other)
                .into_iter()
                .map(|s| s as f32 / 32_767.0)
                .collect(),
        }
    }
}

/// Peak-normalise float samples into the int16 range.
///
/// Silence (peak 0) maps to zeros.
fn normalize_float<I: Iterator<Item = f64> + Clone>(samples: I) -> Vec<i16> {
    let peak = samples.clone().fold(0.0f64, |m, s| m.max(s.abs()));
    if peak == 0.0 || !peak.is_finite() {
        return samples.map(|_| 0).collect();
    }
    samples
        .map(|s| (s / peak * 32_767.0) as i16)
        .collect()
}

/// Convert any supported encoding to signed 16-bit PCM.
pub fn to_i16_pcm(buffer: &PcmBuffer) -> Vec<i16> {
    match buffer {
        PcmBuffer::F16(v) => normalize_float(v.iter().map(|s| s.to_f64())),
        PcmBuffer::F32(v) => normalize_float(v.iter().map(|&s| s as f64)),
        PcmBuffer::F64(v) => normalize_float(v.iter().copied()),
        PcmBuffer::I64(v) => v.iter().map(|&s| (s as f64 / I64_DIVISOR) as i16).collect(),
        PcmBuffer::I32(v) => v.iter().map(|&s| (s as f64 / I32_DIVISOR) as i16).collect(),
        PcmBuffer::I16(v) => v.clone(),
        PcmBuffer::U16(v) => v.iter().map(|&s| (s as i32 - 32_768) as i16).collect(),
        PcmBuffer::U8(v) => v.iter().map(|&s| (s as i32 * 257 - 32_768) as i16).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_float_peak_normalisation() {
        let samples: Vec<f64> = (0..100).map(|i| 0.5 * (i as f64 * 0.1).sin()).collect();
        let pcm = to_i16_pcm(&PcmBuffer::F64(samples));
        let peak = pcm.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak >= 32_760, "peak {peak}");
    }

    #[test]
    fn test_silence_stays_silent() {
        let pcm = to_i16_pcm(&PcmBuffer::F32(vec![0.0; 8]));
        assert_eq!(pcm, vec![0; 8]);
    }

    #[test]
    fn test_integer_rescaling() {
        assert_eq!(
            to_i16_pcm(&PcmBuffer::I32(vec![i32::MAX, i32::MIN, 0])),
            vec![32_767, -32_767, 0]
        );
        assert_eq!(
            to_i16_pcm(&PcmBuffer::I64(vec![i64::MAX / 2, 0])),
            vec![(i64::MAX as f64 / 2.0 / I64_DIVISOR) as i16, 0]
        );
        assert_eq!(to_i16_pcm(&PcmBuffer::I16(vec![-5, 5])), vec![-5, 5]);
    }

    #[test]
    fn test_unsigned_bias_shift() {
        assert_eq!(
            to_i16_pcm(&PcmBuffer::U16(vec![0, 32_768, 65_535])),
            vec![-32_768, 0, 32_767]
        );
        assert_eq!(
            to_i16_pcm(&PcmBuffer::U8(vec![0, 128, 255])),
            vec![-32_768, 128, 32_767]
        );
    }

    #[test]
    fn test_from_tensor() {
        let t = Tensor::new(&[[0.25f32, -0.5]], &Device::Cpu).unwrap();
        assert_eq!(
            PcmBuffer::try_from_tensor(&t).unwrap(),
            PcmBuffer::F32(vec![0.25, -0.5])
        );

        let t = Tensor::new(&[1u32, 2], &Device::Cpu).unwrap();
        let err = PcmBuffer::try_from_tensor(&t).unwrap_err();
        assert!(matches!(err, BarkError::UnsupportedEncoding(ref d) if d == "u32"));

        let t = t.to_dtype(DType::BF16).unwrap();
        assert!(PcmBuffer::try_from_tensor(&t).is_err());
    }

    #[test]
    fn test_to_f32_scaling() {
        let f = PcmBuffer::I16(vec![32_767, -32_767]).to_f32();
        assert_eq!(f, vec![1.0, -1.0]);
        assert_eq!(PcmBuffer::U8(vec![128]).dtype_name(), "uint8");
    }
}

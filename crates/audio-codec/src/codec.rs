//! Codebook indices to waveform through a neural codec.

use std::time::Instant;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Embedding, Linear};
use tracing::{debug, info, instrument};

use bark_core::constants::{CODEBOOK_SIZE, N_FINE_CODEBOOKS, SAMPLE_RATE};
use bark_core::{
    BarkError, BarkResult, CodebookMatrix, CodecModel, DevicePlaced, ExecutionContext, Waveform,
};

/// Decode a fine codebook matrix to audio.
///
/// With `decode_on_cpu` the model runs on the CPU and is returned to the
/// device it came from; otherwise the context's offload policy applies.
#[instrument(skip_all, fields(rows = fine.rows(), frames = fine.frames(), decode_on_cpu = decode_on_cpu))]
pub fn codec_decode(
    model: &mut dyn CodecModel,
    fine: &CodebookMatrix,
    ctx: &ExecutionContext,
    decode_on_cpu: bool,
) -> BarkResult<Waveform> {
    if fine.rows() == 0 || fine.frames() == 0 {
        return Err(BarkError::invalid_input(format!(
            "codec input must be non-empty, got shape {:?}",
            fine.shape()
        )));
    }
    fine.validate_codebooks(None, "codec input")?;

    let start = Instant::now();
    let samples = if decode_on_cpu {
        let prior = model.device();
        model.to_device(&Device::Cpu)?;
        let result = decode_codes(model, fine);
        model.to_device(&prior)?;
        result?
    } else {
        ctx.with_placement(model, |model| decode_codes(model, fine))?
    };

    let wav = Waveform::new(samples, model.sample_rate());
    info!(
        samples = wav.num_samples(),
        duration_secs = wav.duration_secs(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Codec decode finished"
    );
    Ok(wav)
}

/// Encode audio to a fine codebook matrix.
///
/// Input at another rate is resampled to the codec's rate first. The result
/// can serve as the `fine_prompt` of a history archive, and its first two
/// rows as the `coarse_prompt`.
#[instrument(skip_all, fields(samples = audio.num_samples(), sample_rate = audio.sample_rate))]
pub fn codec_encode(
    model: &mut dyn CodecModel,
    audio: &Waveform,
    ctx: &ExecutionContext,
) -> BarkResult<CodebookMatrix> {
    if audio.samples.is_empty() {
        return Err(BarkError::invalid_input("cannot encode empty audio"));
    }
    let samples = if audio.sample_rate == model.sample_rate() {
        audio.samples.clone()
    } else {
        crate::mix::resample(&audio.samples, audio.sample_rate, model.sample_rate())?
    };

    let codes = ctx.with_placement(model, |model| {
        let len = samples.len();
        let input = Tensor::from_vec(samples, (1, 1, len), &model.device())?;
        let codes = model.encode(&input)?.squeeze(1)?.to_dtype(DType::U32)?;
        Ok(codes.to_device(&Device::Cpu)?.to_vec2::<u32>()?)
    })?;
    let matrix = CodebookMatrix::from_rows(codes)?;
    matrix.validate_codebooks(Some(N_FINE_CODEBOOKS), "encoded codes")?;
    debug!(frames = matrix.frames(), "Codec encode finished");
    Ok(matrix)
}

fn decode_codes(model: &mut dyn CodecModel, fine: &CodebookMatrix) -> BarkResult<Vec<f32>> {
    let (rows, frames) = fine.shape();
    let codes = Tensor::from_vec(fine.as_slice().to_vec(), (rows, 1, frames), &model.device())?;
    let embeddings = model.quantizer_decode(&codes)?;
    debug!(shape = ?embeddings.dims(), "Quantizer output");
    let audio = model.decode(&embeddings)?;
    debug!(shape = ?audio.dims(), peak = peak_amplitude(&audio)?, "Decoder output");
    let samples = audio
        .squeeze(0)?
        .flatten_all()?
        .to_dtype(DType::F32)?
        .to_device(&Device::Cpu)?
        .to_vec1::<f32>()?;
    Ok(samples)
}

/// Samples produced per codec frame at 24 kHz / 75 Hz.
pub const MOCK_HOP: usize = 320;

const MOCK_DIM: usize = 16;

/// Small deterministic codec built from candle layers.
///
/// Each codebook has its own embedding table; the summed embeddings go
/// through a linear projection to `MOCK_HOP` samples per frame and a tanh.
#[derive(Debug, Clone)]
pub struct MockCodec {
    codebooks: Vec<Embedding>,
    projection: Linear,
    device: Device,
    moves: usize,
}

impl MockCodec {
    pub fn new() -> BarkResult<Self> {
        let device = Device::Cpu;
        let codebooks = (0..N_FINE_CODEBOOKS)
            .map(|q| {
                let table: Vec<f32> = (0..CODEBOOK_SIZE * MOCK_DIM)
                    .map(|i| ((i * (q + 1)) as f32 * 0.013).sin() * 0.25)
                    .collect();
                let table = Tensor::from_vec(table, (CODEBOOK_SIZE, MOCK_DIM), &device)?;
                Ok(Embedding::new(table, MOCK_DIM))
            })
            .collect::<BarkResult<Vec<_>>>()?;
        let weight: Vec<f32> = (0..MOCK_HOP * MOCK_DIM)
            .map(|i| (i as f32 * 0.071).cos() * 0.5)
            .collect();
        let weight = Tensor::from_vec(weight, (MOCK_HOP, MOCK_DIM), &device)?;
        Ok(Self {
            codebooks,
            projection: Linear::new(weight, None),
            device,
            moves: 0,
        })
    }

    /// Number of device moves so far.
    pub fn moves(&self) -> usize {
        self.moves
    }
}

impl DevicePlaced for MockCodec {
    fn device(&self) -> Device {
        self.device.clone()
    }

    fn to_device(&mut self, device: &Device) -> BarkResult<()> {
        let mut codebooks = Vec::with_capacity(self.codebooks.len());
        for emb in &self.codebooks {
            codebooks.push(Embedding::new(emb.embeddings().to_device(device)?, MOCK_DIM));
        }
        let weight = self.projection.weight().to_device(device)?;
        self.codebooks = codebooks;
        self.projection = Linear::new(weight, None);
        self.device = device.clone();
        self.moves += 1;
        Ok(())
    }
}

impl CodecModel for MockCodec {
    fn quantizer_decode(&self, codes: &Tensor) -> BarkResult<Tensor> {
        let n_q = codes.dim(0)?;
        if n_q > self.codebooks.len() {
            return Err(BarkError::inference(format!(
                "codec has {} codebooks, got {n_q}",
                self.codebooks.len()
            )));
        }
        let mut sum: Option<Tensor> = None;
        for (q, emb) in self.codebooks.iter().take(n_q).enumerate() {
            // (batch, frames) -> (batch, frames, dim)
            let e = emb.forward(&codes.get(q)?)?;
            sum = Some(match sum {
                Some(acc) => (acc + e)?,
                None => e,
            });
        }
        let sum = sum.ok_or_else(|| BarkError::inference("no codebooks to decode"))?;
        Ok(sum.transpose(1, 2)?)
    }

    fn decode(&self, embeddings: &Tensor) -> BarkResult<Tensor> {
        let (batch, _dim, frames) = embeddings.dims3()?;
        let x = embeddings.transpose(1, 2)?.contiguous()?;
        let y = self.projection.forward(&x)?.tanh()?;
        Ok(y.reshape((batch, 1, frames * MOCK_HOP))?)
    }

    /// Each frame is split into one band per codebook; a band's mean
    /// magnitude picks its token.
    fn encode(&self, audio: &Tensor) -> BarkResult<Tensor> {
        let (batch, channels, samples) = audio.dims3()?;
        if channels != 1 {
            return Err(BarkError::inference(format!(
                "codec expects mono audio, got {channels} channels"
            )));
        }
        let frames = samples.div_ceil(MOCK_HOP);
        let band = MOCK_HOP / N_FINE_CODEBOOKS;
        let top = (CODEBOOK_SIZE - 1) as f64;
        let codes = audio
            .to_dtype(DType::F32)?
            .pad_with_zeros(2, 0, frames * MOCK_HOP - samples)?
            .reshape((batch, frames, N_FINE_CODEBOOKS, band))?
            .abs()?
            .mean(D::Minus1)?
            .affine(top, 0.0)?
            .clamp(0.0, top)?
            .round()?
            .to_dtype(DType::U32)?;
        // (batch, frames, n_q) -> (n_q, batch, frames)
        Ok(codes.permute((2, 0, 1))?.contiguous()?)
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn channels(&self) -> usize {
        1
    }
}

/// Peak absolute amplitude of a tensor, for logging.
pub fn peak_amplitude(audio: &Tensor) -> BarkResult<f32> {
    Ok(audio
        .abs()?
        .flatten_all()?
        .max(D::Minus1)?
        .to_dtype(DType::F32)?
        .to_scalar::<f32>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mix::resample;

    #[test]
    fn test_mock_codec_shapes() {
        let codec = MockCodec::new().unwrap();
        let codes = Tensor::zeros((8, 1, 5), DType::U32, &Device::Cpu).unwrap();
        let emb = codec.quantizer_decode(&codes).unwrap();
        assert_eq!(emb.dims(), &[1, MOCK_DIM, 5]);
        let audio = codec.decode(&emb).unwrap();
        assert_eq!(audio.dims(), &[1, 1, 5 * MOCK_HOP]);
        assert!(peak_amplitude(&audio).unwrap() <= 1.0);
    }

    #[test]
    fn test_decode_length() {
        let mut codec = MockCodec::new().unwrap();
        let fine = CodebookMatrix::filled(8, 75, 12);
        let wav = codec_decode(&mut codec, &fine, &ExecutionContext::cpu(), false).unwrap();
        assert_eq!(wav.num_samples(), 75 * MOCK_HOP);
        assert_eq!(wav.sample_rate, SAMPLE_RATE);
        assert!((wav.duration_secs() - 1.0).abs() < 1e-6);
        assert_eq!(codec.moves(), 0);
    }

    #[test]
    fn test_decode_on_cpu_restores_device() {
        let mut codec = MockCodec::new().unwrap();
        let fine = CodebookMatrix::filled(2, 4, 1);
        let ctx = ExecutionContext::new(Device::Cpu, true);
        codec_decode(&mut codec, &fine, &ctx, true).unwrap();
        assert_eq!(codec.moves(), 2);
        assert!(codec.device().is_cpu());
    }

    #[test]
    fn test_encode_to_fine_codes() {
        let mut codec = MockCodec::new().unwrap();
        let tone: Vec<f32> = (0..24_000)
            .map(|i| (i as f32 * 3_000.0 * std::f32::consts::TAU / 24_000.0).sin() * 0.8)
            .collect();
        let fine = codec_encode(
            &mut codec,
            &Waveform::new(tone.clone(), 24_000),
            &ExecutionContext::cpu(),
        )
        .unwrap();
        assert_eq!(fine.shape(), (N_FINE_CODEBOOKS, 75));
        assert!(fine.max_value().unwrap() < CODEBOOK_SIZE as u32);
        // eight samples per period: mean |0.8 sin| is about 0.48
        assert!((400..600).contains(&fine.get(0, 10)));

        let silence = Waveform::new(vec![0.0; 1000], 24_000);
        let quiet = codec_encode(&mut codec, &silence, &ExecutionContext::cpu()).unwrap();
        assert_eq!(quiet.frames(), 4);
        assert_eq!(quiet.max_value().unwrap(), 0);

        let tone_48k = Waveform::new(resample(&tone, 24_000, 48_000).unwrap(), 48_000);
        let from_48k = codec_encode(&mut codec, &tone_48k, &ExecutionContext::cpu()).unwrap();
        assert_eq!(from_48k.rows(), N_FINE_CODEBOOKS);
        assert!(from_48k.frames() <= 76);

        let empty = Waveform::new(Vec::new(), 24_000);
        assert!(codec_encode(&mut codec, &empty, &ExecutionContext::cpu()).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_codes() {
        let mut codec = MockCodec::new().unwrap();
        let fine = CodebookMatrix::filled(8, 4, 1024);
        let err = codec_decode(&mut codec, &fine, &ExecutionContext::cpu(), false).unwrap_err();
        assert!(matches!(err, BarkError::InvalidInput(_)));
    }
}

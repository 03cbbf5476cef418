//! Resampling, down-mixing and recombination of separated stems.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use bark_core::{BarkError, BarkResult};

use crate::pcm::PcmBuffer;

fn sinc_resample(samples: &[f32], ratio: f64) -> BarkResult<Vec<f32>> {
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
        .map_err(|e| BarkError::audio(e.to_string()))?;
    let mut output = resampler
        .process(&[samples], None)
        .map_err(|e| BarkError::audio(e.to_string()))?;
    Ok(output.pop().unwrap_or_default())
}

/// Resample mono audio from `from_rate` to `to_rate`.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> BarkResult<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(BarkError::audio(format!(
            "cannot resample from {from_rate} Hz to {to_rate} Hz"
        )));
    }
    sinc_resample(samples, to_rate as f64 / from_rate as f64)
}

/// Resample mono audio to exactly `target_len` samples.
pub fn resample_to_len(samples: &[f32], target_len: usize) -> BarkResult<Vec<f32>> {
    if samples.len() == target_len {
        return Ok(samples.to_vec());
    }
    if samples.is_empty() || target_len == 0 {
        return Ok(vec![0.0; target_len]);
    }
    let mut out = sinc_resample(samples, target_len as f64 / samples.len() as f64)?;
    out.resize(target_len, 0.0);
    Ok(out)
}

/// Convert interleaved audio to mono floats.
///
/// 16- and 32-bit integers are scaled to `[-1, 1]`; multi-channel frames are
/// averaged.
pub fn flatten_audio(pcm: &PcmBuffer, channels: u16) -> Vec<f32> {
    let samples = pcm.to_f32();
    if channels <= 1 {
        return samples;
    }
    let n = channels as usize;
    samples
        .chunks_exact(n)
        .map(|frame| frame.iter().sum::<f32>() / n as f32)
        .collect()
}

/// Mix a background stem back under a voice track.
///
/// Both tracks are halved, the background is stretched to the voice length,
/// and both are cut to the tail of the shorter one before summing.
pub fn merge_and_match(voice: &[f32], background: &[f32]) -> BarkResult<Vec<f32>> {
    let voice: Vec<f32> = voice.iter().map(|s| s / 2.0).collect();
    let halved: Vec<f32> = background.iter().map(|s| s / 2.0).collect();
    let background = resample_to_len(&halved, voice.len())?;

    let n = voice.len().min(background.len());
    debug!(voice = voice.len(), background = background.len(), "Merging stems");
    Ok(voice[voice.len() - n..]
        .iter()
        .zip(&background[background.len() - n..])
        .map(|(a, b)| a + b)
        .collect())
}

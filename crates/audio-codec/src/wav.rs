//! WAV file I/O utilities.

use std::io::{self, Write};
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use bark_core::{BarkError, BarkResult, Waveform};

use crate::pcm::{to_i16_pcm, PcmBuffer};

/// Audio read back from a WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    /// Interleaved samples in the file's native encoding.
    pub pcm: PcmBuffer,
    pub sample_rate: u32,
    pub channels: u16,
}

fn hound_err(e: hound::Error) -> BarkError {
    BarkError::Io(io::Error::other(e.to_string()))
}

/// Write a waveform as 16-bit mono WAV, peak-normalised.
pub fn write_wav(path: impl AsRef<Path>, wav: &Waveform) -> BarkResult<()> {
    let pcm = to_i16_pcm(&PcmBuffer::F32(wav.samples.clone()));
    write_pcm16_wav(path, &pcm, wav.sample_rate, 1)
}

/// Write interleaved 16-bit samples to a WAV file.
pub fn write_pcm16_wav(
    path: impl AsRef<Path>,
    samples: &[i16],
    sample_rate: u32,
    channels: u16,
) -> BarkResult<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path.as_ref(), spec).map_err(hound_err)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(hound_err)?;
    }
    writer.finalize().map_err(hound_err)?;

    Ok(())
}

/// Write audio samples to a writer as raw PCM (16-bit LE).
pub fn write_raw_pcm<W: Write>(writer: &mut W, samples: &[f32]) -> BarkResult<()> {
    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_all(&sample_i16.to_le_bytes())?;
    }
    Ok(())
}

/// Read a WAV file, keeping its sample encoding.
pub fn read_wav(path: impl AsRef<Path>) -> BarkResult<WavAudio> {
    let mut reader = hound::WavReader::open(path.as_ref()).map_err(hound_err)?;
    let spec = reader.spec();

    let pcm = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => PcmBuffer::U8(
            reader
                .samples::<i8>()
                .map(|s| s.map(|v| (v as i16 + 128) as u8))
                .collect::<Result<Vec<_>, _>>()
                .map_err(hound_err)?,
        ),
        (SampleFormat::Int, 16) => PcmBuffer::I16(
            reader
                .samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(hound_err)?,
        ),
        (SampleFormat::Int, bits) => {
            // widen 24-bit samples to the full int32 range
            let shift = 32 - bits as u32;
            PcmBuffer::I32(
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v << shift))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(hound_err)?,
            )
        }
        (SampleFormat::Float, _) => PcmBuffer::F32(
            reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(hound_err)?,
        ),
    };

    Ok(WavAudio {
        pcm,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_write_raw_pcm() {
        let samples = vec![0.0f32, 0.5, -0.5, 1.0, -1.0];
        let mut buffer = Vec::new();

        write_raw_pcm(&mut buffer, &samples).unwrap();

        assert_eq!(buffer.len(), samples.len() * 2);
    }

    #[test]
    fn test_sample_clamping() {
        let samples = vec![2.0f32, -2.0];
        let mut buffer = Cursor::new(Vec::new());

        write_raw_pcm(&mut buffer, &samples).unwrap();

        let bytes = buffer.into_inner();
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert!(i16::from_le_bytes([bytes[2], bytes[3]]) < -30000);
    }

    #[test]
    fn test_waveform_is_peak_normalised() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        write_wav(&path, &Waveform::new(vec![0.0, 0.1, -0.2], 24_000)).unwrap();

        let audio = read_wav(&path).unwrap();
        assert_eq!(audio.sample_rate, 24_000);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.pcm, PcmBuffer::I16(vec![0, 16_383, -32_767]));
    }

    #[test]
    fn test_stereo_round_trip_keeps_interleaving() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.wav");
        write_pcm16_wav(&path, &[1, -1, 2, -2], 16_000, 2).unwrap();

        let audio = read_wav(&path).unwrap();
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.pcm, PcmBuffer::I16(vec![1, -1, 2, -2]));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_wav("/nonexistent/input.wav").unwrap_err();
        assert!(matches!(err, BarkError::Io(_)));
    }
}

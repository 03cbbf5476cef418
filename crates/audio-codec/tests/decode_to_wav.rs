//! Codec decode through to a WAV file on disk.

use audio_codec::{codec_decode, read_wav, to_i16_pcm, write_wav, MockCodec, PcmBuffer};
use bark_core::constants::SAMPLE_RATE;
use bark_core::{CodebookMatrix, ExecutionContext};
use tempfile::TempDir;

#[test]
fn test_fine_tokens_to_wav_file() {
    let fine = CodebookMatrix::from_rows(
        (0..8)
            .map(|q| (0..30).map(|t| ((q * 131 + t * 17) % 1024) as u32).collect())
            .collect(),
    )
    .unwrap();
    let mut codec = MockCodec::new().unwrap();
    let wav = codec_decode(&mut codec, &fine, &ExecutionContext::cpu(), false).unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("speech.wav");
    write_wav(&path, &wav).unwrap();

    let audio = read_wav(&path).unwrap();
    assert_eq!(audio.sample_rate, SAMPLE_RATE);
    assert_eq!(audio.pcm.len(), wav.num_samples());
    assert_eq!(audio.pcm, PcmBuffer::I16(to_i16_pcm(&PcmBuffer::F32(wav.samples))));
}

#[test]
fn test_fewer_codebooks_still_decode() {
    let mut codec = MockCodec::new().unwrap();
    let coarse = CodebookMatrix::filled(2, 10, 99);
    let wav = codec_decode(&mut codec, &coarse, &ExecutionContext::cpu(), false).unwrap();
    assert_eq!(wav.num_samples(), 10 * audio_codec::codec::MOCK_HOP);
}

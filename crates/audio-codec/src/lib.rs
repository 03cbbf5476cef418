//! # audio-codec
//!
//! Audio back end for the Bark pipeline.
//!
//! This crate provides the last step from codebook indices to audio,
//! including:
//! - Codec decode stage with CPU / offload placement, and encoding back to codes
//! - Conversion of any supported sample encoding to 16-bit PCM
//! - WAV export and import
//! - Resampling, down-mixing and stem recombination

pub mod codec;
pub mod mix;
pub mod pcm;
pub mod wav;

pub use codec::{codec_decode, codec_encode, MockCodec};
pub use mix::{flatten_audio, merge_and_match, resample, resample_to_len};
pub use pcm::{to_i16_pcm, PcmBuffer};
pub use wav::{read_wav, write_pcm16_wav, write_raw_pcm, write_wav, WavAudio};

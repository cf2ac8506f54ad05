//! Parametric speech synthesis.
//!
//! A [`VoiceModel`] holds the output format and a formant table. [`synthesize`] renders a
//! [`SpeechRequest`] (phoneme events plus voice multipliers) into 16-bit mono PCM through a
//! glottal pulse and noise source feeding a cascade of formant resonators. Rendering is a pure
//! function of its inputs: there is no randomness and no clock.
//!
//! How the target program lays phonemes out in memory is abstracted by [`PhonemeCodec`].

#![forbid(unsafe_code)]

mod codec;
mod error;
mod pcm;
mod request;
mod synth;
mod voice;

pub use codec::{ByteCodec, CodecKind, PackedCodec, PhonemeCodec};
pub use error::{Result, SpeechError};
pub use pcm::PcmBuffer;
pub use request::{
    PhonemeEvent, SpeechRequest, VoiceParams, AMPLITUDE_RANGE, MAX_DURATION_SCALE, PITCH_RANGE,
    RATE_RANGE,
};
pub use synth::{synthesize, synthesize_or_silence};
pub use voice::{
    Formant, Phoneme, VoiceConfig, VoiceModel, DEFAULT_BASE_PITCH_HZ, DEFAULT_SAMPLE_RATE,
};

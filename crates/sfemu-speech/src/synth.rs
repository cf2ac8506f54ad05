use std::f32::consts::PI;

use crate::error::{Result, SpeechError};
use crate::pcm::PcmBuffer;
use crate::request::SpeechRequest;
use crate::voice::{Formant, VoiceModel};

/// Scales the resonator cascade output into the i16 range before clipping.
const OUTPUT_GAIN: f32 = 0.25;
/// Longest attack/release ramp.
const MAX_RAMP_MS: u32 = 10;
const NOISE_SEED: u16 = 0xACE1;

/// Two-pole digital resonator (Klatt form), unity gain at DC.
#[derive(Debug, Clone, Copy, Default)]
struct Resonator {
    a: f32,
    b: f32,
    c: f32,
    y1: f32,
    y2: f32,
}

impl Resonator {
    /// Retune without clearing the delay line so formant transitions stay continuous.
    fn tune(&mut self, formant: Formant, sample_rate: f32) {
        let t = 1.0 / sample_rate;
        self.c = -(-2.0 * PI * formant.bandwidth_hz * t).exp();
        self.b = 2.0 * (-PI * formant.bandwidth_hz * t).exp() * (2.0 * PI * formant.freq_hz * t).cos();
        self.a = 1.0 - self.b - self.c;
    }

    fn process(&mut self, x: f32) -> f32 {
        let y = self.a * x + self.b * self.y1 + self.c * self.y2;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// 16-bit Galois LFSR; the frication source.
#[derive(Debug, Clone, Copy)]
struct Lfsr(u16);

impl Lfsr {
    fn next(&mut self) -> f32 {
        let bit = self.0 & 1;
        self.0 >>= 1;
        if bit != 0 {
            self.0 ^= 0xB400;
        }
        if bit != 0 {
            1.0
        } else {
            -1.0
        }
    }
}

fn validate(model: &VoiceModel, request: &SpeechRequest) -> Result<()> {
    request.voice.validate()?;
    for event in &request.phonemes {
        event.validate()?;
        if model.phoneme(event.phoneme).is_none() {
            return Err(SpeechError::UnknownPhoneme(event.phoneme));
        }
    }
    Ok(())
}

/// Render `request` to PCM.
///
/// Pure: the same model and request always give the same samples. Every parameter is checked
/// before any rendering happens.
pub fn synthesize(model: &VoiceModel, request: &SpeechRequest) -> Result<PcmBuffer> {
    validate(model, request)?;

    let sample_rate = model.sample_rate();
    let sr = sample_rate as f32;
    let voice = request.voice;
    let ramp_cap = (sample_rate * MAX_RAMP_MS / 1000) as usize;

    let total: usize = request
        .phonemes
        .iter()
        .filter_map(|e| {
            let ph = model.phoneme(e.phoneme)?;
            Some(model.samples_for(ph.duration_ms, e.duration_scale, voice.rate))
        })
        .sum();
    let mut samples = Vec::with_capacity(total);

    let mut resonators = [Resonator::default(); 3];
    let mut noise = Lfsr(NOISE_SEED);
    let mut phase = 0.0f32;

    for event in &request.phonemes {
        let Some(ph) = model.phoneme(event.phoneme) else {
            continue;
        };
        let n = model.samples_for(ph.duration_ms, event.duration_scale, voice.rate);
        for (r, formant) in resonators.iter_mut().zip(ph.formants) {
            r.tune(formant, sr);
        }
        let f0 = model.base_pitch_hz() * voice.pitch * event.pitch_scale;
        let step = f0 / sr;
        let ramp = (n / 4).min(ramp_cap).max(1);

        for i in 0..n {
            // Sawtooth glottal pulse.
            let voiced = 2.0 * phase - 1.0;
            phase += step;
            if phase >= 1.0 {
                phase -= 1.0;
            }
            let excitation = ph.voicing * voiced + ph.frication * noise.next();
            let y = resonators
                .iter_mut()
                .fold(excitation, |x, r| r.process(x));

            let env = if i < ramp {
                i as f32 / ramp as f32
            } else if n - i <= ramp {
                (n - i - 1) as f32 / ramp as f32
            } else {
                1.0
            };
            let s = (y * OUTPUT_GAIN * env * voice.amplitude).clamp(-1.0, 1.0);
            samples.push((s * f32::from(i16::MAX)) as i16);
        }
    }

    tracing::debug!(
        phonemes = request.phonemes.len(),
        samples = samples.len(),
        sample_rate,
        "synthesized speech"
    );
    Ok(PcmBuffer::new(samples, sample_rate))
}

/// Like [`synthesize`], but failures yield silence alongside the error so audio output never
/// stalls on bad input.
pub fn synthesize_or_silence(
    model: &VoiceModel,
    request: &SpeechRequest,
) -> (PcmBuffer, Option<SpeechError>) {
    match synthesize(model, request) {
        Ok(pcm) => (pcm, None),
        Err(err) => {
            tracing::warn!(%err, "speech synthesis failed; emitting silence");
            (PcmBuffer::silence(model.sample_rate()), Some(err))
        }
    }
}

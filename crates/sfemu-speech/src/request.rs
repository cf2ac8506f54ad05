use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeechError};

pub const PITCH_RANGE: std::ops::RangeInclusive<f32> = 0.25..=4.0;
pub const RATE_RANGE: std::ops::RangeInclusive<f32> = 0.25..=4.0;
pub const AMPLITUDE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=1.0;
/// Per-phoneme duration scale must be positive and below this bound.
pub const MAX_DURATION_SCALE: f32 = 16.0;

/// Voice multipliers applied to a whole request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    pub pitch: f32,
    pub rate: f32,
    pub amplitude: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            rate: 1.0,
            amplitude: 0.8,
        }
    }
}

fn check(name: &'static str, value: f32, range: &std::ops::RangeInclusive<f32>) -> Result<()> {
    if value.is_finite() && range.contains(&value) {
        Ok(())
    } else {
        Err(SpeechError::InvalidParameter {
            name,
            value: f64::from(value),
        })
    }
}

impl VoiceParams {
    /// Three bytes `pitch, rate, amplitude`, each in sixteenths.
    pub fn from_sixteenths(bytes: [u8; 3]) -> Self {
        Self {
            pitch: f32::from(bytes[0]) / 16.0,
            rate: f32::from(bytes[1]) / 16.0,
            amplitude: f32::from(bytes[2]) / 16.0,
        }
    }

    /// Out-of-range values are errors; nothing is clamped.
    pub fn validate(&self) -> Result<()> {
        check("pitch", self.pitch, &PITCH_RANGE)?;
        check("rate", self.rate, &RATE_RANGE)?;
        check("amplitude", self.amplitude, &AMPLITUDE_RANGE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhonemeEvent {
    /// Index into the voice model's phoneme table.
    pub phoneme: u8,
    pub duration_scale: f32,
    pub pitch_scale: f32,
}

impl PhonemeEvent {
    pub fn new(phoneme: u8) -> Self {
        Self {
            phoneme,
            duration_scale: 1.0,
            pitch_scale: 1.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.duration_scale.is_finite()
            && self.duration_scale > 0.0
            && self.duration_scale < MAX_DURATION_SCALE)
        {
            return Err(SpeechError::InvalidParameter {
                name: "duration_scale",
                value: f64::from(self.duration_scale),
            });
        }
        check("pitch_scale", self.pitch_scale, &PITCH_RANGE)
    }
}

/// Everything needed to render one utterance. Consumed by a single synthesis call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub phonemes: Vec<PhonemeEvent>,
    pub voice: VoiceParams,
}

impl SpeechRequest {
    pub fn new(phonemes: Vec<PhonemeEvent>, voice: VoiceParams) -> Self {
        Self { phonemes, voice }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_bounds_are_inclusive() {
        let mut v = VoiceParams {
            pitch: 0.25,
            rate: 4.0,
            amplitude: 0.0,
        };
        assert!(v.validate().is_ok());
        v.rate = 4.01;
        assert_eq!(
            v.validate(),
            Err(SpeechError::InvalidParameter {
                name: "rate",
                value: f64::from(4.01f32)
            })
        );
        v.rate = 1.0;
        v.amplitude = f32::INFINITY;
        assert!(v.validate().is_err());
    }

    #[test]
    fn sixteenths_decode() {
        let v = VoiceParams::from_sixteenths([16, 32, 8]);
        assert_eq!((v.pitch, v.rate, v.amplitude), (1.0, 2.0, 0.5));
    }

    #[test]
    fn zero_duration_scale_is_invalid() {
        let mut e = PhonemeEvent::new(5);
        assert!(e.validate().is_ok());
        e.duration_scale = 0.0;
        assert!(matches!(
            e.validate(),
            Err(SpeechError::InvalidParameter {
                name: "duration_scale",
                ..
            })
        ));
    }

    #[test]
    fn request_is_json_friendly() {
        let req = SpeechRequest::new(vec![PhonemeEvent::new(5)], VoiceParams::default());
        let json = serde_json::to_string(&req).unwrap();
        let back: SpeechRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}

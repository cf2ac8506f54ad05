use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeechError};

pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;
pub const DEFAULT_BASE_PITCH_HZ: f32 = 110.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Output rate of 16-bit signed mono PCM.
    pub sample_rate: u32,
    /// Glottal frequency at pitch multiplier 1.0.
    pub base_pitch_hz: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            base_pitch_hz: DEFAULT_BASE_PITCH_HZ,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Formant {
    pub freq_hz: f32,
    pub bandwidth_hz: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Phoneme {
    pub symbol: &'static str,
    pub formants: [Formant; 3],
    /// Gain of the glottal pulse source.
    pub voicing: f32,
    /// Gain of the noise source.
    pub frication: f32,
    pub duration_ms: u32,
}

/// Long-lived synthesis configuration: output format plus the formant table.
///
/// Immutable once built; share it between machines and threads through an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceModel {
    config: VoiceConfig,
    phonemes: Vec<Phoneme>,
}

const fn f(freq_hz: f32, bandwidth_hz: f32) -> Formant {
    Formant {
        freq_hz,
        bandwidth_hz,
    }
}

#[rustfmt::skip]
const PHONEMES: &[(&str, [Formant; 3], f32, f32, u32)] = &[
    // Pause. Code 0 never reaches the table through a codec; it terminates the stream.
    ("PA", [f(500.0, 60.0), f(1500.0, 90.0), f(2500.0, 150.0)], 0.0, 0.0, 100),
    ("IY", [f(270.0, 60.0), f(2290.0, 90.0), f(3010.0, 150.0)], 1.0, 0.0, 160),
    ("IH", [f(390.0, 60.0), f(1990.0, 90.0), f(2550.0, 150.0)], 1.0, 0.0, 100),
    ("EH", [f(530.0, 60.0), f(1840.0, 90.0), f(2480.0, 150.0)], 1.0, 0.0, 120),
    ("AE", [f(660.0, 70.0), f(1720.0, 100.0), f(2410.0, 150.0)], 1.0, 0.0, 150),
    ("AA", [f(730.0, 80.0), f(1090.0, 90.0), f(2440.0, 150.0)], 1.0, 0.0, 160),
    ("AO", [f(570.0, 70.0), f(840.0, 90.0), f(2410.0, 150.0)], 1.0, 0.0, 160),
    ("UH", [f(440.0, 60.0), f(1020.0, 90.0), f(2240.0, 150.0)], 1.0, 0.0, 100),
    ("UW", [f(300.0, 60.0), f(870.0, 90.0), f(2240.0, 150.0)], 1.0, 0.0, 160),
    ("AH", [f(640.0, 70.0), f(1190.0, 90.0), f(2390.0, 150.0)], 1.0, 0.0, 110),
    ("ER", [f(490.0, 60.0), f(1350.0, 90.0), f(1690.0, 120.0)], 1.0, 0.0, 150),
    ("EY", [f(480.0, 60.0), f(2000.0, 90.0), f(2600.0, 150.0)], 1.0, 0.0, 170),
    ("AY", [f(660.0, 70.0), f(1500.0, 90.0), f(2500.0, 150.0)], 1.0, 0.0, 190),
    ("OW", [f(500.0, 60.0), f(900.0, 90.0), f(2350.0, 150.0)], 1.0, 0.0, 170),
    ("M",  [f(250.0, 100.0), f(1200.0, 200.0), f(2100.0, 300.0)], 0.6, 0.0, 80),
    ("N",  [f(250.0, 100.0), f(1700.0, 200.0), f(2600.0, 300.0)], 0.6, 0.0, 70),
    ("NG", [f(250.0, 100.0), f(2300.0, 200.0), f(2750.0, 300.0)], 0.6, 0.0, 80),
    ("L",  [f(360.0, 80.0), f(1000.0, 120.0), f(2500.0, 200.0)], 0.8, 0.0, 70),
    ("R",  [f(420.0, 80.0), f(1300.0, 120.0), f(1600.0, 200.0)], 0.8, 0.0, 70),
    ("W",  [f(290.0, 60.0), f(610.0, 90.0), f(2150.0, 150.0)], 0.8, 0.0, 60),
    ("Y",  [f(260.0, 60.0), f(2070.0, 90.0), f(3020.0, 150.0)], 0.8, 0.0, 60),
    ("S",  [f(320.0, 200.0), f(1390.0, 300.0), f(5000.0, 400.0)], 0.0, 0.7, 110),
    ("SH", [f(300.0, 200.0), f(1840.0, 300.0), f(2750.0, 400.0)], 0.0, 0.6, 120),
    ("F",  [f(320.0, 200.0), f(1390.0, 300.0), f(2530.0, 400.0)], 0.0, 0.3, 100),
    ("TH", [f(320.0, 200.0), f(1290.0, 300.0), f(2540.0, 400.0)], 0.0, 0.25, 100),
    ("H",  [f(500.0, 200.0), f(1500.0, 300.0), f(2500.0, 400.0)], 0.0, 0.3, 70),
    ("Z",  [f(240.0, 100.0), f(1390.0, 200.0), f(2530.0, 300.0)], 0.4, 0.5, 90),
    ("V",  [f(220.0, 100.0), f(1100.0, 200.0), f(2080.0, 300.0)], 0.4, 0.2, 80),
    ("B",  [f(200.0, 100.0), f(900.0, 200.0), f(2100.0, 300.0)], 0.5, 0.1, 50),
    ("D",  [f(200.0, 100.0), f(1600.0, 200.0), f(2600.0, 300.0)], 0.5, 0.1, 50),
    ("G",  [f(200.0, 100.0), f(1990.0, 200.0), f(2850.0, 300.0)], 0.5, 0.1, 50),
    ("P",  [f(400.0, 200.0), f(1100.0, 300.0), f(2150.0, 400.0)], 0.0, 0.4, 50),
    ("T",  [f(400.0, 200.0), f(1600.0, 300.0), f(2600.0, 400.0)], 0.0, 0.4, 50),
    ("K",  [f(300.0, 200.0), f(1990.0, 300.0), f(2850.0, 400.0)], 0.0, 0.4, 60),
    ("CH", [f(350.0, 200.0), f(1800.0, 300.0), f(2820.0, 400.0)], 0.0, 0.5, 100),
    ("JH", [f(260.0, 100.0), f(1800.0, 200.0), f(2820.0, 300.0)], 0.3, 0.4, 90),
];

fn table() -> Vec<Phoneme> {
    PHONEMES
        .iter()
        .map(|&(symbol, formants, voicing, frication, duration_ms)| Phoneme {
            symbol,
            formants,
            voicing,
            frication,
            duration_ms,
        })
        .collect()
}

impl VoiceModel {
    pub fn new(config: VoiceConfig) -> Result<Self> {
        if !(4_000..=96_000).contains(&config.sample_rate) {
            return Err(SpeechError::InvalidParameter {
                name: "sample_rate",
                value: f64::from(config.sample_rate),
            });
        }
        if !config.base_pitch_hz.is_finite() || !(40.0..=500.0).contains(&config.base_pitch_hz) {
            return Err(SpeechError::InvalidParameter {
                name: "base_pitch_hz",
                value: f64::from(config.base_pitch_hz),
            });
        }
        Ok(Self {
            config,
            phonemes: table(),
        })
    }

    /// The shared default model (22 050 Hz, 110 Hz base pitch), built on first use.
    pub fn standard() -> Arc<VoiceModel> {
        static STANDARD: OnceLock<Arc<VoiceModel>> = OnceLock::new();
        STANDARD
            .get_or_init(|| {
                Arc::new(Self {
                    config: VoiceConfig::default(),
                    phonemes: table(),
                })
            })
            .clone()
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn base_pitch_hz(&self) -> f32 {
        self.config.base_pitch_hz
    }

    pub fn phoneme(&self, code: u8) -> Option<&Phoneme> {
        self.phonemes.get(usize::from(code))
    }

    pub fn phonemes(&self) -> &[Phoneme] {
        &self.phonemes
    }

    pub fn code_of(&self, symbol: &str) -> Option<u8> {
        self.phonemes
            .iter()
            .position(|p| p.symbol == symbol)
            .and_then(|i| u8::try_from(i).ok())
    }

    /// Exact number of samples rendered for one phoneme.
    pub fn samples_for(&self, duration_ms: u32, duration_scale: f32, rate: f32) -> usize {
        let ms = f64::from(duration_ms) * f64::from(duration_scale) / f64::from(rate);
        (ms * f64::from(self.config.sample_rate) / 1000.0).round() as usize
    }
}

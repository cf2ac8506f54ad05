use serde::{Deserialize, Serialize};
use sfemu_mem::{RomWritePolicy, ADDRESS_SPACE};
use sfemu_speech::{CodecKind, VoiceParams};

use crate::error::{MachineError, Result};
use crate::input::INPUT_WINDOW_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKindConfig {
    Ram,
    /// Zero-filled ROM; contents come from `Machine::load_program`.
    Rom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub base: u32,
    pub len: u32,
    pub kind: RegionKindConfig,
}

impl RegionConfig {
    pub fn ram(base: u32, len: u32) -> Self {
        Self {
            base,
            len,
            kind: RegionKindConfig::Ram,
        }
    }

    pub fn rom(base: u32, len: u32) -> Self {
        Self {
            base,
            len,
            kind: RegionKindConfig::Rom,
        }
    }
}

/// Register values installed on construction and by `Machine::reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetState {
    pub cs: u16,
    pub ip: u16,
    pub ss: u16,
    pub sp: u16,
    pub ds: u16,
    pub es: u16,
}

impl Default for ResetState {
    fn default() -> Self {
        Self {
            cs: 0,
            ip: 0x0100,
            ss: 0,
            sp: 0xFFFE,
            ds: 0,
            es: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RomWrites {
    /// Log a warning and drop the write.
    #[default]
    Ignore,
    /// Fail the access, which halts the run.
    Fault,
}

impl From<RomWrites> for RomWritePolicy {
    fn from(value: RomWrites) -> Self {
        match value {
            RomWrites::Ignore => RomWritePolicy::Ignore,
            RomWrites::Fault => RomWritePolicy::Fault,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFaultPolicy {
    #[default]
    Halt,
    /// Step over the offending byte and report a warning.
    Skip,
}

/// Packed 4-bit-per-pixel framebuffer, two pixels per byte, high nibble first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramebufferConfig {
    pub base: u32,
    pub width: u32,
    pub height: u32,
}

impl FramebufferConfig {
    pub fn len(&self) -> u32 {
        (self.width * self.height).div_ceil(2)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for FramebufferConfig {
    fn default() -> Self {
        Self {
            base: 0xA0000,
            width: 320,
            height: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "at")]
pub enum SpeechBuffer {
    Fixed { addr: u32 },
    /// `DS:SI` when the trigger fires.
    DsSi,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceSource {
    Fixed(VoiceParams),
    /// Three bytes (pitch, rate, amplitude in sixteenths) right after the phoneme buffer.
    Sixteenths,
}

impl Default for VoiceSource {
    fn default() -> Self {
        VoiceSource::Fixed(VoiceParams::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Linear address of the instruction that starts an utterance.
    pub trigger: u32,
    pub buffer: SpeechBuffer,
    /// Bytes read from the buffer; the codec's terminator may end the request earlier.
    pub buffer_len: u32,
    #[serde(default)]
    pub codec: CodecKind,
    #[serde(default)]
    pub voice: VoiceSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub regions: Vec<RegionConfig>,
    pub reset: ResetState,
    pub rom_writes: RomWrites,
    pub decode_faults: DecodeFaultPolicy,
    pub honor_trap_flag: bool,
    pub framebuffer: Option<FramebufferConfig>,
    /// Base of the input device window; `None` maps no device.
    pub input_base: Option<u32>,
    pub speech: Option<SpeechConfig>,
    /// Capacity of the trace ring.
    pub trace_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            regions: vec![RegionConfig::ram(0, 0xA0000), RegionConfig::ram(0xA0000, 0x10000)],
            reset: ResetState::default(),
            rom_writes: RomWrites::default(),
            decode_faults: DecodeFaultPolicy::default(),
            honor_trap_flag: true,
            framebuffer: Some(FramebufferConfig::default()),
            input_base: Some(0xE0000),
            speech: None,
            trace_capacity: 4096,
        }
    }
}

impl MachineConfig {
    /// Checks what the memory bus cannot: framebuffer and speech settings.
    pub fn validate(&self) -> Result<()> {
        if let Some(fb) = &self.framebuffer {
            if fb.is_empty() {
                return Err(MachineError::InvalidConfig(
                    "framebuffer has no pixels".to_string(),
                ));
            }
            if u64::from(fb.base) + u64::from(fb.len()) > u64::from(ADDRESS_SPACE) {
                return Err(MachineError::InvalidConfig(format!(
                    "framebuffer at 0x{:05x} runs past the address space",
                    fb.base
                )));
            }
        }
        if let Some(base) = self.input_base {
            if u64::from(base) + u64::from(INPUT_WINDOW_LEN) > u64::from(ADDRESS_SPACE) {
                return Err(MachineError::InvalidConfig(format!(
                    "input device at 0x{base:05x} runs past the address space"
                )));
            }
        }
        if let Some(speech) = &self.speech {
            if speech.buffer_len == 0 || speech.buffer_len > 0x1_0000 {
                return Err(MachineError::InvalidConfig(format!(
                    "speech buffer length {} must be within 1..=65536",
                    speech.buffer_len
                )));
            }
            if speech.trigger >= ADDRESS_SPACE {
                return Err(MachineError::InvalidConfig(format!(
                    "speech trigger 0x{:x} is outside the address space",
                    speech.trigger
                )));
            }
        }
        Ok(())
    }
}

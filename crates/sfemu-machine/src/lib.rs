//! The Starflight machine: CPU, memory map and hook registry behind one host-facing API.
//!
//! The host builds a [`Machine`] from a [`MachineConfig`], loads the program image, then calls
//! [`Machine::step`] once per tick. Between steps it feeds keys with [`Machine::set_input`], reads
//! the framebuffer with [`Machine::render_bgra`], and collects speech through an [`AudioSink`]
//! or [`Machine::take_audio`]. [`Machine::snapshot`] and [`Machine::restore`] save and load the
//! complete emulated state.

#![forbid(unsafe_code)]

mod audio;
mod config;
mod error;
pub mod input;
mod machine;
mod snapshot;
mod speech;
mod video;
mod warning;

pub use audio::AudioSink;
pub use config::{
    DecodeFaultPolicy, FramebufferConfig, MachineConfig, RegionConfig, RegionKindConfig,
    ResetState, RomWrites, SpeechBuffer, SpeechConfig, VoiceSource,
};
pub use error::{MachineError, Result};
pub use input::{scan_code, InputDevice, Key};
pub use machine::{Machine, StepSummary, StopReason};
pub use video::{render_bgra, EGA_PALETTE};
pub use warning::Warning;

//! Emulator core for running the DOS release of Starflight.
//!
//! Each component lives in its own crate and is re-exported here under a short name. Most hosts
//! only need [`Machine`] and its configuration types.

pub use sfemu_cpu as cpu;
pub use sfemu_debug as debug;
pub use sfemu_machine as machine;
pub use sfemu_mem as mem;
pub use sfemu_patch as patch;
pub use sfemu_snapshot as snapshot;
pub use sfemu_speech as speech;

pub use sfemu_machine::{
    AudioSink, Machine, MachineConfig, MachineError, StepSummary, StopReason, Warning,
};

use sfemu_patch::{HookError, HookId, PatchError, Trigger};
use sfemu_speech::SpeechError;
use thiserror::Error;

/// A problem the machine recovered from. Reported in the step summary; the run continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Warning {
    #[error("hook {hook} ({label}) failed at 0x{access_addr:05x} on {trigger:?}: {error}")]
    HookFailed {
        hook: HookId,
        label: String,
        trigger: Trigger,
        access_addr: u32,
        error: HookError,
    },

    #[error("register-change hooks at 0x{addr:05x} failed: {error}")]
    RegisterHooksFailed { addr: u32, error: PatchError },

    #[error("skipped undecodable opcode 0x{opcode:02x} at 0x{addr:05x}")]
    DecodeSkipped { addr: u32, opcode: u8 },

    #[error("speech at 0x{trigger:05x} fell back to silence: {error}")]
    Speech { trigger: u32, error: SpeechError },

    #[error("speech buffer at 0x{trigger:05x} could not be read: {error}")]
    SpeechBuffer { trigger: u32, error: HookError },
}

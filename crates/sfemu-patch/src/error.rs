use sfemu_mem::MemoryError;
use thiserror::Error;

use crate::hook::{HookId, TriggerKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("unknown or stale hook id {0}")]
    UnknownHook(HookId),

    #[error("hook cycle detected: {kind:?} trigger at 0x{addr:05x} is already being dispatched")]
    HookCycleDetected { addr: u32, kind: TriggerKind },

    #[error("hook halted execution at 0x{addr:05x}")]
    Halted { addr: u32 },

    #[error("hook registry does not match saved state: {0}")]
    RegistryMismatch(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Error returned by a hook callback.
///
/// A failing hook never aborts dispatch: its changes are rolled back, the error is logged and
/// recorded, and the remaining hooks run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("observe hooks cannot {0}")]
    ObserveOnly(&'static str),

    #[error("{0}")]
    Failed(String),
}

impl HookError {
    pub fn msg(msg: impl Into<String>) -> Self {
        HookError::Failed(msg.into())
    }
}

//! Address-keyed hooks over the emulated machine's fetch and data paths.
//!
//! A [`PatchEngine`] owns every registered [`Hook`] and dispatches them around the accesses the
//! CPU makes through a [`PatchedBus`]. Hooks can observe, augment or replace an instruction fetch,
//! a data read or write, or the register file after an instruction, so behavior of the target
//! program can be corrected or instrumented while its image stays byte-identical.

#![forbid(unsafe_code)]

mod bus;
mod context;
mod engine;
mod error;
mod hook;

pub use bus::PatchedBus;
pub use context::{HookContext, RegsView};
pub use engine::{DispatchResult, HookEvent, HookFailure, PatchEngine};
pub use error::{HookError, PatchError};
pub use hook::{
    Hook, HookAction, HookDescriptor, HookFn, HookId, RegistryState, Trigger, TriggerKind, Verdict,
};

pub type Result<T> = std::result::Result<T, PatchError>;

use sfemu_mem::MemoryError;
use sfemu_patch::PatchError;
use sfemu_snapshot::SnapshotError;
use sfemu_speech::SpeechError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MachineError>;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("invalid machine configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Speech(#[from] SpeechError),

    #[error("snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("cannot snapshot in the middle of an instruction")]
    MidInstruction,

    #[error("no input device is mapped")]
    NoInputDevice,

    #[error("no framebuffer is configured")]
    NoFramebuffer,
}

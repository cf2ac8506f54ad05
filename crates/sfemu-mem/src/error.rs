use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("access out of bounds: addr=0x{addr:05x} len={len}")]
    OutOfBounds { addr: u32, len: usize },

    #[error("write to read-only memory: addr=0x{addr:05x} len={len}")]
    ReadOnly { addr: u32, len: usize },

    #[error("memory region at 0x{base:05x} is empty")]
    EmptyRegion { base: u32 },

    #[error("memory region 0x{base:05x}+0x{len:x} exceeds the address space")]
    OutOfSpace { base: u32, len: u32 },

    #[error("memory region 0x{base:05x}+0x{len:x} overlaps region at 0x{existing:05x}")]
    Overlap { base: u32, len: u32, existing: u32 },

    #[error("access width mismatch: expected {expected} bytes, got {found}")]
    WidthMismatch { expected: usize, found: usize },

    #[error("range 0x{addr:05x}+{len} is not backed by a single ROM/RAM region")]
    NotContiguous { addr: u32, len: usize },
}

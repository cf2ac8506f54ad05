//! Flat 20-bit address space for the emulated 8086 machine.
//!
//! [`MemoryBus`] routes every access to one of a set of disjoint regions: ROM (immutable image),
//! RAM (plain backing storage) or MMIO (a [`MmioDevice`] callback). Addresses that no region covers
//! are an error rather than open bus, so integration mistakes surface at the first stray access.

#![forbid(unsafe_code)]

mod access;
mod bus;
mod error;
mod region;

pub use access::{AccessData, Width};
pub use bus::{MemoryBus, RomWritePolicy, WriteOutcome};
pub use error::{MemoryError, Result};
pub use region::{MmioDevice, RegionInfo, RegionKind};

/// Size of the real-mode linear address space (1 MiB).
pub const ADDRESS_SPACE: u32 = 0x10_0000;
